//! Identifier quoting and deterministic names for generated constraints.

use std::fmt;

/// A PostgreSQL string literal wrapper.
///
/// Display writes the value escaped and quoted with single quotes.
///
/// # Example
/// ```
/// use keel_schema::Lit;
/// assert_eq!(format!("{}", Lit("foo")), "'foo'");
/// assert_eq!(format!("{}", Lit("it's")), "'it''s'");
/// ```
pub struct Lit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'")?;
        for c in self.0.as_ref().chars() {
            if c == '\'' {
                write!(f, "''")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "'")
    }
}

/// A PostgreSQL identifier wrapper.
///
/// Display writes the value escaped and quoted with double quotes.
///
/// # Example
/// ```
/// use keel_schema::Ident;
/// assert_eq!(format!("{}", Ident("user")), "\"user\"");
/// assert_eq!(format!("{}", Ident("bla\"h")), "\"bla\"\"h\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"")?;
        for c in self.0.as_ref().chars() {
            if c == '"' {
                write!(f, "\"\"")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "\"")
    }
}

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("{}", Ident(name))
}

/// Quote and join a list of identifiers with `, `.
pub fn quote_idents(names: &[impl AsRef<str>]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Escape a string literal for SQL.
pub fn escape_string(s: &str) -> String {
    format!("{}", Lit(s))
}

// Prefix plus hash must fit in NAMEDATALEN (63 bytes); 30 keeps names readable.
const GENERATED_NAME_LEN: usize = 30;

fn generated_name(prefix: &str, input: &str) -> String {
    let hex = blake3::hash(input.as_bytes()).to_hex().to_string();
    let suffix_len = GENERATED_NAME_LEN.saturating_sub(prefix.len());
    format!("{}{}", prefix, &hex[..suffix_len])
}

/// Deterministic primary key constraint name, e.g. `PK_b249cc64cf63b8a22557cdc8537`.
pub fn primary_key_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    generated_name("PK_", &join_parts(table, columns))
}

/// Deterministic foreign key constraint name.
pub fn foreign_key_name(
    table: &str,
    columns: &[impl AsRef<str>],
    reference_table: &str,
    reference_columns: &[impl AsRef<str>],
) -> String {
    let input = format!(
        "{}_{}",
        join_parts(table, columns),
        join_parts(reference_table, reference_columns)
    );
    generated_name("FK_", &input)
}

/// Deterministic unique constraint name.
pub fn unique_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    generated_name("UQ_", &join_parts(table, columns))
}

/// Deterministic index name.
pub fn index_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    generated_name("IDX_", &join_parts(table, columns))
}

/// Deterministic CHECK constraint name.
///
/// The expression is whitespace-normalized first so reformatting it does not
/// rename the constraint.
pub fn check_name(table: &str, expression: &str) -> String {
    let input = format!("{}_{}", table, normalize_sql_expr(expression));
    generated_name("CHK_", &input)
}

/// Deterministic trigger name.
pub fn trigger_name(table: &str, function_name: &str) -> String {
    generated_name("TR_", &format!("{}_{}", table, function_name))
}

fn join_parts(table: &str, columns: &[impl AsRef<str>]) -> String {
    let cols: Vec<&str> = columns.iter().map(|c| c.as_ref()).collect();
    format!("{}_{}", table, cols.join("_"))
}

/// Collapse runs of whitespace outside quotes into a single space.
///
/// Used both for naming and for comparing function bodies and check
/// expressions, so cosmetic reformatting is not reported as a change.
pub fn normalize_sql_expr(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut pending_space = false;

    let mut in_single_quote = false;
    let mut in_double_quote = false;

    let mut chars = expr.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_single_quote {
            out.push(ch);
            if ch == '\'' {
                // '' is an escaped quote, not the end of the literal
                if let Some(next) = chars.next_if_eq(&'\'') {
                    out.push(next);
                } else {
                    in_single_quote = false;
                }
            }
            continue;
        }

        if in_double_quote {
            out.push(ch);
            if ch == '"' {
                if let Some(next) = chars.next_if_eq(&'"') {
                    out.push(next);
                } else {
                    in_double_quote = false;
                }
            }
            continue;
        }

        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }

        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(ch);
        match ch {
            '\'' => in_single_quote = true,
            '"' => in_double_quote = true,
            _ => {}
        }
    }

    out
}
