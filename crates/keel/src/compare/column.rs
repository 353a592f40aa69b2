use keel_schema::Column;

use super::{Comparer, difference};
use crate::action::{ColumnChanges, DiffAction, Reason};

pub fn column_comparer() -> Comparer<Column> {
    Comparer {
        on_extra: |live| {
            vec![DiffAction::ColumnDrop {
                table_name: live.table_name.clone(),
                column_name: live.name.clone(),
                reason: Reason::MissingInSource,
            }]
        },
        on_missing: |declared| {
            vec![DiffAction::ColumnCreate {
                column: declared.clone(),
                reason: Reason::MissingInTarget,
            }]
        },
        on_compare: compare_columns,
    }
}

fn compare_columns(source: &Column, target: &Column) -> Vec<DiffAction> {
    if !same_type(&source.data_type, &target.data_type) {
        let reason = difference("column type is", &source.data_type, &target.data_type);
        return recreate(source, target, reason);
    }

    if source.is_array != target.is_array {
        let reason = difference(
            "column is array is",
            source.is_array.to_string(),
            target.is_array.to_string(),
        );
        return recreate(source, target, reason);
    }

    let mut changes = ColumnChanges::default();
    let mut reasons = Vec::new();

    if source.nullable != target.nullable {
        changes.nullable = Some(source.nullable);
        reasons.push(difference(
            "nullable is",
            source.nullable.to_string(),
            target.nullable.to_string(),
        ));
    }

    if !same_default(source.default.as_deref(), target.default.as_deref()) {
        changes.default = Some(source.default.clone());
        reasons.push(difference(
            "default is",
            source.default.as_deref().unwrap_or("(none)"),
            target.default.as_deref().unwrap_or("(none)"),
        ));
    }

    if source.comment != target.comment {
        changes.comment = Some(source.comment.clone());
        reasons.push(difference(
            "comment is",
            source.comment.as_deref().unwrap_or("(none)"),
            target.comment.as_deref().unwrap_or("(none)"),
        ));
    }

    if changes.is_empty() {
        return Vec::new();
    }

    vec![DiffAction::ColumnAlter {
        table_name: source.table_name.clone(),
        column_name: source.name.clone(),
        changes,
        reason: Reason::Changed(reasons.join(", ")),
    }]
}

fn recreate(source: &Column, target: &Column, reason: String) -> Vec<DiffAction> {
    let reason = Reason::Changed(reason);
    vec![
        DiffAction::ColumnDrop {
            table_name: target.table_name.clone(),
            column_name: target.name.clone(),
            reason: reason.clone(),
        },
        DiffAction::ColumnCreate {
            column: source.clone(),
            reason,
        },
    ]
}

/// Type names as written by hand and as reported by `information_schema`
/// differ for a handful of aliases.
fn same_type(a: &str, b: &str) -> bool {
    canonical_type(a) == canonical_type(b)
}

fn canonical_type(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.as_str() {
        "int" | "int4" => "integer".to_string(),
        "int8" => "bigint".to_string(),
        "int2" => "smallint".to_string(),
        "bool" => "boolean".to_string(),
        "varchar" => "character varying".to_string(),
        "float8" => "double precision".to_string(),
        "float4" => "real".to_string(),
        "timestamptz" => "timestamp with time zone".to_string(),
        "timestamp" => "timestamp without time zone".to_string(),
        _ => lower,
    }
}

/// Compare default expressions, ignoring the `::type` cast Postgres appends
/// to literal defaults.
fn same_default(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => strip_literal_cast(a) == strip_literal_cast(b),
        _ => false,
    }
}

fn strip_literal_cast(expr: &str) -> &str {
    let expr = expr.trim();
    if expr.starts_with('\'')
        && let Some(end) = expr.rfind("'::")
    {
        return &expr[..=end];
    }
    expr
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_column(name: &str, data_type: &str) -> Column {
        Column::new("asset", name, data_type)
    }

    #[test]
    fn test_equal_columns() {
        let source = make_column("id", "uuid");
        assert!((column_comparer().on_compare)(&source, &source.clone()).is_empty());
    }

    #[test]
    fn test_type_change_recreates_column() {
        let source = make_column("checksum", "bytea");
        let target = make_column("checksum", "text");

        let actions = (column_comparer().on_compare)(&source, &target);
        let reason = Reason::Changed("column type is different (bytea vs text)".to_string());
        assert_eq!(
            actions,
            vec![
                DiffAction::ColumnDrop {
                    table_name: "asset".to_string(),
                    column_name: "checksum".to_string(),
                    reason: reason.clone(),
                },
                DiffAction::ColumnCreate {
                    column: source,
                    reason,
                },
            ]
        );
    }

    #[test]
    fn test_array_change_recreates_column() {
        let mut source = make_column("tags", "character varying");
        source.is_array = true;
        let target = make_column("tags", "varchar");

        let actions = (column_comparer().on_compare)(&source, &target);
        assert_eq!(actions.len(), 2);
        assert_eq!(
            actions[0].reason(),
            &Reason::Changed("column is array is different (true vs false)".to_string())
        );
    }

    #[test]
    fn test_nullability_is_altered_in_place() {
        let mut source = make_column("deletedAt", "timestamp with time zone");
        source.nullable = true;
        let target = make_column("deletedAt", "timestamptz");

        assert_eq!(
            (column_comparer().on_compare)(&source, &target),
            vec![DiffAction::ColumnAlter {
                table_name: "asset".to_string(),
                column_name: "deletedAt".to_string(),
                changes: ColumnChanges {
                    nullable: Some(true),
                    ..Default::default()
                },
                reason: Reason::Changed("nullable is different (true vs false)".to_string()),
            }]
        );
    }

    #[test]
    fn test_default_ignores_literal_cast() {
        let mut source = make_column("status", "character varying");
        source.default = Some("'active'".to_string());
        let mut target = source.clone();
        target.default = Some("'active'::character varying".to_string());

        assert!((column_comparer().on_compare)(&source, &target).is_empty());

        target.default = None;
        let actions = (column_comparer().on_compare)(&source, &target);
        let DiffAction::ColumnAlter { changes, .. } = &actions[0] else {
            panic!("expected ColumnAlter, got {:?}", actions);
        };
        assert_eq!(changes.default, Some(Some("'active'".to_string())));
    }

    #[test]
    fn test_comment_change() {
        let mut source = make_column("id", "uuid");
        source.comment = Some("primary id".to_string());
        let target = make_column("id", "uuid");

        let actions = (column_comparer().on_compare)(&source, &target);
        let DiffAction::ColumnAlter { changes, reason, .. } = &actions[0] else {
            panic!("expected ColumnAlter, got {:?}", actions);
        };
        assert_eq!(changes.comment, Some(Some("primary id".to_string())));
        assert_eq!(reason.to_string(), "comment is different (primary id vs (none))");
    }
}
