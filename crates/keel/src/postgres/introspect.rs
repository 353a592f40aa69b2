//! Read the live schema out of `pg_catalog`.
//!
//! The result uses the same conventions as a built schema (element type and
//! array flag split, `'lit'::type` defaults as Postgres prints them) so the
//! comparers can match the two sides directly.

use std::collections::HashMap;

use keel_schema::{
    Column, Constraint, ConstraintKind, DatabaseSchema, Enum, Extension, Function, Index,
    Parameter, ParameterScope, ReferentialAction, Table, Trigger, TriggerAction, TriggerScope,
    TriggerTiming,
};

use super::traced::TracedObject;
use crate::Result;

const TABLES_SQL: &str = "
SELECT c.relname::text AS table_name
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1
  AND c.relkind IN ('r', 'p')
  AND NOT EXISTS (
    SELECT 1 FROM pg_depend dep WHERE dep.objid = c.oid AND dep.deptype = 'e'
  )
ORDER BY c.relname";

const COLUMNS_SQL: &str = "
SELECT c.relname::text AS table_name,
       a.attname::text AS column_name,
       format_type(CASE WHEN t.typcategory = 'A' THEN t.typelem ELSE a.atttypid END, NULL) AS data_type,
       t.typcategory = 'A' AS is_array,
       NOT a.attnotnull AS nullable,
       pg_get_expr(d.adbin, d.adrelid) AS column_default,
       col_description(c.oid, a.attnum) AS comment
FROM pg_attribute a
JOIN pg_class c ON c.oid = a.attrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
JOIN pg_type t ON t.oid = a.atttypid
LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
WHERE n.nspname = $1
  AND c.relkind IN ('r', 'p')
  AND a.attnum > 0
  AND NOT a.attisdropped
ORDER BY c.relname, a.attnum";

const CONSTRAINTS_SQL: &str = "
SELECT con.conname::text AS constraint_name,
       rel.relname::text AS table_name,
       con.contype::text AS kind,
       ARRAY(
         SELECT a.attname::text
         FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
         JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
         ORDER BY k.ord
       ) AS column_names,
       ref.relname::text AS reference_table,
       ARRAY(
         SELECT a.attname::text
         FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
         JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
         ORDER BY k.ord
       ) AS reference_columns,
       con.confdeltype::text AS on_delete,
       con.confupdtype::text AS on_update,
       pg_get_constraintdef(con.oid) AS definition
FROM pg_constraint con
JOIN pg_class rel ON rel.oid = con.conrelid
JOIN pg_namespace n ON n.oid = rel.relnamespace
LEFT JOIN pg_class ref ON ref.oid = con.confrelid
WHERE n.nspname = $1
  AND con.contype IN ('p', 'u', 'c', 'f')
ORDER BY rel.relname, con.conname";

const INDEXES_SQL: &str = "
SELECT i.relname::text AS index_name,
       t.relname::text AS table_name,
       ix.indisunique AS is_unique,
       am.amname::text AS method,
       ARRAY(
         SELECT a.attname::text
         FROM unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord)
         JOIN pg_attribute a ON a.attrelid = ix.indrelid AND a.attnum = k.attnum
         ORDER BY k.ord
       ) AS column_names,
       pg_get_expr(ix.indpred, ix.indrelid) AS where_clause
FROM pg_index ix
JOIN pg_class i ON i.oid = ix.indexrelid
JOIN pg_class t ON t.oid = ix.indrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
JOIN pg_am am ON am.oid = i.relam
WHERE n.nspname = $1
  AND NOT EXISTS (
    SELECT 1 FROM pg_constraint con
    WHERE con.conindid = ix.indexrelid AND con.contype IN ('p', 'u', 'x')
  )
ORDER BY t.relname, i.relname";

const ENUMS_SQL: &str = "
SELECT t.typname::text AS enum_name,
       array_agg(e.enumlabel::text ORDER BY e.enumsortorder) AS labels
FROM pg_type t
JOIN pg_enum e ON e.enumtypid = t.oid
JOIN pg_namespace n ON n.oid = t.typnamespace
WHERE n.nspname = $1
GROUP BY t.typname
ORDER BY t.typname";

const EXTENSIONS_SQL: &str = "SELECT extname::text AS extension_name FROM pg_extension ORDER BY extname";

const FUNCTIONS_SQL: &str = "
SELECT p.proname::text AS function_name,
       pg_get_functiondef(p.oid) AS expression
FROM pg_proc p
JOIN pg_namespace n ON n.oid = p.pronamespace
WHERE n.nspname = $1
  AND p.prokind = 'f'
  AND NOT EXISTS (
    SELECT 1 FROM pg_depend dep WHERE dep.objid = p.oid AND dep.deptype = 'e'
  )
ORDER BY p.proname";

const TRIGGERS_SQL: &str = "
SELECT tg.tgname::text AS trigger_name,
       c.relname::text AS table_name,
       tg.tgtype::int4 AS trigger_type,
       p.proname::text AS function_name,
       tg.tgoldtable::text AS old_table,
       tg.tgnewtable::text AS new_table,
       pg_get_triggerdef(tg.oid) AS definition
FROM pg_trigger tg
JOIN pg_class c ON c.oid = tg.tgrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
JOIN pg_proc p ON p.oid = tg.tgfoid
WHERE n.nspname = $1
  AND NOT tg.tgisinternal
ORDER BY c.relname, tg.tgname";

const PARAMETERS_SQL: &str = "
SELECT unnest(s.setconfig) AS setting
FROM pg_db_role_setting s
JOIN pg_database d ON d.oid = s.setdatabase
WHERE d.datname = current_database()
  AND s.setrole = 0";

/// Load every object of `schema_name` in the connected database.
pub async fn schema_from_database(conn: &TracedObject, schema_name: &str) -> Result<DatabaseSchema> {
    let database_name: String = conn
        .query_one("SELECT current_database()::text", &[])
        .await?
        .try_get(0)?;
    let mut schema = DatabaseSchema::new(&database_name, schema_name);

    let mut tables: Vec<Table> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();
    for row in conn.query(TABLES_SQL, &[&schema_name]).await? {
        let name: String = row.try_get("table_name")?;
        by_name.insert(name.clone(), tables.len());
        tables.push(Table::new(name));
    }

    for row in conn.query(COLUMNS_SQL, &[&schema_name]).await? {
        let table_name: String = row.try_get("table_name")?;
        let Some(&idx) = by_name.get(&table_name) else {
            continue;
        };
        let mut column = Column::new(
            &table_name,
            row.try_get::<_, String>("column_name")?,
            row.try_get::<_, String>("data_type")?,
        );
        column.is_array = row.try_get("is_array")?;
        column.nullable = row.try_get("nullable")?;
        column.default = row.try_get("column_default")?;
        column.comment = row.try_get("comment")?;
        tables[idx].columns.push(column);
    }

    for row in conn.query(CONSTRAINTS_SQL, &[&schema_name]).await? {
        let table_name: String = row.try_get("table_name")?;
        let Some(&idx) = by_name.get(&table_name) else {
            continue;
        };
        let code: String = row.try_get("kind")?;
        let kind = match code.as_str() {
            "p" => ConstraintKind::PrimaryKey,
            "u" => ConstraintKind::Unique,
            "c" => ConstraintKind::Check {
                expression: check_expression(&row.try_get::<_, String>("definition")?),
            },
            "f" => ConstraintKind::ForeignKey {
                reference_table: row
                    .try_get::<_, Option<String>>("reference_table")?
                    .unwrap_or_default(),
                reference_columns: row.try_get("reference_columns")?,
                on_delete: referential_action(&row.try_get::<_, String>("on_delete")?),
                on_update: referential_action(&row.try_get::<_, String>("on_update")?),
            },
            _ => continue,
        };
        let constraint = Constraint {
            name: row.try_get("constraint_name")?,
            table_name,
            column_names: row.try_get("column_names")?,
            kind,
            synchronize: true,
        };

        if matches!(constraint.kind, ConstraintKind::PrimaryKey) {
            for column in &mut tables[idx].columns {
                column.primary = constraint.column_names.contains(&column.name);
            }
        }
        tables[idx].constraints.push(constraint);
    }

    for row in conn.query(INDEXES_SQL, &[&schema_name]).await? {
        let table_name: String = row.try_get("table_name")?;
        let Some(&idx) = by_name.get(&table_name) else {
            continue;
        };
        let column_names: Vec<String> = row.try_get("column_names")?;
        let mut index = Index::new(
            &table_name,
            row.try_get::<_, String>("index_name")?,
            column_names,
        );
        index.unique = row.try_get("is_unique")?;
        index.using = Some(row.try_get("method")?);
        index.where_clause = row.try_get("where_clause")?;
        tables[idx].indexes.push(index);
    }

    for row in conn.query(TRIGGERS_SQL, &[&schema_name]).await? {
        let table_name: String = row.try_get("table_name")?;
        let Some(&idx) = by_name.get(&table_name) else {
            continue;
        };
        let bits: i32 = row.try_get("trigger_type")?;
        let definition: String = row.try_get("definition")?;
        tables[idx].triggers.push(Trigger {
            name: row.try_get("trigger_name")?,
            table_name,
            timing: trigger_timing(bits),
            actions: trigger_actions(bits),
            scope: trigger_scope(bits),
            function_name: row.try_get("function_name")?,
            referencing_old_table_as: row.try_get("old_table")?,
            referencing_new_table_as: row.try_get("new_table")?,
            when: trigger_when(&definition),
            synchronize: true,
        });
    }
    schema.tables = tables;

    for row in conn.query(ENUMS_SQL, &[&schema_name]).await? {
        schema.enums.push(Enum {
            name: row.try_get("enum_name")?,
            values: row.try_get("labels")?,
            synchronize: true,
        });
    }

    for row in conn.query(EXTENSIONS_SQL, &[]).await? {
        schema.extensions.push(Extension {
            name: row.try_get("extension_name")?,
            synchronize: true,
        });
    }

    for row in conn.query(FUNCTIONS_SQL, &[&schema_name]).await? {
        schema.functions.push(Function {
            name: row.try_get("function_name")?,
            expression: row.try_get("expression")?,
            synchronize: true,
        });
    }

    for row in conn.query(PARAMETERS_SQL, &[]).await? {
        let setting: String = row.try_get("setting")?;
        if let Some((name, value)) = setting.split_once('=') {
            schema.parameters.push(Parameter {
                name: name.to_string(),
                database_name: database_name.clone(),
                value: value.to_string(),
                scope: ParameterScope::Database,
                synchronize: true,
            });
        }
    }

    Ok(schema)
}

fn referential_action(code: &str) -> ReferentialAction {
    ReferentialAction::from_pg_code(code.trim()).unwrap_or_default()
}

/// `CHECK ((x > 0)) NOT VALID` → `((x > 0))`
fn check_expression(definition: &str) -> String {
    let body = definition.trim();
    let body = body.strip_prefix("CHECK").unwrap_or(body).trim();
    let body = body.strip_suffix("NOT VALID").unwrap_or(body).trim();
    body.to_string()
}

// pg_trigger.tgtype bits
const TRIGGER_TYPE_ROW: i32 = 1 << 0;
const TRIGGER_TYPE_BEFORE: i32 = 1 << 1;
const TRIGGER_TYPE_INSERT: i32 = 1 << 2;
const TRIGGER_TYPE_DELETE: i32 = 1 << 3;
const TRIGGER_TYPE_UPDATE: i32 = 1 << 4;
const TRIGGER_TYPE_TRUNCATE: i32 = 1 << 5;

fn trigger_timing(bits: i32) -> TriggerTiming {
    if bits & TRIGGER_TYPE_BEFORE != 0 {
        TriggerTiming::Before
    } else {
        TriggerTiming::After
    }
}

fn trigger_scope(bits: i32) -> TriggerScope {
    if bits & TRIGGER_TYPE_ROW != 0 {
        TriggerScope::Row
    } else {
        TriggerScope::Statement
    }
}

fn trigger_actions(bits: i32) -> Vec<TriggerAction> {
    [
        (TRIGGER_TYPE_INSERT, TriggerAction::Insert),
        (TRIGGER_TYPE_UPDATE, TriggerAction::Update),
        (TRIGGER_TYPE_DELETE, TriggerAction::Delete),
        (TRIGGER_TYPE_TRUNCATE, TriggerAction::Truncate),
    ]
    .into_iter()
    .filter(|(bit, _)| bits & bit != 0)
    .map(|(_, action)| action)
    .collect()
}

/// The `WHEN` condition of a `pg_get_triggerdef` result, without the
/// parentheses Postgres wraps it in.
fn trigger_when(definition: &str) -> Option<String> {
    let start = definition.find(" WHEN ")? + " WHEN ".len();
    let end = start + definition[start..].find(" EXECUTE ")?;
    let mut condition = definition[start..end].trim();
    while let Some(inner) = condition
        .strip_prefix('(')
        .and_then(|c| c.strip_suffix(')'))
        .filter(|inner| balanced(inner))
    {
        condition = inner.trim();
    }
    Some(condition.to_string())
}

fn balanced(expr: &str) -> bool {
    let mut depth = 0i32;
    for ch in expr.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_expression() {
        assert_eq!(check_expression("CHECK ((\"fileSize\" >= 0))"), "((\"fileSize\" >= 0))");
        assert_eq!(check_expression("CHECK ((x > 0)) NOT VALID"), "((x > 0))");
    }

    #[test]
    fn test_trigger_bits() {
        // BEFORE UPDATE FOR EACH ROW
        let bits = TRIGGER_TYPE_ROW | TRIGGER_TYPE_BEFORE | TRIGGER_TYPE_UPDATE;
        assert_eq!(trigger_timing(bits), TriggerTiming::Before);
        assert_eq!(trigger_scope(bits), TriggerScope::Row);
        assert_eq!(trigger_actions(bits), vec![TriggerAction::Update]);

        // AFTER INSERT OR DELETE FOR EACH STATEMENT
        let bits = TRIGGER_TYPE_INSERT | TRIGGER_TYPE_DELETE;
        assert_eq!(trigger_timing(bits), TriggerTiming::After);
        assert_eq!(trigger_scope(bits), TriggerScope::Statement);
        assert_eq!(
            trigger_actions(bits),
            vec![TriggerAction::Insert, TriggerAction::Delete]
        );
    }

    #[test]
    fn test_trigger_when() {
        let definition = "CREATE TRIGGER asset_updated_at BEFORE UPDATE ON public.asset FOR EACH ROW WHEN ((pg_trigger_depth() = 0)) EXECUTE FUNCTION updated_at()";
        assert_eq!(
            trigger_when(definition).as_deref(),
            Some("pg_trigger_depth() = 0")
        );

        let definition = "CREATE TRIGGER t AFTER DELETE ON public.asset FOR EACH ROW WHEN ((old.a = 1) AND (old.b = 2)) EXECUTE FUNCTION f()";
        assert_eq!(
            trigger_when(definition).as_deref(),
            Some("(old.a = 1) AND (old.b = 2)")
        );

        assert_eq!(
            trigger_when("CREATE TRIGGER t AFTER DELETE ON public.asset FOR EACH ROW EXECUTE FUNCTION f()"),
            None
        );
    }

    #[test]
    fn test_referential_action_codes() {
        assert_eq!(referential_action("c"), ReferentialAction::Cascade);
        assert_eq!(referential_action("n"), ReferentialAction::SetNull);
        assert_eq!(referential_action(" "), ReferentialAction::NoAction);
    }
}
