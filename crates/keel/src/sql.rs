//! DDL rendering for migration actions.

use keel_schema::{
    Column, Constraint, ConstraintKind, Index, Lit, Parameter, ParameterScope, Table, Trigger,
    quote_ident, quote_idents,
};

use crate::action::DiffAction;

impl DiffAction {
    /// The SQL statements that carry out this action, in order.
    pub fn to_sql(&self) -> Vec<String> {
        match self {
            DiffAction::ExtensionCreate { extension, .. } => vec![format!(
                "CREATE EXTENSION IF NOT EXISTS {} CASCADE;",
                quote_ident(&extension.name)
            )],
            DiffAction::ExtensionDrop { extension_name, .. } => {
                vec![format!("DROP EXTENSION {};", quote_ident(extension_name))]
            }
            DiffAction::ParameterCreate { parameter, .. } => vec![set_parameter_sql(parameter)],
            DiffAction::ParameterDrop {
                database_name,
                parameter_name,
                scope,
                ..
            } => vec![match scope {
                ParameterScope::Database => format!(
                    "ALTER DATABASE {} RESET {};",
                    quote_ident(database_name),
                    parameter_name
                ),
                ParameterScope::User => format!("RESET {};", parameter_name),
            }],
            DiffAction::EnumCreate { r#enum, .. } => {
                let values: Vec<String> = r#enum.values.iter().map(|v| Lit(v).to_string()).collect();
                vec![format!(
                    "CREATE TYPE {} AS ENUM ({});",
                    quote_ident(&r#enum.name),
                    values.join(", ")
                )]
            }
            DiffAction::EnumDrop { enum_name, .. } => {
                vec![format!("DROP TYPE {};", quote_ident(enum_name))]
            }
            DiffAction::EnumAddValue {
                enum_name, value, ..
            } => vec![format!(
                "ALTER TYPE {} ADD VALUE IF NOT EXISTS {};",
                quote_ident(enum_name),
                Lit(value)
            )],
            DiffAction::FunctionCreate { function, .. } => {
                let expression = function.expression.trim_end();
                if expression.ends_with(';') {
                    vec![expression.to_string()]
                } else {
                    vec![format!("{};", expression)]
                }
            }
            DiffAction::FunctionDrop { function_name, .. } => {
                vec![format!("DROP FUNCTION {};", function_name)]
            }
            DiffAction::TableCreate { table, .. } => create_table_sql(table),
            DiffAction::TableDrop { table_name, .. } => {
                vec![format!("DROP TABLE {};", quote_ident(table_name))]
            }
            DiffAction::ColumnCreate { column, .. } => {
                let mut sql = vec![format!(
                    "ALTER TABLE {} ADD {};",
                    quote_ident(&column.table_name),
                    column_definition(column)
                )];
                sql.extend(column_comment_sql(column, column.comment.as_deref()));
                sql
            }
            DiffAction::ColumnDrop {
                table_name,
                column_name,
                ..
            } => vec![format!(
                "ALTER TABLE {} DROP COLUMN {};",
                quote_ident(table_name),
                quote_ident(column_name)
            )],
            DiffAction::ColumnAlter {
                table_name,
                column_name,
                changes,
                ..
            } => {
                let prefix = format!(
                    "ALTER TABLE {} ALTER COLUMN {}",
                    quote_ident(table_name),
                    quote_ident(column_name)
                );
                let mut sql = Vec::new();
                if let Some(nullable) = changes.nullable {
                    if nullable {
                        sql.push(format!("{} DROP NOT NULL;", prefix));
                    } else {
                        sql.push(format!("{} SET NOT NULL;", prefix));
                    }
                }
                match &changes.default {
                    Some(Some(default)) => sql.push(format!("{} SET DEFAULT {};", prefix, default)),
                    Some(None) => sql.push(format!("{} DROP DEFAULT;", prefix)),
                    None => {}
                }
                if let Some(comment) = &changes.comment {
                    sql.push(comment_sql(table_name, column_name, comment.as_deref()));
                }
                sql
            }
            DiffAction::ConstraintCreate { constraint, .. } => {
                vec![add_constraint_sql(constraint)]
            }
            DiffAction::ConstraintDrop {
                table_name,
                constraint_name,
                ..
            } => vec![format!(
                "ALTER TABLE {} DROP CONSTRAINT {};",
                quote_ident(table_name),
                quote_ident(constraint_name)
            )],
            DiffAction::IndexCreate { index, .. } => vec![create_index_sql(index)],
            DiffAction::IndexDrop { index_name, .. } => {
                vec![format!("DROP INDEX {};", quote_ident(index_name))]
            }
            DiffAction::TriggerCreate { trigger, .. } => vec![create_trigger_sql(trigger)],
            DiffAction::TriggerDrop {
                table_name,
                trigger_name,
                ..
            } => vec![format!(
                "DROP TRIGGER {} ON {};",
                quote_ident(trigger_name),
                quote_ident(table_name)
            )],
        }
    }
}

fn column_definition(column: &Column) -> String {
    let mut sql = format!("{} {}", quote_ident(&column.name), column.type_sql());
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    }
    sql
}

fn column_comment_sql(column: &Column, comment: Option<&str>) -> Option<String> {
    comment.map(|c| comment_sql(&column.table_name, &column.name, Some(c)))
}

fn comment_sql(table: &str, column: &str, comment: Option<&str>) -> String {
    let value = comment
        .map(|c| Lit(c).to_string())
        .unwrap_or_else(|| "NULL".to_string());
    format!(
        "COMMENT ON COLUMN {}.{} IS {};",
        quote_ident(table),
        quote_ident(column),
        value
    )
}

/// `CREATE TABLE` with columns only; constraints and indexes are separate actions.
fn create_table_sql(table: &Table) -> Vec<String> {
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("  {}", column_definition(c)))
        .collect();
    let mut sql = vec![format!(
        "CREATE TABLE {} (\n{}\n);",
        quote_ident(&table.name),
        columns.join(",\n")
    )];
    sql.extend(
        table
            .columns
            .iter()
            .filter_map(|c| column_comment_sql(c, c.comment.as_deref())),
    );
    sql
}

fn add_constraint_sql(constraint: &Constraint) -> String {
    let body = match &constraint.kind {
        ConstraintKind::PrimaryKey => {
            format!("PRIMARY KEY ({})", quote_idents(&constraint.column_names))
        }
        ConstraintKind::Unique => format!("UNIQUE ({})", quote_idents(&constraint.column_names)),
        ConstraintKind::Check { expression } => format!("CHECK ({})", expression),
        ConstraintKind::ForeignKey {
            reference_table,
            reference_columns,
            on_delete,
            on_update,
        } => format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
            quote_idents(&constraint.column_names),
            quote_ident(reference_table),
            quote_idents(reference_columns),
            on_update.to_sql(),
            on_delete.to_sql()
        ),
    };
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} {};",
        quote_ident(&constraint.table_name),
        quote_ident(&constraint.name),
        body
    )
}

fn create_index_sql(index: &Index) -> String {
    let unique = if index.unique { "UNIQUE " } else { "" };
    let using = index
        .using
        .as_deref()
        .map(|m| format!("USING {} ", m))
        .unwrap_or_default();
    let predicate = index
        .where_clause
        .as_deref()
        .map(|w| format!(" WHERE {}", w))
        .unwrap_or_default();
    format!(
        "CREATE {}INDEX {} ON {} {}({}){};",
        unique,
        quote_ident(&index.name),
        quote_ident(&index.table_name),
        using,
        quote_idents(&index.column_names),
        predicate
    )
}

fn create_trigger_sql(trigger: &Trigger) -> String {
    let actions: Vec<String> = trigger.actions.iter().map(|a| a.to_string()).collect();
    let mut sql = format!(
        "CREATE OR REPLACE TRIGGER {}\n  {} {} ON {}",
        quote_ident(&trigger.name),
        trigger.timing,
        actions.join(" OR "),
        quote_ident(&trigger.table_name)
    );

    let mut referencing = Vec::new();
    if let Some(old) = &trigger.referencing_old_table_as {
        referencing.push(format!("OLD TABLE AS {}", quote_ident(old)));
    }
    if let Some(new) = &trigger.referencing_new_table_as {
        referencing.push(format!("NEW TABLE AS {}", quote_ident(new)));
    }
    if !referencing.is_empty() {
        sql.push_str(&format!("\n  REFERENCING {}", referencing.join(" ")));
    }

    sql.push_str(&format!("\n  FOR EACH {}", trigger.scope));
    if let Some(when) = &trigger.when {
        sql.push_str(&format!("\n  WHEN ({})", when));
    }
    sql.push_str(&format!("\n  EXECUTE FUNCTION {}();", trigger.function_name));
    sql
}

fn set_parameter_sql(parameter: &Parameter) -> String {
    match parameter.scope {
        ParameterScope::Database => format!(
            "ALTER DATABASE {} SET {} TO {};",
            quote_ident(&parameter.database_name),
            parameter.name,
            parameter.value
        ),
        ParameterScope::User => format!("SET {} TO {};", parameter.name, parameter.value),
    }
}
