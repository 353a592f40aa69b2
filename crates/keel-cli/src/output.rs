//! Terminal rendering for diffs and schemas.

use keel::{ConstraintKind, DatabaseSchema, DiffAction, SchemaDiff};
use owo_colors::OwoColorize;

pub fn print_diff(diff: &SchemaDiff) {
    if diff.is_empty() {
        println!("{}", "No changes detected.".green());
        return;
    }

    println!("{} ({} changes)", "Schema diff".bold(), diff.len());
    println!();
    for action in &diff.items {
        let line = action.to_string();
        let reason = format!("({})", action.reason());
        if action.is_drop() {
            println!("  {} {}", line.red(), reason.dimmed());
        } else if matches!(
            action,
            DiffAction::ColumnAlter { .. } | DiffAction::EnumAddValue { .. }
        ) {
            println!("  {} {}", line.yellow(), reason.dimmed());
        } else {
            println!("  {} {}", line.green(), reason.dimmed());
        }
    }
}

pub fn print_schema(schema: &DatabaseSchema) {
    if schema.tables.is_empty() {
        println!("No tables in schema {}.", schema.schema_name);
        return;
    }

    println!(
        "{} {}.{} ({} tables)",
        "Schema".bold(),
        schema.database_name,
        schema.schema_name,
        schema.tables.len()
    );
    println!();

    for table in &schema.tables {
        println!("  {}", table.name.bold());
        for col in &table.columns {
            let mut attrs = Vec::new();
            if col.primary {
                attrs.push("PK".to_string());
            }
            if !col.nullable {
                attrs.push("NOT NULL".to_string());
            }
            if let Some(default) = &col.default {
                attrs.push(format!("DEFAULT {}", default));
            }

            let attrs_str = if attrs.is_empty() {
                String::new()
            } else {
                format!(" [{}]", attrs.join(", "))
            };
            println!("    {}: {}{}", col.name, col.type_sql().cyan(), attrs_str.dimmed());
        }

        for constraint in &table.constraints {
            match &constraint.kind {
                ConstraintKind::ForeignKey {
                    reference_table,
                    reference_columns,
                    ..
                } => println!(
                    "    FK {}: {} -> {}.{}",
                    constraint.name.dimmed(),
                    constraint.column_names.join(", "),
                    reference_table,
                    reference_columns.join(", ")
                ),
                ConstraintKind::Check { expression } => {
                    println!("    CHECK {}: {}", constraint.name.dimmed(), expression)
                }
                kind => println!(
                    "    {} {}: {}",
                    kind.label().to_uppercase(),
                    constraint.name.dimmed(),
                    constraint.column_names.join(", ")
                ),
            }
        }

        for index in &table.indexes {
            let unique = if index.unique { "UNIQUE " } else { "" };
            println!(
                "    {}INDEX {}: {}",
                unique,
                index.name.dimmed(),
                index.column_names.join(", ")
            );
        }

        for trigger in &table.triggers {
            println!(
                "    TRIGGER {}: {} -> {}()",
                trigger.name.dimmed(),
                trigger.timing,
                trigger.function_name
            );
        }
        println!();
    }

    for e in &schema.enums {
        println!("  enum {} ({})", e.name.bold(), e.values.join(", "));
    }
    for extension in &schema.extensions {
        println!("  extension {}", extension.name.bold());
    }
}
