//! Migration plan verification.
//!
//! The planner orders actions by phase; the solver checks that the result
//! actually works by simulating it against a virtual copy of the live
//! schema. A plan that would touch a missing table, create something twice
//! or drop a table that is still referenced is rejected before any SQL runs.
//!
//! ## Example Problem
//!
//! ```text
//! -- This fails:
//! ALTER TABLE "asset" ADD CONSTRAINT ... REFERENCES "user" ("id");  -- "user" doesn't exist!
//! CREATE TABLE "user" (...);
//!
//! -- This works:
//! CREATE TABLE "user" (...);
//! ALTER TABLE "asset" ADD CONSTRAINT ... REFERENCES "user" ("id");
//! ```

use std::collections::{HashMap, HashSet};

use keel_schema::{Column, Constraint, ConstraintKind, DatabaseSchema};

use crate::action::DiffAction;

/// Error when a migration plan cannot be executed in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    /// A change requires a table that doesn't exist.
    TableNotFound { change: String, table: String },
    /// A change requires a table to NOT exist, but it does.
    TableAlreadyExists { change: String, table: String },
    /// A table is dropped while another table still references it.
    TableStillReferenced {
        change: String,
        table: String,
        referenced_by: String,
    },
    /// A change requires a column that doesn't exist.
    ColumnNotFound {
        change: String,
        table: String,
        column: String,
    },
    /// A change requires a column to NOT exist, but it does.
    ColumnAlreadyExists {
        change: String,
        table: String,
        column: String,
    },
    /// A foreign key references a table that doesn't exist.
    ForeignKeyTargetNotFound {
        change: String,
        source_table: String,
        target_table: String,
    },
    /// A foreign key references columns that don't exist.
    ForeignKeyColumnsNotFound {
        change: String,
        table: String,
        columns: Vec<String>,
    },
    /// A named object (index, constraint, enum, ...) is missing.
    ObjectNotFound {
        change: String,
        kind: &'static str,
        name: String,
    },
    /// A named object (index, constraint, enum, ...) already exists.
    ObjectAlreadyExists {
        change: String,
        kind: &'static str,
        name: String,
    },
    /// An enum is dropped while a column still has it as its type.
    EnumStillInUse {
        change: String,
        name: String,
        table: String,
        column: String,
    },
}

impl std::fmt::Display for SolverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolverError::TableNotFound { change, table } => {
                write!(f, "{}: table '{}' does not exist", change, table)
            }
            SolverError::TableAlreadyExists { change, table } => {
                write!(f, "{}: table '{}' already exists", change, table)
            }
            SolverError::TableStillReferenced {
                change,
                table,
                referenced_by,
            } => {
                write!(
                    f,
                    "{}: table '{}' is still referenced by '{}'",
                    change, table, referenced_by
                )
            }
            SolverError::ColumnNotFound {
                change,
                table,
                column,
            } => {
                write!(f, "{}: column '{}.{}' does not exist", change, table, column)
            }
            SolverError::ColumnAlreadyExists {
                change,
                table,
                column,
            } => {
                write!(f, "{}: column '{}.{}' already exists", change, table, column)
            }
            SolverError::ForeignKeyTargetNotFound {
                change,
                source_table,
                target_table,
            } => {
                write!(
                    f,
                    "{}: foreign key from '{}' references non-existent table '{}'",
                    change, source_table, target_table
                )
            }
            SolverError::ForeignKeyColumnsNotFound {
                change,
                table,
                columns,
            } => {
                write!(
                    f,
                    "{}: foreign key columns {} not found in table '{}'",
                    change,
                    columns.join(", "),
                    table
                )
            }
            SolverError::ObjectNotFound { change, kind, name } => {
                write!(f, "{}: {} '{}' does not exist", change, kind, name)
            }
            SolverError::ObjectAlreadyExists { change, kind, name } => {
                write!(f, "{}: {} '{}' already exists", change, kind, name)
            }
            SolverError::EnumStillInUse {
                change,
                name,
                table,
                column,
            } => {
                write!(
                    f,
                    "{}: enum '{}' is still used by column '{}.{}'",
                    change, name, table, column
                )
            }
        }
    }
}

impl std::error::Error for SolverError {}

#[derive(Debug, Clone)]
struct VirtualConstraint {
    columns: Vec<String>,
    /// Referenced table and columns, for foreign keys.
    reference: Option<(String, Vec<String>)>,
}

impl From<&Constraint> for VirtualConstraint {
    fn from(constraint: &Constraint) -> Self {
        let reference = match &constraint.kind {
            ConstraintKind::ForeignKey {
                reference_table,
                reference_columns,
                ..
            } => Some((reference_table.clone(), reference_columns.clone())),
            _ => None,
        };
        Self {
            columns: constraint.column_names.clone(),
            reference,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct VirtualTable {
    /// Column name to element type name.
    columns: HashMap<String, String>,
    constraints: HashMap<String, VirtualConstraint>,
    triggers: HashSet<String>,
}

#[derive(Debug, Clone)]
struct VirtualIndex {
    table: String,
    columns: Vec<String>,
}

/// Virtual schema state for simulating a migration plan.
#[derive(Debug, Clone, Default)]
pub struct VirtualSchema {
    tables: HashMap<String, VirtualTable>,
    indexes: HashMap<String, VirtualIndex>,
    enums: HashSet<String>,
    extensions: HashSet<String>,
    functions: HashSet<String>,
    parameters: HashSet<String>,
}

impl VirtualSchema {
    /// Initialize from a live schema.
    pub fn from_schema(schema: &DatabaseSchema) -> Self {
        let mut virt = Self::default();
        for table in &schema.tables {
            virt.tables.insert(
                table.name.clone(),
                VirtualTable {
                    columns: column_types(&table.columns),
                    constraints: table
                        .constraints
                        .iter()
                        .map(|c| (c.name.clone(), VirtualConstraint::from(c)))
                        .collect(),
                    triggers: table.triggers.iter().map(|t| t.name.clone()).collect(),
                },
            );
            for index in &table.indexes {
                virt.indexes.insert(
                    index.name.clone(),
                    VirtualIndex {
                        table: table.name.clone(),
                        columns: index.column_names.clone(),
                    },
                );
            }
        }
        virt.enums = schema.enums.iter().map(|e| e.name.clone()).collect();
        virt.extensions = schema.extensions.iter().map(|e| e.name.clone()).collect();
        virt.functions = schema.functions.iter().map(|f| f.name.clone()).collect();
        virt.parameters = schema.parameters.iter().map(|p| p.name.clone()).collect();
        virt
    }

    /// Check if a table exists.
    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Check if a column exists in a table.
    pub fn column_exists(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(table)
            .map(|t| t.columns.contains_key(column))
            .unwrap_or(false)
    }

    /// Some column whose type is `type_name`, as `(table, column)`.
    fn column_of_type(&self, type_name: &str) -> Option<(String, String)> {
        self.tables.iter().find_map(|(table_name, table)| {
            table
                .columns
                .iter()
                .find(|(_, data_type)| *data_type == type_name)
                .map(|(column, _)| (table_name.clone(), column.clone()))
        })
    }

    fn table_mut(&mut self, change: &str, name: &str) -> Result<&mut VirtualTable, SolverError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| SolverError::TableNotFound {
                change: change.to_string(),
                table: name.to_string(),
            })
    }

    fn require_columns(
        &self,
        change: &str,
        table: &str,
        columns: &[String],
    ) -> Result<(), SolverError> {
        if !self.table_exists(table) {
            return Err(SolverError::TableNotFound {
                change: change.to_string(),
                table: table.to_string(),
            });
        }
        for column in columns {
            if !self.column_exists(table, column) {
                return Err(SolverError::ColumnNotFound {
                    change: change.to_string(),
                    table: table.to_string(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }

    /// Apply one action, validating its preconditions.
    pub fn apply(&mut self, action: &DiffAction) -> Result<(), SolverError> {
        let change = action.to_string();

        match action {
            DiffAction::TableCreate { table, .. } => {
                if self.table_exists(&table.name) {
                    return Err(SolverError::TableAlreadyExists {
                        change,
                        table: table.name.clone(),
                    });
                }
                self.tables.insert(
                    table.name.clone(),
                    VirtualTable {
                        columns: column_types(&table.columns),
                        ..Default::default()
                    },
                );
            }
            DiffAction::TableDrop { table_name, .. } => {
                if !self.table_exists(table_name) {
                    return Err(SolverError::TableNotFound {
                        change,
                        table: table_name.clone(),
                    });
                }
                for (other_name, other) in &self.tables {
                    if other_name == table_name {
                        continue;
                    }
                    let referenced = other.constraints.values().any(|c| {
                        c.reference
                            .as_ref()
                            .is_some_and(|(reference_table, _)| reference_table == table_name)
                    });
                    if referenced {
                        return Err(SolverError::TableStillReferenced {
                            change,
                            table: table_name.clone(),
                            referenced_by: other_name.clone(),
                        });
                    }
                }
                self.tables.remove(table_name);
                self.indexes.retain(|_, index| index.table != *table_name);
            }
            DiffAction::ColumnCreate { column, .. } => {
                let table = self.table_mut(&change, &column.table_name)?;
                if table.columns.contains_key(&column.name) {
                    return Err(SolverError::ColumnAlreadyExists {
                        change,
                        table: column.table_name.clone(),
                        column: column.name.clone(),
                    });
                }
                table
                    .columns
                    .insert(column.name.clone(), column.data_type.clone());
            }
            DiffAction::ColumnDrop {
                table_name,
                column_name,
                ..
            } => {
                let table = self.table_mut(&change, table_name)?;
                if table.columns.remove(column_name).is_none() {
                    return Err(SolverError::ColumnNotFound {
                        change,
                        table: table_name.clone(),
                        column: column_name.clone(),
                    });
                }
                // Postgres drops indexes and constraints that use the column
                table
                    .constraints
                    .retain(|_, c| !c.columns.contains(column_name));
                self.indexes.retain(|_, index| {
                    index.table != *table_name || !index.columns.contains(column_name)
                });
            }
            DiffAction::ColumnAlter {
                table_name,
                column_name,
                ..
            } => {
                self.require_columns(&change, table_name, std::slice::from_ref(column_name))?;
            }
            DiffAction::ConstraintCreate { constraint, .. } => {
                self.require_columns(&change, &constraint.table_name, &constraint.column_names)?;
                let virt = VirtualConstraint::from(constraint);
                if let Some((reference_table, reference_columns)) = &virt.reference {
                    if !self.table_exists(reference_table) {
                        return Err(SolverError::ForeignKeyTargetNotFound {
                            change,
                            source_table: constraint.table_name.clone(),
                            target_table: reference_table.clone(),
                        });
                    }
                    let missing: Vec<String> = reference_columns
                        .iter()
                        .filter(|c| !self.column_exists(reference_table, c))
                        .cloned()
                        .collect();
                    if !missing.is_empty() {
                        return Err(SolverError::ForeignKeyColumnsNotFound {
                            change,
                            table: reference_table.clone(),
                            columns: missing,
                        });
                    }
                }
                let table = self.table_mut(&change, &constraint.table_name)?;
                if table.constraints.contains_key(&constraint.name) {
                    return Err(SolverError::ObjectAlreadyExists {
                        change,
                        kind: "constraint",
                        name: constraint.name.clone(),
                    });
                }
                table.constraints.insert(constraint.name.clone(), virt);
            }
            DiffAction::ConstraintDrop {
                table_name,
                constraint_name,
                ..
            } => {
                let table = self.table_mut(&change, table_name)?;
                if table.constraints.remove(constraint_name).is_none() {
                    return Err(SolverError::ObjectNotFound {
                        change,
                        kind: "constraint",
                        name: constraint_name.clone(),
                    });
                }
            }
            DiffAction::IndexCreate { index, .. } => {
                self.require_columns(&change, &index.table_name, &index.column_names)?;
                if self.indexes.contains_key(&index.name) {
                    return Err(SolverError::ObjectAlreadyExists {
                        change,
                        kind: "index",
                        name: index.name.clone(),
                    });
                }
                self.indexes.insert(
                    index.name.clone(),
                    VirtualIndex {
                        table: index.table_name.clone(),
                        columns: index.column_names.clone(),
                    },
                );
            }
            DiffAction::IndexDrop { index_name, .. } => {
                if self.indexes.remove(index_name).is_none() {
                    return Err(SolverError::ObjectNotFound {
                        change,
                        kind: "index",
                        name: index_name.clone(),
                    });
                }
            }
            DiffAction::TriggerCreate { trigger, .. } => {
                let table = self.table_mut(&change, &trigger.table_name)?;
                if !table.triggers.insert(trigger.name.clone()) {
                    return Err(SolverError::ObjectAlreadyExists {
                        change,
                        kind: "trigger",
                        name: trigger.name.clone(),
                    });
                }
            }
            DiffAction::TriggerDrop {
                table_name,
                trigger_name,
                ..
            } => {
                let table = self.table_mut(&change, table_name)?;
                if !table.triggers.remove(trigger_name) {
                    return Err(SolverError::ObjectNotFound {
                        change,
                        kind: "trigger",
                        name: trigger_name.clone(),
                    });
                }
            }
            DiffAction::EnumCreate { r#enum, .. } => {
                if !self.enums.insert(r#enum.name.clone()) {
                    return Err(SolverError::ObjectAlreadyExists {
                        change,
                        kind: "enum",
                        name: r#enum.name.clone(),
                    });
                }
            }
            DiffAction::EnumDrop { enum_name, .. } => {
                if let Some((table, column)) = self.column_of_type(enum_name) {
                    return Err(SolverError::EnumStillInUse {
                        change,
                        name: enum_name.clone(),
                        table,
                        column,
                    });
                }
                remove_named(&mut self.enums, change, "enum", enum_name)?;
            }
            DiffAction::EnumAddValue { enum_name, .. } => {
                if !self.enums.contains(enum_name) {
                    return Err(SolverError::ObjectNotFound {
                        change,
                        kind: "enum",
                        name: enum_name.clone(),
                    });
                }
            }
            // IF NOT EXISTS / OR REPLACE / SET are idempotent
            DiffAction::ExtensionCreate { extension, .. } => {
                self.extensions.insert(extension.name.clone());
            }
            DiffAction::FunctionCreate { function, .. } => {
                self.functions.insert(function.name.clone());
            }
            DiffAction::ParameterCreate { parameter, .. } => {
                self.parameters.insert(parameter.name.clone());
            }
            DiffAction::ExtensionDrop { extension_name, .. } => {
                remove_named(&mut self.extensions, change, "extension", extension_name)?;
            }
            DiffAction::FunctionDrop { function_name, .. } => {
                remove_named(&mut self.functions, change, "function", function_name)?;
            }
            DiffAction::ParameterDrop { parameter_name, .. } => {
                remove_named(&mut self.parameters, change, "parameter", parameter_name)?;
            }
        }

        Ok(())
    }
}

fn column_types(columns: &[Column]) -> HashMap<String, String> {
    columns
        .iter()
        .map(|c| (c.name.clone(), c.data_type.clone()))
        .collect()
}

fn remove_named(
    set: &mut HashSet<String>,
    change: String,
    kind: &'static str,
    name: &str,
) -> Result<(), SolverError> {
    if set.remove(name) {
        Ok(())
    } else {
        Err(SolverError::ObjectNotFound {
            change,
            kind,
            name: name.to_string(),
        })
    }
}

/// Simulate `actions` in order against `live`, failing on the first action
/// whose preconditions do not hold.
pub fn verify_order(live: &DatabaseSchema, actions: &[DiffAction]) -> Result<(), SolverError> {
    let mut virt = VirtualSchema::from_schema(live);
    for action in actions {
        virt.apply(action)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Reason;
    use keel_schema::{Enum, Index, ReferentialAction, Table};

    fn make_table(name: &str, columns: &[&str]) -> Table {
        let mut table = Table::new(name);
        table.columns = columns
            .iter()
            .map(|c| Column::new(name, *c, "uuid"))
            .collect();
        table
    }

    fn make_fk(table: &str, column: &str, reference_table: &str) -> Constraint {
        Constraint {
            name: format!("FK_{}_{}", table, column),
            table_name: table.to_string(),
            column_names: vec![column.to_string()],
            kind: ConstraintKind::ForeignKey {
                reference_table: reference_table.to_string(),
                reference_columns: vec!["id".to_string()],
                on_delete: ReferentialAction::NoAction,
                on_update: ReferentialAction::NoAction,
            },
            synchronize: true,
        }
    }

    fn create_table(table: Table) -> DiffAction {
        DiffAction::TableCreate {
            table,
            reason: Reason::MissingInTarget,
        }
    }

    fn create_constraint(constraint: Constraint) -> DiffAction {
        DiffAction::ConstraintCreate {
            constraint,
            reason: Reason::MissingInTarget,
        }
    }

    #[test]
    fn test_foreign_key_before_target_table_fails() {
        let live = DatabaseSchema::default();
        let actions = vec![
            create_table(make_table("asset", &["id", "ownerId"])),
            create_constraint(make_fk("asset", "ownerId", "user")),
            create_table(make_table("user", &["id"])),
        ];

        let err = verify_order(&live, &actions).unwrap_err();
        assert!(matches!(
            err,
            SolverError::ForeignKeyTargetNotFound { ref target_table, .. } if target_table == "user"
        ));
        assert!(err.to_string().contains("references non-existent table 'user'"));
    }

    #[test]
    fn test_correct_order_passes() {
        let live = DatabaseSchema::default();
        let actions = vec![
            create_table(make_table("asset", &["id", "ownerId"])),
            create_table(make_table("user", &["id"])),
            create_constraint(make_fk("asset", "ownerId", "user")),
        ];
        assert!(verify_order(&live, &actions).is_ok());
    }

    #[test]
    fn test_dropping_referenced_table_fails() {
        let mut asset = make_table("asset", &["id", "ownerId"]);
        asset.constraints.push(make_fk("asset", "ownerId", "user"));
        let mut live = DatabaseSchema::default();
        live.tables = vec![asset, make_table("user", &["id"])];

        let drop_user = DiffAction::TableDrop {
            table_name: "user".to_string(),
            reason: Reason::MissingInSource,
        };
        let err = verify_order(&live, std::slice::from_ref(&drop_user)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "- table user: table 'user' is still referenced by 'asset'"
        );

        let drop_fk = DiffAction::ConstraintDrop {
            table_name: "asset".to_string(),
            constraint_name: "FK_asset_ownerId".to_string(),
            foreign_key: true,
            reason: Reason::MissingInSource,
        };
        assert!(verify_order(&live, &[drop_fk, drop_user]).is_ok());
    }

    #[test]
    fn test_column_drop_takes_its_indexes() {
        let mut asset = make_table("asset", &["id", "checksum"]);
        asset
            .indexes
            .push(Index::new("asset", "IDX_checksum", ["checksum"]));
        let mut live = DatabaseSchema::default();
        live.tables = vec![asset];

        let actions = vec![
            DiffAction::ColumnDrop {
                table_name: "asset".to_string(),
                column_name: "checksum".to_string(),
                reason: Reason::MissingInSource,
            },
            DiffAction::IndexDrop {
                index_name: "IDX_checksum".to_string(),
                reason: Reason::MissingInSource,
            },
        ];
        let err = verify_order(&live, &actions).unwrap_err();
        assert!(matches!(err, SolverError::ObjectNotFound { kind: "index", .. }));
    }

    #[test]
    fn test_duplicate_column_fails() {
        let mut live = DatabaseSchema::default();
        live.tables = vec![make_table("asset", &["id"])];

        let add = DiffAction::ColumnCreate {
            column: Column::new("asset", "id", "uuid"),
            reason: Reason::MissingInTarget,
        };
        assert!(matches!(
            verify_order(&live, &[add]),
            Err(SolverError::ColumnAlreadyExists { .. })
        ));
    }

    #[test]
    fn test_dropping_enum_used_by_column_fails() {
        let mut asset = make_table("asset", &["id"]);
        asset
            .columns
            .push(Column::new("asset", "visibility", "asset_visibility_enum"));
        let mut live = DatabaseSchema::default();
        live.tables = vec![asset];
        live.enums.push(Enum {
            name: "asset_visibility_enum".to_string(),
            values: vec!["timeline".to_string(), "hidden".to_string()],
            synchronize: true,
        });

        let drop_enum = DiffAction::EnumDrop {
            enum_name: "asset_visibility_enum".to_string(),
            reason: Reason::Changed("enum values are different".to_string()),
        };
        let err = verify_order(&live, std::slice::from_ref(&drop_enum)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "- enum asset_visibility_enum: enum 'asset_visibility_enum' is still used by column 'asset.visibility'"
        );

        let drop_column = DiffAction::ColumnDrop {
            table_name: "asset".to_string(),
            column_name: "visibility".to_string(),
            reason: Reason::Changed("enum asset_visibility_enum is recreated".to_string()),
        };
        assert!(verify_order(&live, &[drop_column, drop_enum]).is_ok());
    }

    #[test]
    fn test_adding_value_to_missing_enum_fails() {
        let add = DiffAction::EnumAddValue {
            enum_name: "asset_visibility_enum".to_string(),
            value: "locked".to_string(),
            reason: Reason::Changed("enum values are different".to_string()),
        };
        assert!(matches!(
            verify_order(&DatabaseSchema::default(), &[add]),
            Err(SolverError::ObjectNotFound { kind: "enum", .. })
        ));
    }
}
