//! The atomic steps of a migration plan.

use std::fmt;

use keel_schema::{
    Column, Constraint, Enum, Extension, Function, Index, Parameter, ParameterScope, Table,
    Trigger,
};

/// Why an action was planned.
///
/// "Source" is the desired schema declared by the application, "target" is
/// the live database being reconciled towards it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// The entity exists in the database but is not declared.
    MissingInSource,
    /// The entity is declared but does not exist in the database.
    MissingInTarget,
    /// The entity exists on both sides but its shape differs.
    Changed(String),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::MissingInSource => f.write_str("missing in source"),
            Reason::MissingInTarget => f.write_str("missing in target"),
            Reason::Changed(text) => f.write_str(text),
        }
    }
}

/// In-place column modifications that do not require recreating the column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnChanges {
    /// New nullability, when it changed.
    pub nullable: Option<bool>,
    /// New default; `Some(None)` drops the default.
    pub default: Option<Option<String>>,
    /// New comment; `Some(None)` clears the comment.
    pub comment: Option<Option<String>>,
}

impl ColumnChanges {
    pub fn is_empty(&self) -> bool {
        self.nullable.is_none() && self.default.is_none() && self.comment.is_none()
    }
}

/// A single step of a migration plan.
///
/// Creates carry the full declared entity; drops carry only what is needed
/// to name the entity in SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffAction {
    ExtensionCreate {
        extension: Extension,
        reason: Reason,
    },
    ExtensionDrop {
        extension_name: String,
        reason: Reason,
    },
    ParameterCreate {
        parameter: Parameter,
        reason: Reason,
    },
    ParameterDrop {
        database_name: String,
        parameter_name: String,
        scope: ParameterScope,
        reason: Reason,
    },
    EnumCreate {
        r#enum: Enum,
        reason: Reason,
    },
    EnumDrop {
        enum_name: String,
        reason: Reason,
    },
    /// Append a value to an existing enum without recreating the type.
    EnumAddValue {
        enum_name: String,
        value: String,
        reason: Reason,
    },
    FunctionCreate {
        function: Function,
        reason: Reason,
    },
    FunctionDrop {
        function_name: String,
        reason: Reason,
    },
    TableCreate {
        table: Table,
        reason: Reason,
    },
    TableDrop {
        table_name: String,
        reason: Reason,
    },
    ColumnCreate {
        column: Column,
        reason: Reason,
    },
    ColumnDrop {
        table_name: String,
        column_name: String,
        reason: Reason,
    },
    ColumnAlter {
        table_name: String,
        column_name: String,
        changes: ColumnChanges,
        reason: Reason,
    },
    ConstraintCreate {
        constraint: Constraint,
        reason: Reason,
    },
    ConstraintDrop {
        table_name: String,
        constraint_name: String,
        foreign_key: bool,
        reason: Reason,
    },
    IndexCreate {
        index: Index,
        reason: Reason,
    },
    IndexDrop {
        index_name: String,
        reason: Reason,
    },
    TriggerCreate {
        trigger: Trigger,
        reason: Reason,
    },
    TriggerDrop {
        table_name: String,
        trigger_name: String,
        reason: Reason,
    },
}

impl DiffAction {
    pub fn reason(&self) -> &Reason {
        match self {
            DiffAction::ExtensionCreate { reason, .. }
            | DiffAction::ExtensionDrop { reason, .. }
            | DiffAction::ParameterCreate { reason, .. }
            | DiffAction::ParameterDrop { reason, .. }
            | DiffAction::EnumCreate { reason, .. }
            | DiffAction::EnumDrop { reason, .. }
            | DiffAction::EnumAddValue { reason, .. }
            | DiffAction::FunctionCreate { reason, .. }
            | DiffAction::FunctionDrop { reason, .. }
            | DiffAction::TableCreate { reason, .. }
            | DiffAction::TableDrop { reason, .. }
            | DiffAction::ColumnCreate { reason, .. }
            | DiffAction::ColumnDrop { reason, .. }
            | DiffAction::ColumnAlter { reason, .. }
            | DiffAction::ConstraintCreate { reason, .. }
            | DiffAction::ConstraintDrop { reason, .. }
            | DiffAction::IndexCreate { reason, .. }
            | DiffAction::IndexDrop { reason, .. }
            | DiffAction::TriggerCreate { reason, .. }
            | DiffAction::TriggerDrop { reason, .. } => reason,
        }
    }

    /// The action's type name, e.g. `IndexCreate`.
    pub fn name(&self) -> &'static str {
        match self {
            DiffAction::ExtensionCreate { .. } => "ExtensionCreate",
            DiffAction::ExtensionDrop { .. } => "ExtensionDrop",
            DiffAction::ParameterCreate { .. } => "ParameterCreate",
            DiffAction::ParameterDrop { .. } => "ParameterDrop",
            DiffAction::EnumCreate { .. } => "EnumCreate",
            DiffAction::EnumDrop { .. } => "EnumDrop",
            DiffAction::EnumAddValue { .. } => "EnumAddValue",
            DiffAction::FunctionCreate { .. } => "FunctionCreate",
            DiffAction::FunctionDrop { .. } => "FunctionDrop",
            DiffAction::TableCreate { .. } => "TableCreate",
            DiffAction::TableDrop { .. } => "TableDrop",
            DiffAction::ColumnCreate { .. } => "ColumnCreate",
            DiffAction::ColumnDrop { .. } => "ColumnDrop",
            DiffAction::ColumnAlter { .. } => "ColumnAlter",
            DiffAction::ConstraintCreate { .. } => "ConstraintCreate",
            DiffAction::ConstraintDrop { .. } => "ConstraintDrop",
            DiffAction::IndexCreate { .. } => "IndexCreate",
            DiffAction::IndexDrop { .. } => "IndexDrop",
            DiffAction::TriggerCreate { .. } => "TriggerCreate",
            DiffAction::TriggerDrop { .. } => "TriggerDrop",
        }
    }

    pub fn is_drop(&self) -> bool {
        self.phase() < Self::ALTER_PHASE
    }

    const ALTER_PHASE: u8 = 10;

    /// Position of this action in a dependency-safe plan.
    ///
    /// Dependents are dropped before what they depend on and dependencies
    /// are created before their dependents. Foreign keys go first among
    /// constraint drops and last among constraint creates because they
    /// reference other tables' primary and unique keys.
    pub(crate) fn phase(&self) -> u8 {
        match self {
            DiffAction::TriggerDrop { .. } => 0,
            DiffAction::ConstraintDrop {
                foreign_key: true, ..
            } => 1,
            DiffAction::ConstraintDrop { .. } => 2,
            DiffAction::IndexDrop { .. } => 3,
            DiffAction::ColumnDrop { .. } => 4,
            DiffAction::TableDrop { .. } => 5,
            DiffAction::FunctionDrop { .. } => 6,
            DiffAction::EnumDrop { .. } => 7,
            DiffAction::ParameterDrop { .. } => 8,
            DiffAction::ExtensionDrop { .. } => 9,
            DiffAction::ColumnAlter { .. } => Self::ALTER_PHASE,
            DiffAction::ExtensionCreate { .. } => 11,
            DiffAction::ParameterCreate { .. } => 12,
            DiffAction::EnumCreate { .. } | DiffAction::EnumAddValue { .. } => 13,
            DiffAction::FunctionCreate { .. } => 14,
            DiffAction::TableCreate { .. } => 15,
            DiffAction::ColumnCreate { .. } => 16,
            DiffAction::ConstraintCreate { constraint, .. } if constraint.is_foreign_key() => 18,
            DiffAction::ConstraintCreate { .. } => 17,
            DiffAction::IndexCreate { .. } => 19,
            DiffAction::TriggerCreate { .. } => 20,
        }
    }
}

impl fmt::Display for DiffAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffAction::ExtensionCreate { extension, .. } => {
                write!(f, "+ extension {}", extension.name)
            }
            DiffAction::ExtensionDrop { extension_name, .. } => {
                write!(f, "- extension {}", extension_name)
            }
            DiffAction::ParameterCreate { parameter, .. } => {
                write!(f, "+ parameter {} = {}", parameter.name, parameter.value)
            }
            DiffAction::ParameterDrop { parameter_name, .. } => {
                write!(f, "- parameter {}", parameter_name)
            }
            DiffAction::EnumCreate { r#enum, .. } => {
                write!(f, "+ enum {} ({})", r#enum.name, r#enum.values.join(", "))
            }
            DiffAction::EnumDrop { enum_name, .. } => write!(f, "- enum {}", enum_name),
            DiffAction::EnumAddValue {
                enum_name, value, ..
            } => write!(f, "~ enum {} + {}", enum_name, value),
            DiffAction::FunctionCreate { function, .. } => {
                write!(f, "+ function {}", function.name)
            }
            DiffAction::FunctionDrop { function_name, .. } => {
                write!(f, "- function {}", function_name)
            }
            DiffAction::TableCreate { table, .. } => write!(f, "+ table {}", table.name),
            DiffAction::TableDrop { table_name, .. } => write!(f, "- table {}", table_name),
            DiffAction::ColumnCreate { column, .. } => {
                let nullable = if column.nullable { " (nullable)" } else { "" };
                write!(
                    f,
                    "+ {}.{}: {}{}",
                    column.table_name,
                    column.name,
                    column.type_sql(),
                    nullable
                )
            }
            DiffAction::ColumnDrop {
                table_name,
                column_name,
                ..
            } => write!(f, "- {}.{}", table_name, column_name),
            DiffAction::ColumnAlter {
                table_name,
                column_name,
                changes,
                ..
            } => {
                write!(f, "~ {}.{}", table_name, column_name)?;
                if let Some(nullable) = changes.nullable {
                    let to = if nullable { "nullable" } else { "not null" };
                    write!(f, " {}", to)?;
                }
                if let Some(default) = &changes.default {
                    write!(f, " default {}", default.as_deref().unwrap_or("(none)"))?;
                }
                if changes.comment.is_some() {
                    write!(f, " comment")?;
                }
                Ok(())
            }
            DiffAction::ConstraintCreate { constraint, .. } => write!(
                f,
                "+ {} {} on {} ({})",
                constraint.kind.label(),
                constraint.name,
                constraint.table_name,
                constraint.column_names.join(", ")
            ),
            DiffAction::ConstraintDrop {
                table_name,
                constraint_name,
                ..
            } => write!(f, "- constraint {} on {}", constraint_name, table_name),
            DiffAction::IndexCreate { index, .. } => {
                let unique = if index.unique { "unique " } else { "" };
                write!(
                    f,
                    "+ {}index {} on {} ({})",
                    unique,
                    index.name,
                    index.table_name,
                    index.column_names.join(", ")
                )
            }
            DiffAction::IndexDrop { index_name, .. } => write!(f, "- index {}", index_name),
            DiffAction::TriggerCreate { trigger, .. } => write!(
                f,
                "+ trigger {} on {} -> {}()",
                trigger.name, trigger.table_name, trigger.function_name
            ),
            DiffAction::TriggerDrop {
                table_name,
                trigger_name,
                ..
            } => write!(f, "- trigger {} on {}", trigger_name, table_name),
        }
    }
}
