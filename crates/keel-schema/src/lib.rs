//! Database schema types for keel.
//!
//! This crate contains the schema model shared by the builder (target
//! schema), the introspector (live schema) and the differ. A
//! [`DatabaseSchema`] is built once per reconciliation pass and never
//! mutated afterwards.

use std::fmt;

mod naming;
pub use naming::*;

/// The kinds of entity the differ knows how to reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Table,
    Column,
    Index,
    Constraint,
    Enum,
    Extension,
    Function,
    Trigger,
    Parameter,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Table => "table",
            EntityKind::Column => "column",
            EntityKind::Index => "index",
            EntityKind::Constraint => "constraint",
            EntityKind::Enum => "enum",
            EntityKind::Extension => "extension",
            EntityKind::Function => "function",
            EntityKind::Trigger => "trigger",
            EntityKind::Parameter => "parameter",
        };
        f.write_str(name)
    }
}

/// Anything the differ can match between two schemas.
///
/// The identity key is what pairs a target entity with a live one; two
/// entities with the same key are "the same thing" even if their shape
/// differs.
pub trait Entity {
    const KIND: EntityKind;

    /// Identity key, unique within the entity's scope.
    fn key(&self) -> String;

    /// Whether the differ may touch this entity at all.
    fn synchronize(&self) -> bool;
}

/// A complete database schema.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSchema {
    pub database_name: String,
    pub schema_name: String,
    pub tables: Vec<Table>,
    pub enums: Vec<Enum>,
    pub extensions: Vec<Extension>,
    pub functions: Vec<Function>,
    pub parameters: Vec<Parameter>,
    /// Authoring problems found while building the schema.
    pub warnings: Vec<String>,
}

impl DatabaseSchema {
    /// Create a new empty schema.
    pub fn new(database_name: impl Into<String>, schema_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            schema_name: schema_name.into(),
            tables: Vec::new(),
            enums: Vec::new(),
            extensions: Vec::new(),
            functions: Vec::new(),
            parameters: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Get a table by name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Iterate over every index of every table.
    pub fn indexes(&self) -> impl Iterator<Item = &Index> {
        self.tables.iter().flat_map(|t| t.indexes.iter())
    }

    /// Iterate over every constraint of every table.
    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.tables.iter().flat_map(|t| t.constraints.iter())
    }
}

impl Default for DatabaseSchema {
    fn default() -> Self {
        Self::new("postgres", "public")
    }
}

/// A database table definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    pub triggers: Vec<Trigger>,
    pub constraints: Vec<Constraint>,
    /// When false the table is managed elsewhere and excluded from diffing.
    pub synchronize: bool,
}

impl Table {
    /// Create an empty, synchronized table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            triggers: Vec::new(),
            constraints: Vec::new(),
            synchronize: true,
        }
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether this table has a column with the given name.
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Names of the primary key columns, in declaration order.
    pub fn primary_key_columns(&self) -> Vec<String> {
        self.constraints
            .iter()
            .find(|c| matches!(c.kind, ConstraintKind::PrimaryKey))
            .map(|c| c.column_names.clone())
            .unwrap_or_else(|| {
                self.columns
                    .iter()
                    .filter(|c| c.primary)
                    .map(|c| c.name.clone())
                    .collect()
            })
    }
}

impl Entity for Table {
    const KIND: EntityKind = EntityKind::Table;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn synchronize(&self) -> bool {
        self.synchronize
    }
}

/// A database column definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub table_name: String,
    /// Postgres type name without array brackets (e.g. `uuid`, `character varying`)
    pub data_type: String,
    pub nullable: bool,
    pub is_array: bool,
    pub primary: bool,
    /// Default value expression (if any)
    pub default: Option<String>,
    pub comment: Option<String>,
    pub synchronize: bool,
}

impl Column {
    /// Create a non-null, non-array column of the given type.
    pub fn new(
        table_name: impl Into<String>,
        name: impl Into<String>,
        data_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            table_name: table_name.into(),
            data_type: data_type.into(),
            nullable: false,
            is_array: false,
            primary: false,
            default: None,
            comment: None,
            synchronize: true,
        }
    }

    /// The full SQL type, including array brackets.
    pub fn type_sql(&self) -> String {
        if self.is_array {
            format!("{}[]", self.data_type)
        } else {
            self.data_type.clone()
        }
    }
}

impl Entity for Column {
    const KIND: EntityKind = EntityKind::Column;

    fn key(&self) -> String {
        format!("{}.{}", self.table_name, self.name)
    }

    fn synchronize(&self) -> bool {
        self.synchronize
    }
}

/// A database index.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    /// Index name, unique within the schema
    pub name: String,
    pub table_name: String,
    /// Indexed columns; order is significant
    pub column_names: Vec<String>,
    pub unique: bool,
    /// Access method (`btree` when absent)
    pub using: Option<String>,
    /// Predicate for partial indexes
    pub where_clause: Option<String>,
    pub synchronize: bool,
}

impl Index {
    /// Create a plain btree index.
    pub fn new(
        table_name: impl Into<String>,
        name: impl Into<String>,
        column_names: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            table_name: table_name.into(),
            column_names: column_names.into_iter().map(Into::into).collect(),
            unique: false,
            using: None,
            where_clause: None,
            synchronize: true,
        }
    }
}

impl Entity for Index {
    const KIND: EntityKind = EntityKind::Index;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn synchronize(&self) -> bool {
        self.synchronize
    }
}

/// What happens to referencing rows when the referenced row changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    pub fn to_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }

    /// Parse the single-letter code used by `pg_constraint.confdeltype`.
    pub fn from_pg_code(code: &str) -> Option<Self> {
        match code {
            "a" => Some(ReferentialAction::NoAction),
            "r" => Some(ReferentialAction::Restrict),
            "c" => Some(ReferentialAction::Cascade),
            "n" => Some(ReferentialAction::SetNull),
            "d" => Some(ReferentialAction::SetDefault),
            _ => None,
        }
    }
}

/// Kind-specific part of a constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    Check {
        expression: String,
    },
    ForeignKey {
        reference_table: String,
        reference_columns: Vec<String>,
        on_delete: ReferentialAction,
        on_update: ReferentialAction,
    },
}

impl ConstraintKind {
    pub fn label(&self) -> &'static str {
        match self {
            ConstraintKind::PrimaryKey => "primary key",
            ConstraintKind::Unique => "unique",
            ConstraintKind::Check { .. } => "check",
            ConstraintKind::ForeignKey { .. } => "foreign key",
        }
    }
}

/// A table constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub name: String,
    pub table_name: String,
    pub column_names: Vec<String>,
    pub kind: ConstraintKind,
    pub synchronize: bool,
}

impl Constraint {
    pub fn is_foreign_key(&self) -> bool {
        matches!(self.kind, ConstraintKind::ForeignKey { .. })
    }

    /// The table this constraint points at, for foreign keys.
    pub fn reference_table(&self) -> Option<&str> {
        match &self.kind {
            ConstraintKind::ForeignKey {
                reference_table, ..
            } => Some(reference_table),
            _ => None,
        }
    }
}

impl Entity for Constraint {
    const KIND: EntityKind = EntityKind::Constraint;

    fn key(&self) -> String {
        format!("{}.{}", self.table_name, self.name)
    }

    fn synchronize(&self) -> bool {
        self.synchronize
    }
}

/// A Postgres enum type.
#[derive(Debug, Clone, PartialEq)]
pub struct Enum {
    pub name: String,
    pub values: Vec<String>,
    pub synchronize: bool,
}

impl Entity for Enum {
    const KIND: EntityKind = EntityKind::Enum;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn synchronize(&self) -> bool {
        self.synchronize
    }
}

/// A Postgres extension the schema depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct Extension {
    pub name: String,
    pub synchronize: bool,
}

impl Entity for Extension {
    const KIND: EntityKind = EntityKind::Extension;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn synchronize(&self) -> bool {
        self.synchronize
    }
}

/// A SQL function.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    /// Full `CREATE OR REPLACE FUNCTION ...` statement
    pub expression: String,
    pub synchronize: bool,
}

impl Entity for Function {
    const KIND: EntityKind = EntityKind::Function;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn synchronize(&self) -> bool {
        self.synchronize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerTiming {
    Before,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    Insert,
    Update,
    Delete,
    Truncate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerScope {
    Row,
    Statement,
}

impl fmt::Display for TriggerTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerTiming::Before => f.write_str("BEFORE"),
            TriggerTiming::After => f.write_str("AFTER"),
        }
    }
}

impl fmt::Display for TriggerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerAction::Insert => f.write_str("INSERT"),
            TriggerAction::Update => f.write_str("UPDATE"),
            TriggerAction::Delete => f.write_str("DELETE"),
            TriggerAction::Truncate => f.write_str("TRUNCATE"),
        }
    }
}

impl fmt::Display for TriggerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerScope::Row => f.write_str("ROW"),
            TriggerScope::Statement => f.write_str("STATEMENT"),
        }
    }
}

/// A table trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub name: String,
    pub table_name: String,
    pub timing: TriggerTiming,
    pub actions: Vec<TriggerAction>,
    pub scope: TriggerScope,
    pub function_name: String,
    pub referencing_old_table_as: Option<String>,
    pub referencing_new_table_as: Option<String>,
    /// Optional `WHEN (...)` condition
    pub when: Option<String>,
    pub synchronize: bool,
}

impl Entity for Trigger {
    const KIND: EntityKind = EntityKind::Trigger;

    fn key(&self) -> String {
        format!("{}.{}", self.table_name, self.name)
    }

    fn synchronize(&self) -> bool {
        self.synchronize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterScope {
    /// `ALTER DATABASE ... SET`
    Database,
    /// `SET` for the current session/user
    User,
}

/// A runtime configuration parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub database_name: String,
    pub value: String,
    pub scope: ParameterScope,
    pub synchronize: bool,
}

impl Entity for Parameter {
    const KIND: EntityKind = EntityKind::Parameter;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn synchronize(&self) -> bool {
        self.synchronize
    }
}
