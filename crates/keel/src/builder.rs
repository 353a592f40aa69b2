//! Declarative schema authoring.
//!
//! Tables are declared as [`TableDecl`] values and collected by a
//! [`SchemaBuilder`]. Foreign keys point at other tables through a
//! [`TableRef`], which is resolved only when the schema is built, so tables
//! may reference each other in any declaration order.
//!
//! ```
//! use keel::builder::{ColumnDecl, SchemaBuilder, TableDecl, TableRef};
//! use keel_schema::ReferentialAction;
//!
//! let schema = SchemaBuilder::new("immich", "public")
//!     .table(
//!         TableDecl::new("AssetTable")
//!             .name("asset")
//!             .column(ColumnDecl::new("id", "uuid").primary())
//!             .column(
//!                 ColumnDecl::new("ownerId", "uuid")
//!                     .references(TableRef::new("UserTable"), ReferentialAction::Cascade),
//!             ),
//!     )
//!     .table(
//!         TableDecl::new("UserTable")
//!             .name("user")
//!             .column(ColumnDecl::new("id", "uuid").primary()),
//!     )
//!     .build();
//!
//! assert!(schema.warnings.is_empty());
//! assert_eq!(schema.tables[0].constraints.len(), 2);
//! ```

use std::collections::HashMap;

use keel_schema::{
    Column, Constraint, ConstraintKind, DatabaseSchema, Enum, Extension, Function, Index,
    Parameter, ParameterScope, ReferentialAction, Table, Trigger, TriggerAction, TriggerScope,
    TriggerTiming, check_name, foreign_key_name, index_name, primary_key_name, trigger_name,
    unique_name,
};

use crate::validate::Validator;

/// A deferred reference to another declared table, by object or table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef(String);

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl From<&str> for TableRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A column declaration.
#[derive(Debug, Clone)]
pub struct ColumnDecl {
    property: String,
    name: Option<String>,
    data_type: String,
    nullable: bool,
    array: bool,
    primary: bool,
    default: Option<String>,
    comment: Option<String>,
    unique: bool,
    indexed: bool,
    synchronize: bool,
    references: Option<ColumnReference>,
}

#[derive(Debug, Clone)]
struct ColumnReference {
    table: TableRef,
    on_delete: ReferentialAction,
    on_update: ReferentialAction,
    index: bool,
}

impl ColumnDecl {
    /// A non-null column named after `property`.
    pub fn new(property: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            name: None,
            data_type: data_type.into(),
            nullable: false,
            array: false,
            primary: false,
            default: None,
            comment: None,
            unique: false,
            indexed: false,
            synchronize: true,
            references: None,
        }
    }

    /// Override the column name (defaults to the property name).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn default(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(expression.into());
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn unsynchronized(mut self) -> Self {
        self.synchronize = false;
        self
    }

    /// Reference the primary key of another table. The column is indexed
    /// unless [`ColumnDecl::without_reference_index`] is called.
    pub fn references(mut self, table: TableRef, on_delete: ReferentialAction) -> Self {
        self.references = Some(ColumnReference {
            table,
            on_delete,
            on_update: ReferentialAction::Cascade,
            index: true,
        });
        self
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        if let Some(reference) = &mut self.references {
            reference.on_update = action;
        }
        self
    }

    pub fn without_reference_index(mut self) -> Self {
        if let Some(reference) = &mut self.references {
            reference.index = false;
        }
        self
    }

    fn column_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.property)
    }
}

/// A table-level index declaration.
#[derive(Debug, Clone)]
pub struct IndexDecl {
    name: Option<String>,
    columns: Vec<String>,
    unique: bool,
    using: Option<String>,
    where_clause: Option<String>,
    synchronize: bool,
}

impl IndexDecl {
    pub fn new(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: None,
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
            using: None,
            where_clause: None,
            synchronize: true,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn using(mut self, method: impl Into<String>) -> Self {
        self.using = Some(method.into());
        self
    }

    pub fn where_clause(mut self, predicate: impl Into<String>) -> Self {
        self.where_clause = Some(predicate.into());
        self
    }

    pub fn unsynchronized(mut self) -> Self {
        self.synchronize = false;
        self
    }
}

/// A table-level foreign key declaration.
#[derive(Debug, Clone)]
pub struct ForeignKeyDecl {
    name: Option<String>,
    columns: Vec<String>,
    reference: TableRef,
    reference_columns: Option<Vec<String>>,
    on_delete: ReferentialAction,
    on_update: ReferentialAction,
    synchronize: bool,
}

impl ForeignKeyDecl {
    pub fn new(columns: impl IntoIterator<Item = impl Into<String>>, reference: TableRef) -> Self {
        Self {
            name: None,
            columns: columns.into_iter().map(Into::into).collect(),
            reference,
            reference_columns: None,
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
            synchronize: true,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Referenced columns (defaults to the referenced table's primary key).
    pub fn reference_columns(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.reference_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = action;
        self
    }
}

/// A trigger declaration.
#[derive(Debug, Clone)]
pub struct TriggerDecl {
    name: Option<String>,
    timing: TriggerTiming,
    actions: Vec<TriggerAction>,
    scope: TriggerScope,
    function_name: String,
    referencing_old_table_as: Option<String>,
    referencing_new_table_as: Option<String>,
    when: Option<String>,
}

impl TriggerDecl {
    /// A row-level trigger calling `function_name`.
    pub fn new(
        function_name: impl Into<String>,
        timing: TriggerTiming,
        actions: impl IntoIterator<Item = TriggerAction>,
    ) -> Self {
        Self {
            name: None,
            timing,
            actions: actions.into_iter().collect(),
            scope: TriggerScope::Row,
            function_name: function_name.into(),
            referencing_old_table_as: None,
            referencing_new_table_as: None,
            when: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn for_each_statement(mut self) -> Self {
        self.scope = TriggerScope::Statement;
        self
    }

    pub fn referencing_old_table_as(mut self, alias: impl Into<String>) -> Self {
        self.referencing_old_table_as = Some(alias.into());
        self
    }

    pub fn referencing_new_table_as(mut self, alias: impl Into<String>) -> Self {
        self.referencing_new_table_as = Some(alias.into());
        self
    }

    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.when = Some(condition.into());
        self
    }
}

/// A table declaration.
#[derive(Debug, Clone)]
pub struct TableDecl {
    object_name: String,
    name: Option<String>,
    columns: Vec<ColumnDecl>,
    indexes: Vec<IndexDecl>,
    uniques: Vec<(Option<String>, Vec<String>)>,
    checks: Vec<(Option<String>, String)>,
    foreign_keys: Vec<ForeignKeyDecl>,
    triggers: Vec<TriggerDecl>,
    synchronize: bool,
}

impl TableDecl {
    /// Declare a table for the authoring object `object_name`.
    ///
    /// The table name defaults to the object name in snake case.
    pub fn new(object_name: impl Into<String>) -> Self {
        Self {
            object_name: object_name.into(),
            name: None,
            columns: Vec::new(),
            indexes: Vec::new(),
            uniques: Vec::new(),
            checks: Vec::new(),
            foreign_keys: Vec::new(),
            triggers: Vec::new(),
            synchronize: true,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn column(mut self, column: ColumnDecl) -> Self {
        self.columns.push(column);
        self
    }

    pub fn index(mut self, index: IndexDecl) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn unique(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.uniques
            .push((None, columns.into_iter().map(Into::into).collect()));
        self
    }

    pub fn check(mut self, expression: impl Into<String>) -> Self {
        self.checks.push((None, expression.into()));
        self
    }

    pub fn named_check(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.checks.push((Some(name.into()), expression.into()));
        self
    }

    pub fn foreign_key(mut self, foreign_key: ForeignKeyDecl) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    pub fn trigger(mut self, trigger: TriggerDecl) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Exclude the table from diffing.
    pub fn unsynchronized(mut self) -> Self {
        self.synchronize = false;
        self
    }

    fn table_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| to_snake_case(&self.object_name))
    }
}

/// Collects declarations and builds the immutable [`DatabaseSchema`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    database_name: String,
    schema_name: String,
    tables: Vec<TableDecl>,
    enums: Vec<Enum>,
    extensions: Vec<Extension>,
    functions: Vec<Function>,
    parameters: Vec<(String, String, ParameterScope)>,
}

impl SchemaBuilder {
    pub fn new(database_name: impl Into<String>, schema_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            schema_name: schema_name.into(),
            tables: Vec::new(),
            enums: Vec::new(),
            extensions: Vec::new(),
            functions: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn table(mut self, table: TableDecl) -> Self {
        self.tables.push(table);
        self
    }

    pub fn enumeration(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.enums.push(Enum {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
            synchronize: true,
        });
        self
    }

    pub fn extension(mut self, name: impl Into<String>) -> Self {
        self.extensions.push(Extension {
            name: name.into(),
            synchronize: true,
        });
        self
    }

    /// Register a function from its full `CREATE OR REPLACE FUNCTION` text.
    pub fn function(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.functions.push(Function {
            name: name.into(),
            expression: expression.into(),
            synchronize: true,
        });
        self
    }

    pub fn parameter(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        scope: ParameterScope,
    ) -> Self {
        self.parameters.push((name.into(), value.into(), scope));
        self
    }

    /// Resolve every declaration into a schema.
    ///
    /// The first pass fixes each table's name and primary key so that the
    /// second pass can resolve references regardless of declaration order.
    /// Declarations that cannot be resolved become warnings on the schema.
    pub fn build(self) -> DatabaseSchema {
        let mut schema = DatabaseSchema::new(&self.database_name, &self.schema_name);

        let resolved: Vec<ResolvedTable> = self
            .tables
            .iter()
            .map(|decl| ResolvedTable {
                object_name: decl.object_name.clone(),
                name: decl.table_name(),
                primary_key: decl
                    .columns
                    .iter()
                    .filter(|c| c.primary)
                    .map(|c| c.column_name().to_string())
                    .collect(),
            })
            .collect();
        let mut lookup: HashMap<&str, &ResolvedTable> = HashMap::new();
        for table in &resolved {
            lookup.insert(&table.name, table);
            lookup.insert(&table.object_name, table);
        }
        let resolve = |reference: &TableRef| -> (String, Vec<String>) {
            match lookup.get(reference.0.as_str()) {
                Some(table) => (table.name.clone(), table.primary_key.clone()),
                None => (reference.0.clone(), Vec::new()),
            }
        };

        let mut validator = Validator::new();
        for (decl, identity) in self.tables.iter().zip(&resolved) {
            validator = validator.with_display_name(&identity.name, &identity.object_name);
            schema.tables.push(build_table(decl, &identity.name, &resolve));
        }

        schema.enums = self.enums;
        schema.extensions = self.extensions;
        schema.functions = self.functions;
        schema.parameters = self
            .parameters
            .into_iter()
            .map(|(name, value, scope)| Parameter {
                name,
                database_name: self.database_name.clone(),
                value,
                scope,
                synchronize: true,
            })
            .collect();

        validator.validate(&mut schema);
        schema
    }
}

struct ResolvedTable {
    object_name: String,
    name: String,
    primary_key: Vec<String>,
}

fn build_table(
    decl: &TableDecl,
    table_name: &str,
    resolve: &dyn Fn(&TableRef) -> (String, Vec<String>),
) -> Table {
    let mut table = Table::new(table_name);
    table.synchronize = decl.synchronize;

    for column in &decl.columns {
        let name = column.column_name();
        table.columns.push(Column {
            name: name.to_string(),
            table_name: table_name.to_string(),
            data_type: column.data_type.clone(),
            nullable: column.nullable,
            is_array: column.array,
            primary: column.primary,
            default: column.default.clone(),
            comment: column.comment.clone(),
            synchronize: column.synchronize,
        });
    }

    let primary_key: Vec<String> = table.primary_key_columns();
    if !primary_key.is_empty() {
        table.constraints.push(Constraint {
            name: primary_key_name(table_name, &primary_key),
            table_name: table_name.to_string(),
            column_names: primary_key,
            kind: ConstraintKind::PrimaryKey,
            synchronize: true,
        });
    }

    for column in &decl.columns {
        let name = column.column_name().to_string();
        if column.unique {
            table
                .constraints
                .push(unique_constraint(table_name, None, vec![name.clone()]));
        }
        if column.indexed {
            table
                .indexes
                .push(Index::new(table_name, index_name(table_name, &[&name]), [name.clone()]));
        }
        if let Some(reference) = &column.references {
            let (reference_table, reference_columns) = resolve(&reference.table);
            let columns = vec![name.clone()];
            table.constraints.push(Constraint {
                name: foreign_key_name(table_name, &columns, &reference_table, &reference_columns),
                table_name: table_name.to_string(),
                column_names: columns,
                kind: ConstraintKind::ForeignKey {
                    reference_table,
                    reference_columns,
                    on_delete: reference.on_delete,
                    on_update: reference.on_update,
                },
                synchronize: true,
            });
            if reference.index {
                table
                    .indexes
                    .push(Index::new(table_name, index_name(table_name, &[&name]), [name]));
            }
        }
    }

    for (name, columns) in &decl.uniques {
        table
            .constraints
            .push(unique_constraint(table_name, name.clone(), columns.clone()));
    }

    for (name, expression) in &decl.checks {
        table.constraints.push(Constraint {
            name: name
                .clone()
                .unwrap_or_else(|| check_name(table_name, expression)),
            table_name: table_name.to_string(),
            column_names: Vec::new(),
            kind: ConstraintKind::Check {
                expression: expression.clone(),
            },
            synchronize: true,
        });
    }

    for fk in &decl.foreign_keys {
        let (reference_table, primary_key) = resolve(&fk.reference);
        let reference_columns = fk.reference_columns.clone().unwrap_or(primary_key);
        table.constraints.push(Constraint {
            name: fk.name.clone().unwrap_or_else(|| {
                foreign_key_name(table_name, &fk.columns, &reference_table, &reference_columns)
            }),
            table_name: table_name.to_string(),
            column_names: fk.columns.clone(),
            kind: ConstraintKind::ForeignKey {
                reference_table,
                reference_columns,
                on_delete: fk.on_delete,
                on_update: fk.on_update,
            },
            synchronize: fk.synchronize,
        });
    }

    for index in &decl.indexes {
        table.indexes.push(Index {
            name: index
                .name
                .clone()
                .unwrap_or_else(|| index_name(table_name, &index.columns)),
            table_name: table_name.to_string(),
            column_names: index.columns.clone(),
            unique: index.unique,
            using: index.using.clone(),
            where_clause: index.where_clause.clone(),
            synchronize: index.synchronize,
        });
    }

    for trigger in &decl.triggers {
        table.triggers.push(Trigger {
            name: trigger
                .name
                .clone()
                .unwrap_or_else(|| trigger_name(table_name, &trigger.function_name)),
            table_name: table_name.to_string(),
            timing: trigger.timing,
            actions: trigger.actions.clone(),
            scope: trigger.scope,
            function_name: trigger.function_name.clone(),
            referencing_old_table_as: trigger.referencing_old_table_as.clone(),
            referencing_new_table_as: trigger.referencing_new_table_as.clone(),
            when: trigger.when.clone(),
            synchronize: true,
        });
    }

    table
}

fn unique_constraint(table_name: &str, name: Option<String>, columns: Vec<String>) -> Constraint {
    Constraint {
        name: name.unwrap_or_else(|| unique_name(table_name, &columns)),
        table_name: table_name.to_string(),
        column_names: columns,
        kind: ConstraintKind::Unique,
        synchronize: true,
    }
}

/// `AssetFace` -> `asset_face`, `Table1` -> `table1`.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;
    for ch in name.chars() {
        if ch.is_uppercase() {
            if prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit()) {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
        prev = Some(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("Table1"), "table1");
        assert_eq!(to_snake_case("AssetFace"), "asset_face");
        assert_eq!(to_snake_case("SessionSyncCheckpoint"), "session_sync_checkpoint");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn test_foreign_key_with_missing_column_is_omitted() {
        let schema = SchemaBuilder::new("postgres", "public")
            .table(TableDecl::new("Table1").column(ColumnDecl::new("id", "uuid").primary()))
            .table(
                TableDecl::new("Table2")
                    .column(ColumnDecl::new("parentId", "uuid"))
                    .foreign_key(ForeignKeyDecl::new(["parentId2"], TableRef::new("Table1"))),
            )
            .build();

        assert_eq!(
            schema.warnings,
            vec!["[@ForeignKeyConstraint.columns] Unable to find column (Table2.parentId2)"]
        );

        let table1 = schema.table("table1").expect("table1");
        assert_eq!(table1.columns.len(), 1);
        assert!(table1.columns[0].primary);
        assert_eq!(table1.constraints.len(), 1);
        assert_eq!(table1.constraints[0].kind, ConstraintKind::PrimaryKey);
        assert!(table1.constraints[0].name.starts_with("PK_"));
        assert_eq!(table1.constraints[0].name.len(), 30);

        let table2 = schema.table("table2").expect("table2");
        assert_eq!(table2.columns[0].name, "parentId");
        assert!(!table2.columns[0].nullable);
        assert!(table2.constraints.is_empty());
        assert!(table2.indexes.is_empty());
    }

    #[test]
    fn test_forward_reference_resolves_primary_key() {
        // the referencing table is declared first
        let schema = SchemaBuilder::new("immich", "public")
            .table(
                TableDecl::new("AlbumAssetTable")
                    .name("album_asset")
                    .column(
                        ColumnDecl::new("albumId", "uuid")
                            .primary()
                            .references(TableRef::new("AlbumTable"), ReferentialAction::Cascade),
                    )
                    .column(ColumnDecl::new("assetId", "uuid").primary()),
            )
            .table(
                TableDecl::new("AlbumTable")
                    .name("album")
                    .column(ColumnDecl::new("id", "uuid").primary()),
            )
            .build();

        assert!(schema.warnings.is_empty(), "{:?}", schema.warnings);
        let album_asset = schema.table("album_asset").expect("album_asset");
        let fk = album_asset
            .constraints
            .iter()
            .find(|c| c.is_foreign_key())
            .expect("foreign key");
        assert_eq!(
            fk.kind,
            ConstraintKind::ForeignKey {
                reference_table: "album".to_string(),
                reference_columns: vec!["id".to_string()],
                on_delete: ReferentialAction::Cascade,
                on_update: ReferentialAction::Cascade,
            }
        );
        assert!(fk.name.starts_with("FK_"));
        assert_eq!(album_asset.indexes.len(), 1);
        assert_eq!(album_asset.primary_key_columns(), vec!["albumId", "assetId"]);
    }

    #[test]
    fn test_unknown_reference_table_warns() {
        let schema = SchemaBuilder::new("immich", "public")
            .table(
                TableDecl::new("Asset")
                    .column(ColumnDecl::new("id", "uuid").primary())
                    .column(ColumnDecl::new("ownerId", "uuid"))
                    .foreign_key(ForeignKeyDecl::new(["ownerId"], TableRef::new("User"))),
            )
            .build();

        assert_eq!(
            schema.warnings,
            vec!["[@ForeignKeyConstraint.referenceTable] Unable to find table (User)"]
        );
    }

    #[test]
    fn test_generated_names_are_deterministic() {
        let build = || {
            SchemaBuilder::new("immich", "public")
                .table(
                    TableDecl::new("Asset")
                        .column(ColumnDecl::new("id", "uuid").primary())
                        .column(ColumnDecl::new("checksum", "bytea").indexed())
                        .column(ColumnDecl::new("fileSize", "bigint"))
                        .check("\"fileSize\" >= 0")
                        .unique(["checksum"]),
                )
                .build()
        };
        assert_eq!(build(), build());

        let schema = build();
        let asset = schema.table("asset").expect("asset");
        let names: Vec<&str> = asset.constraints.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names.len(), 3);
        assert!(names[0].starts_with("PK_"));
        assert!(names[1].starts_with("UQ_"));
        assert!(names[2].starts_with("CHK_"));
        assert!(asset.indexes[0].name.starts_with("IDX_"));
    }

    #[test]
    fn test_parameters_take_database_name() {
        let schema = SchemaBuilder::new("immich", "public")
            .parameter("search_path", "\"$user\", public", ParameterScope::Database)
            .build();
        assert_eq!(schema.parameters[0].database_name, "immich");
    }
}
