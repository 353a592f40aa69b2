//! Schema diffing: compare the declared schema against the live database.
//!
//! [`schema_diff`] runs every comparer in a fixed kind order and then sorts
//! the combined list into phases so it can be executed top to bottom:
//!
//! ```text
//! drops:   triggers, foreign keys, other constraints, indexes, columns,
//!          tables, functions, enums, parameters, extensions
//! alters:  columns
//! creates: extensions, parameters, enums, functions, tables, columns,
//!          constraints (foreign keys last), indexes, triggers
//! ```
//!
//! The sort is stable, so entities of the same kind keep the order in which
//! they were declared.

use std::collections::HashSet;
use std::fmt;

use keel_schema::{DatabaseSchema, EntityKind, Table};

use crate::action::{DiffAction, Reason};
use crate::compare::{
    self, column_comparer, constraint_comparer, enum_comparer, extension_comparer,
    function_comparer, index_comparer, parameter_comparer, table_comparer, trigger_comparer,
};

/// Per-kind switches for one-sided differences.
#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Kinds whose undeclared live entities are left in place.
    pub ignore_extra: Vec<EntityKind>,
    /// Kinds whose declared-but-absent entities are not created.
    pub ignore_missing: Vec<EntityKind>,
}

impl DiffOptions {
    /// Options for migrating an application database: extensions and
    /// parameters that exist but are not declared belong to someone else.
    pub fn for_migrations() -> Self {
        Self {
            ignore_extra: vec![EntityKind::Extension, EntityKind::Parameter],
            ignore_missing: Vec::new(),
        }
    }

    fn keep(&self, kind: EntityKind, action: &DiffAction) -> bool {
        match action.reason() {
            Reason::MissingInSource => !self.ignore_extra.contains(&kind),
            Reason::MissingInTarget => !self.ignore_missing.contains(&kind),
            Reason::Changed(_) => true,
        }
    }
}

/// An ordered migration plan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDiff {
    pub items: Vec<DiffAction>,
}

impl SchemaDiff {
    /// Returns true if the schemas already match.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Every SQL statement of the plan, in execution order.
    pub fn statements(&self) -> Vec<String> {
        self.items.iter().flat_map(|a| a.to_sql()).collect()
    }

    /// The plan as one SQL script.
    pub fn to_sql(&self) -> String {
        let mut sql = String::new();
        for action in &self.items {
            sql.push_str(&format!("-- {}: {}\n", action.name(), action.reason()));
            for statement in action.to_sql() {
                sql.push_str(&statement);
                sql.push('\n');
            }
        }
        sql
    }
}

impl fmt::Display for SchemaDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.items.is_empty() {
            return writeln!(f, "No changes detected.");
        }
        for action in &self.items {
            writeln!(f, "{} ({})", action, action.reason())?;
        }
        Ok(())
    }
}

/// Plan the changes that turn `target` (live) into `source` (declared).
pub fn schema_diff(source: &DatabaseSchema, target: &DatabaseSchema) -> SchemaDiff {
    schema_diff_with(source, target, &DiffOptions::default())
}

pub fn schema_diff_with(
    source: &DatabaseSchema,
    target: &DatabaseSchema,
    options: &DiffOptions,
) -> SchemaDiff {
    let mut actions = Vec::new();
    let mut push = |kind: EntityKind, found: Vec<DiffAction>| {
        actions.extend(found.into_iter().filter(|a| options.keep(kind, a)));
    };

    push(
        EntityKind::Extension,
        compare::compare(&source.extensions, &target.extensions, &extension_comparer()),
    );
    push(
        EntityKind::Parameter,
        compare::compare(&source.parameters, &target.parameters, &parameter_comparer()),
    );
    push(
        EntityKind::Enum,
        compare::compare(&source.enums, &target.enums, &enum_comparer()),
    );
    push(
        EntityKind::Function,
        compare::compare(&source.functions, &target.functions, &function_comparer()),
    );
    push(
        EntityKind::Table,
        compare::compare(&source.tables, &target.tables, &table_comparer()),
    );

    for (declared, live) in common_tables(source, target) {
        push(
            EntityKind::Column,
            compare::compare(&declared.columns, &live.columns, &column_comparer()),
        );
        push(
            EntityKind::Constraint,
            compare::compare(&declared.constraints, &live.constraints, &constraint_comparer()),
        );
        push(
            EntityKind::Index,
            compare::compare(&declared.indexes, &live.indexes, &index_comparer()),
        );
        push(
            EntityKind::Trigger,
            compare::compare(&declared.triggers, &live.triggers, &trigger_comparer()),
        );
    }

    drop_references_to_dropped_tables(target, &mut actions);
    recreate_columns_of_recreated_enums(source, target, &mut actions);
    rebuild_dependents_of_recreated_columns(source, target, &mut actions);

    actions.sort_by_key(DiffAction::phase);
    SchemaDiff { items: actions }
}

/// Tables declared and present in the database, both synchronized.
fn common_tables<'a>(
    source: &'a DatabaseSchema,
    target: &'a DatabaseSchema,
) -> impl Iterator<Item = (&'a Table, &'a Table)> {
    source
        .tables
        .iter()
        .filter(|t| t.synchronize)
        .filter_map(|declared| {
            target
                .table(&declared.name)
                .filter(|live| live.synchronize)
                .map(|live| (declared, live))
        })
}

/// Postgres refuses to drop a table that other tables still reference.
fn drop_references_to_dropped_tables(target: &DatabaseSchema, actions: &mut Vec<DiffAction>) {
    let dropped: Vec<String> = actions
        .iter()
        .filter_map(|a| match a {
            DiffAction::TableDrop { table_name, .. } => Some(table_name.clone()),
            _ => None,
        })
        .collect();

    for table_name in &dropped {
        for constraint in target.constraints() {
            if constraint.table_name == *table_name
                || constraint.reference_table() != Some(table_name.as_str())
                || is_dropping_constraint(actions, &constraint.table_name, &constraint.name)
            {
                continue;
            }
            actions.push(compare::drop_constraint(
                constraint,
                Reason::Changed(format!("referenced table {} is dropped", table_name)),
            ));
        }
    }
}

/// Postgres refuses to drop a type that columns still use, so every live
/// column of a recreated enum is dropped first and recreated afterwards.
fn recreate_columns_of_recreated_enums(
    source: &DatabaseSchema,
    target: &DatabaseSchema,
    actions: &mut Vec<DiffAction>,
) {
    let recreated: Vec<String> = actions
        .iter()
        .filter_map(|a| match a {
            DiffAction::EnumDrop {
                enum_name,
                reason: Reason::Changed(_),
            } => Some(enum_name.clone()),
            _ => None,
        })
        .collect();

    for enum_name in &recreated {
        let reason = Reason::Changed(format!("enum {} is recreated", enum_name));

        for live in &target.tables {
            if is_dropping_table(actions, &live.name) {
                continue;
            }
            for column in live.columns.iter().filter(|c| c.data_type == *enum_name) {
                if is_dropping_column(actions, &live.name, &column.name) {
                    continue;
                }
                actions.push(DiffAction::ColumnDrop {
                    table_name: live.name.clone(),
                    column_name: column.name.clone(),
                    reason: reason.clone(),
                });
                let declared = source
                    .table(&live.name)
                    .filter(|t| t.synchronize)
                    .and_then(|t| t.column(&column.name))
                    .filter(|c| c.synchronize);
                if let Some(declared) = declared {
                    actions.push(DiffAction::ColumnCreate {
                        column: declared.clone(),
                        reason: reason.clone(),
                    });
                }
            }
        }
    }
}

/// Dropping a column also drops the indexes and constraints that use it, so
/// recreating a column has to recreate those as well.
fn rebuild_dependents_of_recreated_columns(
    source: &DatabaseSchema,
    target: &DatabaseSchema,
    actions: &mut Vec<DiffAction>,
) {
    let recreated: Vec<(String, String)> = actions
        .iter()
        .filter_map(|a| match a {
            DiffAction::ColumnDrop {
                table_name,
                column_name,
                reason: Reason::Changed(_),
            } => Some((table_name.clone(), column_name.clone())),
            _ => None,
        })
        .collect();

    for (table_name, column_name) in &recreated {
        let reason = Reason::Changed(format!(
            "column {}.{} is recreated",
            table_name, column_name
        ));

        if let Some(live) = target.table(table_name) {
            for index in live.indexes.iter().filter(|i| i.synchronize) {
                if !index.column_names.contains(column_name)
                    || is_dropping_index(actions, &index.name)
                {
                    continue;
                }
                actions.push(DiffAction::IndexDrop {
                    index_name: index.name.clone(),
                    reason: reason.clone(),
                });
                if let Some(declared) = source.indexes().find(|i| i.name == index.name)
                    && declared.synchronize
                {
                    actions.push(DiffAction::IndexCreate {
                        index: declared.clone(),
                        reason: reason.clone(),
                    });
                }
            }
        }

        for constraint in target.constraints().filter(|c| c.synchronize) {
            let uses_column = constraint.table_name == *table_name
                && constraint.column_names.contains(column_name);
            let references_column = match &constraint.kind {
                keel_schema::ConstraintKind::ForeignKey {
                    reference_table,
                    reference_columns,
                    ..
                } => reference_table == table_name && reference_columns.contains(column_name),
                _ => false,
            };
            if !(uses_column || references_column)
                || is_dropping_constraint(actions, &constraint.table_name, &constraint.name)
            {
                continue;
            }
            actions.push(compare::drop_constraint(constraint, reason.clone()));
            let declared = source
                .table(&constraint.table_name)
                .and_then(|t| t.constraints.iter().find(|c| c.name == constraint.name));
            if let Some(declared) = declared
                && declared.synchronize
            {
                actions.push(DiffAction::ConstraintCreate {
                    constraint: declared.clone(),
                    reason: reason.clone(),
                });
            }
        }
    }
}

fn is_dropping_index(actions: &[DiffAction], name: &str) -> bool {
    actions
        .iter()
        .any(|a| matches!(a, DiffAction::IndexDrop { index_name, .. } if index_name == name))
}

fn is_dropping_table(actions: &[DiffAction], table: &str) -> bool {
    actions
        .iter()
        .any(|a| matches!(a, DiffAction::TableDrop { table_name, .. } if table_name == table))
}

fn is_dropping_column(actions: &[DiffAction], table: &str, column: &str) -> bool {
    actions.iter().any(|a| {
        matches!(
            a,
            DiffAction::ColumnDrop { table_name, column_name, .. }
                if table_name == table && column_name == column
        )
    })
}

fn is_dropping_constraint(actions: &[DiffAction], table: &str, name: &str) -> bool {
    is_dropping_table(actions, table)
        || actions.iter().any(|a| {
            matches!(
                a,
                DiffAction::ConstraintDrop { table_name, constraint_name, .. }
                    if table_name == table && constraint_name == name
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::verify_order;
    use keel_schema::{
        Column, Constraint, ConstraintKind, Enum, Extension, Index, ReferentialAction,
    };

    fn make_column(table: &str, name: &str, data_type: &str) -> Column {
        Column::new(table, name, data_type)
    }

    fn make_pk(table: &str) -> Constraint {
        Constraint {
            name: format!("PK_{}", table),
            table_name: table.to_string(),
            column_names: vec!["id".to_string()],
            kind: ConstraintKind::PrimaryKey,
            synchronize: true,
        }
    }

    fn make_fk(table: &str, column: &str, reference_table: &str) -> Constraint {
        Constraint {
            name: format!("FK_{}_{}", table, column),
            table_name: table.to_string(),
            column_names: vec![column.to_string()],
            kind: ConstraintKind::ForeignKey {
                reference_table: reference_table.to_string(),
                reference_columns: vec!["id".to_string()],
                on_delete: ReferentialAction::Cascade,
                on_update: ReferentialAction::Cascade,
            },
            synchronize: true,
        }
    }

    fn make_table(name: &str, columns: &[(&str, &str)]) -> Table {
        let mut table = Table::new(name);
        table.columns = columns
            .iter()
            .map(|(col, ty)| make_column(name, col, ty))
            .collect();
        table.constraints.push(make_pk(name));
        table
    }

    fn make_schema(tables: Vec<Table>) -> DatabaseSchema {
        let mut schema = DatabaseSchema::new("immich", "public");
        schema.tables = tables;
        schema
    }

    fn action_names(diff: &SchemaDiff) -> Vec<&'static str> {
        diff.items.iter().map(|a| a.name()).collect()
    }

    #[test]
    fn test_diff_empty_schemas() {
        let diff = schema_diff(&DatabaseSchema::default(), &DatabaseSchema::default());
        assert!(diff.is_empty());
        assert_eq!(diff.to_string(), "No changes detected.\n");
    }

    #[test]
    fn test_diff_no_changes() {
        let schema = make_schema(vec![make_table("user", &[("id", "uuid")])]);
        assert!(schema_diff(&schema, &schema.clone()).is_empty());
    }

    #[test]
    fn test_new_tables_create_foreign_keys_after_all_tables() {
        // asset is declared before user but references it
        let mut asset = make_table("asset", &[("id", "uuid"), ("ownerId", "uuid")]);
        asset.constraints.push(make_fk("asset", "ownerId", "user"));
        asset
            .indexes
            .push(Index::new("asset", "IDX_asset_owner", ["ownerId"]));
        let user = make_table("user", &[("id", "uuid")]);

        let source = make_schema(vec![asset, user]);
        let target = make_schema(Vec::new());
        let diff = schema_diff(&source, &target);

        assert_eq!(
            action_names(&diff),
            vec![
                "TableCreate",
                "TableCreate",
                "ConstraintCreate",
                "ConstraintCreate",
                "ConstraintCreate",
                "IndexCreate",
            ]
        );
        let DiffAction::ConstraintCreate { constraint, .. } = &diff.items[4] else {
            panic!("expected ConstraintCreate");
        };
        assert!(constraint.is_foreign_key());
        verify_order(&target, &diff.items).expect("plan should apply cleanly");
    }

    #[test]
    fn test_dropped_table_children_are_not_dropped_separately() {
        let mut album = make_table("album", &[("id", "uuid")]);
        album.indexes.push(Index::new("album", "IDX_album_id", ["id"]));
        let source = make_schema(Vec::new());
        let target = make_schema(vec![album]);

        let diff = schema_diff(&source, &target);
        assert_eq!(action_names(&diff), vec!["TableDrop"]);
    }

    #[test]
    fn test_dropping_referenced_table_drops_foreign_keys_first() {
        let mut asset = make_table("asset", &[("id", "uuid"), ("albumId", "uuid")]);
        let album = make_table("album", &[("id", "uuid")]);
        let source = make_schema(vec![{
            let mut declared = asset.clone();
            declared.columns.retain(|c| c.name != "albumId");
            declared
        }]);
        asset.constraints.push(make_fk("asset", "albumId", "album"));
        let target = make_schema(vec![asset, album]);

        let diff = schema_diff(&source, &target);
        assert_eq!(
            action_names(&diff),
            vec!["ConstraintDrop", "ColumnDrop", "TableDrop"]
        );
        verify_order(&target, &diff.items).expect("plan should apply cleanly");
    }

    #[test]
    fn test_drops_come_before_creates() {
        let mut source = make_schema(vec![make_table(
            "asset",
            &[("id", "uuid"), ("checksum", "bytea")],
        )]);
        source.extensions.push(Extension {
            name: "pg_trgm".to_string(),
            synchronize: true,
        });
        source.enums.push(Enum {
            name: "asset_visibility_enum".to_string(),
            values: vec!["timeline".to_string(), "hidden".to_string()],
            synchronize: true,
        });

        let mut target = make_schema(vec![make_table(
            "asset",
            &[("id", "uuid"), ("legacy", "text")],
        )]);
        target.tables[0]
            .indexes
            .push(Index::new("asset", "IDX_legacy", ["legacy"]));

        let diff = schema_diff(&source, &target);
        assert_eq!(
            action_names(&diff),
            vec![
                "IndexDrop",
                "ColumnDrop",
                "ExtensionCreate",
                "EnumCreate",
                "ColumnCreate",
            ]
        );
        verify_order(&target, &diff.items).expect("plan should apply cleanly");
    }

    #[test]
    fn test_recreated_column_rebuilds_its_index() {
        let mut source = make_table("asset", &[("id", "uuid"), ("checksum", "bytea")]);
        source
            .indexes
            .push(Index::new("asset", "IDX_checksum", ["checksum"]));
        let mut target = make_table("asset", &[("id", "uuid"), ("checksum", "text")]);
        target
            .indexes
            .push(Index::new("asset", "IDX_checksum", ["checksum"]));

        let live = make_schema(vec![target]);
        let diff = schema_diff(&make_schema(vec![source]), &live);
        assert_eq!(
            action_names(&diff),
            vec!["IndexDrop", "ColumnDrop", "ColumnCreate", "IndexCreate"]
        );
        assert_eq!(
            diff.items[0].reason().to_string(),
            "column asset.checksum is recreated"
        );
        verify_order(&live, &diff.items).expect("plan should apply cleanly");
    }

    #[test]
    fn test_ignore_extra_keeps_undeclared_extensions() {
        let mut target = DatabaseSchema::default();
        target.extensions.push(Extension {
            name: "vchord".to_string(),
            synchronize: true,
        });

        let diff = schema_diff(&DatabaseSchema::default(), &target);
        assert_eq!(action_names(&diff), vec!["ExtensionDrop"]);

        let diff = schema_diff_with(
            &DatabaseSchema::default(),
            &target,
            &DiffOptions::for_migrations(),
        );
        assert!(diff.is_empty());
    }

    #[test]
    fn test_unsynchronized_table_is_ignored() {
        let mut declared = make_table("geodata_places", &[("id", "integer")]);
        declared.synchronize = false;
        let live = make_table("geodata_places", &[("id", "integer"), ("name", "text")]);

        let diff = schema_diff(&make_schema(vec![declared]), &make_schema(vec![live]));
        assert!(diff.is_empty());
    }

    #[test]
    fn snapshot_diff_display() {
        let mut source = make_table("asset", &[("id", "uuid"), ("ownerId", "uuid")]);
        source.constraints.push(make_fk("asset", "ownerId", "user"));
        let user = make_table("user", &[("id", "uuid")]);
        let target = make_table("asset", &[("id", "uuid")]);

        let diff = schema_diff(
            &make_schema(vec![source, user.clone()]),
            &make_schema(vec![target, user]),
        );
        insta::assert_snapshot!(diff.to_string(), @r"
        + asset.ownerId: uuid (missing in target)
        + foreign key FK_asset_ownerId on asset (ownerId) (missing in target)
        ");
    }

    fn make_visibility_enum(values: &[&str]) -> Enum {
        Enum {
            name: "asset_visibility_enum".to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
            synchronize: true,
        }
    }

    fn make_asset_with_visibility() -> Table {
        let mut asset = make_table(
            "asset",
            &[("id", "uuid"), ("visibility", "asset_visibility_enum")],
        );
        asset
            .indexes
            .push(Index::new("asset", "IDX_asset_visibility", ["visibility"]));
        asset
    }

    #[test]
    fn test_appended_enum_value_keeps_columns() {
        let mut source = make_schema(vec![make_asset_with_visibility()]);
        source.enums.push(make_visibility_enum(&["timeline", "hidden", "locked"]));
        let mut live = make_schema(vec![make_asset_with_visibility()]);
        live.enums.push(make_visibility_enum(&["timeline", "hidden"]));

        let diff = schema_diff(&source, &live);
        assert_eq!(
            diff.statements(),
            vec!["ALTER TYPE \"asset_visibility_enum\" ADD VALUE IF NOT EXISTS 'locked';"]
        );
        verify_order(&live, &diff.items).expect("plan should apply cleanly");
    }

    #[test]
    fn test_recreated_enum_recreates_its_columns() {
        let mut source = make_schema(vec![make_asset_with_visibility()]);
        source.enums.push(make_visibility_enum(&["timeline", "locked"]));
        let mut live = make_schema(vec![make_asset_with_visibility()]);
        live.enums.push(make_visibility_enum(&["timeline", "hidden"]));

        let diff = schema_diff(&source, &live);
        assert_eq!(
            action_names(&diff),
            vec![
                "IndexDrop",
                "ColumnDrop",
                "EnumDrop",
                "EnumCreate",
                "ColumnCreate",
                "IndexCreate",
            ]
        );
        assert_eq!(
            diff.items[1].reason().to_string(),
            "enum asset_visibility_enum is recreated"
        );
        verify_order(&live, &diff.items).expect("plan should apply cleanly");
    }
}
