use keel_schema::Table;

use super::Comparer;
use crate::action::{DiffAction, Reason};

/// Tables are created with their columns, followed by their constraints,
/// indexes and triggers. Dropping a table drops everything it owns.
///
/// Tables present on both sides never differ at this level; the planner
/// runs the child comparers over them instead.
pub fn table_comparer() -> Comparer<Table> {
    Comparer {
        on_extra: |live| {
            vec![DiffAction::TableDrop {
                table_name: live.name.clone(),
                reason: Reason::MissingInSource,
            }]
        },
        on_missing: create_table,
        on_compare: |_, _| Vec::new(),
    }
}

fn create_table(declared: &Table) -> Vec<DiffAction> {
    let mut table = declared.clone();
    table.columns.retain(|c| c.synchronize);
    let constraints = std::mem::take(&mut table.constraints);
    let indexes = std::mem::take(&mut table.indexes);
    let triggers = std::mem::take(&mut table.triggers);

    let mut actions = vec![DiffAction::TableCreate {
        table,
        reason: Reason::MissingInTarget,
    }];
    actions.extend(
        constraints
            .into_iter()
            .filter(|c| c.synchronize)
            .map(|constraint| DiffAction::ConstraintCreate {
                constraint,
                reason: Reason::MissingInTarget,
            }),
    );
    actions.extend(
        indexes
            .into_iter()
            .filter(|i| i.synchronize)
            .map(|index| DiffAction::IndexCreate {
                index,
                reason: Reason::MissingInTarget,
            }),
    );
    actions.extend(
        triggers
            .into_iter()
            .filter(|t| t.synchronize)
            .map(|trigger| DiffAction::TriggerCreate {
                trigger,
                reason: Reason::MissingInTarget,
            }),
    );
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_schema::{Column, Constraint, ConstraintKind, Index};

    #[test]
    fn test_missing_table_creates_children_separately() {
        let mut table = Table::new("album");
        table.columns.push(Column::new("album", "id", "uuid"));
        table.constraints.push(Constraint {
            name: "PK_album".to_string(),
            table_name: "album".to_string(),
            column_names: vec!["id".to_string()],
            kind: ConstraintKind::PrimaryKey,
            synchronize: true,
        });
        table.indexes.push(Index::new("album", "IDX_album_id", ["id"]));

        let actions = (table_comparer().on_missing)(&table);
        let names: Vec<_> = actions.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["TableCreate", "ConstraintCreate", "IndexCreate"]);

        let DiffAction::TableCreate { table: created, .. } = &actions[0] else {
            panic!("expected TableCreate");
        };
        assert_eq!(created.columns.len(), 1);
        assert!(created.constraints.is_empty());
        assert!(created.indexes.is_empty());
    }

    #[test]
    fn test_common_tables_emit_nothing() {
        let table = Table::new("album");
        assert!((table_comparer().on_compare)(&table, &Table::new("album")).is_empty());
    }
}
