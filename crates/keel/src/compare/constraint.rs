use keel_schema::{Constraint, ConstraintKind};

use super::{Comparer, canonical_expression, difference};
use crate::action::{DiffAction, Reason};

pub fn constraint_comparer() -> Comparer<Constraint> {
    Comparer {
        on_extra: |live| vec![drop_constraint(live, Reason::MissingInSource)],
        on_missing: |declared| {
            vec![DiffAction::ConstraintCreate {
                constraint: declared.clone(),
                reason: Reason::MissingInTarget,
            }]
        },
        on_compare: compare_constraints,
    }
}

pub(crate) fn drop_constraint(live: &Constraint, reason: Reason) -> DiffAction {
    DiffAction::ConstraintDrop {
        table_name: live.table_name.clone(),
        constraint_name: live.name.clone(),
        foreign_key: live.is_foreign_key(),
        reason,
    }
}

fn compare_constraints(source: &Constraint, target: &Constraint) -> Vec<DiffAction> {
    let Some(reason) = constraint_difference(source, target) else {
        return Vec::new();
    };
    let reason = Reason::Changed(reason);

    vec![
        drop_constraint(target, reason.clone()),
        DiffAction::ConstraintCreate {
            constraint: source.clone(),
            reason,
        },
    ]
}

fn constraint_difference(source: &Constraint, target: &Constraint) -> Option<String> {
    if source.kind.label() != target.kind.label() {
        return Some(difference(
            "constraint type is",
            source.kind.label(),
            target.kind.label(),
        ));
    }

    if source.column_names != target.column_names {
        return Some(difference(
            "columns are",
            source.column_names.join(","),
            target.column_names.join(","),
        ));
    }

    match (&source.kind, &target.kind) {
        (
            ConstraintKind::ForeignKey {
                reference_table: source_table,
                reference_columns: source_columns,
                on_delete: source_delete,
                on_update: source_update,
            },
            ConstraintKind::ForeignKey {
                reference_table: target_table,
                reference_columns: target_columns,
                on_delete: target_delete,
                on_update: target_update,
            },
        ) => {
            if source_table != target_table {
                return Some(difference("reference table is", source_table, target_table));
            }
            if source_columns != target_columns {
                return Some(difference(
                    "reference columns are",
                    source_columns.join(","),
                    target_columns.join(","),
                ));
            }
            if source_delete != target_delete {
                return Some(difference(
                    "ON DELETE action is",
                    source_delete.to_sql(),
                    target_delete.to_sql(),
                ));
            }
            if source_update != target_update {
                return Some(difference(
                    "ON UPDATE action is",
                    source_update.to_sql(),
                    target_update.to_sql(),
                ));
            }
            None
        }
        (
            ConstraintKind::Check {
                expression: source_expression,
            },
            ConstraintKind::Check {
                expression: target_expression,
            },
        ) => {
            let a = canonical_expression(source_expression);
            let b = canonical_expression(target_expression);
            (a != b).then(|| difference("check expression is", a, b))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_schema::ReferentialAction;

    fn make_fk(on_delete: ReferentialAction) -> Constraint {
        Constraint {
            name: "FK_asset_owner".to_string(),
            table_name: "asset".to_string(),
            column_names: vec!["ownerId".to_string()],
            kind: ConstraintKind::ForeignKey {
                reference_table: "user".to_string(),
                reference_columns: vec!["id".to_string()],
                on_delete,
                on_update: ReferentialAction::Cascade,
            },
            synchronize: true,
        }
    }

    fn make_check(expression: &str) -> Constraint {
        Constraint {
            name: "CHK_size".to_string(),
            table_name: "asset".to_string(),
            column_names: Vec::new(),
            kind: ConstraintKind::Check {
                expression: expression.to_string(),
            },
            synchronize: true,
        }
    }

    #[test]
    fn test_extra_foreign_key_drop_is_flagged() {
        let live = make_fk(ReferentialAction::Cascade);
        assert_eq!(
            (constraint_comparer().on_extra)(&live),
            vec![DiffAction::ConstraintDrop {
                table_name: "asset".to_string(),
                constraint_name: "FK_asset_owner".to_string(),
                foreign_key: true,
                reason: Reason::MissingInSource,
            }]
        );
    }

    #[test]
    fn test_on_delete_change_recreates_constraint() {
        let source = make_fk(ReferentialAction::Cascade);
        let target = make_fk(ReferentialAction::SetNull);

        let actions = (constraint_comparer().on_compare)(&source, &target);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].name(), "ConstraintDrop");
        assert_eq!(actions[1].name(), "ConstraintCreate");
        assert_eq!(
            actions[1].reason().to_string(),
            "ON DELETE action is different (CASCADE vs SET NULL)"
        );
    }

    #[test]
    fn test_check_expression_ignores_pg_parens() {
        let source = make_check("\"fileSize\" >= 0");
        let target = make_check("((\"fileSize\" >= 0))");
        assert!((constraint_comparer().on_compare)(&source, &target).is_empty());

        // parens that do not wrap the whole expression are kept
        let source = make_check("(a > 0) AND (b > 0)");
        let target = make_check("((a > 0) AND (b > 0))");
        assert!((constraint_comparer().on_compare)(&source, &target).is_empty());

        let target = make_check("(a > 1) AND (b > 0)");
        assert_eq!((constraint_comparer().on_compare)(&source, &target).len(), 2);
    }

    #[test]
    fn test_kind_change() {
        let mut source = make_fk(ReferentialAction::Cascade);
        source.kind = ConstraintKind::Unique;
        let target = make_fk(ReferentialAction::Cascade);

        let actions = (constraint_comparer().on_compare)(&source, &target);
        assert_eq!(
            actions[0].reason().to_string(),
            "constraint type is different (unique vs foreign key)"
        );
        // the drop names the live constraint, which is a foreign key
        assert!(matches!(
            actions[0],
            DiffAction::ConstraintDrop {
                foreign_key: true,
                ..
            }
        ));
    }
}
