use keel_schema::Index;

use super::{Comparer, canonical_expression, difference};
use crate::action::{DiffAction, Reason};

pub fn index_comparer() -> Comparer<Index> {
    Comparer {
        on_extra: |live| {
            vec![DiffAction::IndexDrop {
                index_name: live.name.clone(),
                reason: Reason::MissingInSource,
            }]
        },
        on_missing: |declared| {
            vec![DiffAction::IndexCreate {
                index: declared.clone(),
                reason: Reason::MissingInTarget,
            }]
        },
        on_compare: compare_indexes,
    }
}

fn compare_indexes(source: &Index, target: &Index) -> Vec<DiffAction> {
    let Some(reason) = index_difference(source, target) else {
        return Vec::new();
    };
    let reason = Reason::Changed(reason);

    vec![
        DiffAction::IndexDrop {
            index_name: target.name.clone(),
            reason: reason.clone(),
        },
        DiffAction::IndexCreate {
            index: source.clone(),
            reason,
        },
    ]
}

fn index_difference(source: &Index, target: &Index) -> Option<String> {
    if source.column_names != target.column_names {
        return Some(difference(
            "columns are",
            source.column_names.join(","),
            target.column_names.join(","),
        ));
    }

    if source.unique != target.unique {
        return Some(difference(
            "uniqueness is",
            source.unique.to_string(),
            target.unique.to_string(),
        ));
    }

    let source_using = access_method(source);
    let target_using = access_method(target);
    if source_using != target_using {
        return Some(difference("using method is", source_using, target_using));
    }

    let source_where = source.where_clause.as_deref().map(canonical_expression);
    let target_where = target.where_clause.as_deref().map(canonical_expression);
    if source_where != target_where {
        return Some(difference(
            "where clause is",
            source_where.as_deref().unwrap_or("(none)"),
            target_where.as_deref().unwrap_or("(none)"),
        ));
    }

    None
}

fn access_method(index: &Index) -> String {
    index
        .using
        .as_deref()
        .unwrap_or("btree")
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn drop_and_create(source: &Index, reason: &str) -> Vec<DiffAction> {
        vec![
            DiffAction::IndexDrop {
                index_name: source.name.clone(),
                reason: Reason::Changed(reason.to_string()),
            },
            DiffAction::IndexCreate {
                index: source.clone(),
                reason: Reason::Changed(reason.to_string()),
            },
        ]
    }

    #[test]
    fn test_extra_index_is_dropped() {
        let live = Index::new("table1", "test", ["column1"]);
        assert_eq!(
            (index_comparer().on_extra)(&live),
            vec![DiffAction::IndexDrop {
                index_name: "test".to_string(),
                reason: Reason::MissingInSource,
            }]
        );
    }

    #[test]
    fn test_missing_index_is_created() {
        let declared = Index::new("table1", "test", ["column1"]);
        assert_eq!(
            (index_comparer().on_missing)(&declared),
            vec![DiffAction::IndexCreate {
                index: declared.clone(),
                reason: Reason::MissingInTarget,
            }]
        );
    }

    #[test]
    fn test_different_columns_recreate_the_index() {
        let source = Index::new("table1", "test", ["column1"]);
        let target = Index::new("table1", "test", ["column1", "column2"]);

        assert_eq!(
            (index_comparer().on_compare)(&source, &target),
            drop_and_create(&source, "columns are different (column1 vs column1,column2)")
        );
    }

    #[test]
    fn test_column_order_is_significant() {
        let source = Index::new("table1", "test", ["column2", "column1"]);
        let target = Index::new("table1", "test", ["column1", "column2"]);

        assert_eq!(
            (index_comparer().on_compare)(&source, &target),
            drop_and_create(
                &source,
                "columns are different (column2,column1 vs column1,column2)"
            )
        );
    }

    #[test]
    fn test_uniqueness_change() {
        let mut source = Index::new("table1", "test", ["column1"]);
        source.unique = true;
        let target = Index::new("table1", "test", ["column1"]);

        assert_eq!(
            (index_comparer().on_compare)(&source, &target),
            drop_and_create(&source, "uniqueness is different (true vs false)")
        );
    }

    #[test]
    fn test_default_access_method_is_btree() {
        let source = Index::new("table1", "test", ["column1"]);
        let mut target = Index::new("table1", "test", ["column1"]);
        target.using = Some("BTREE".to_string());
        assert!((index_comparer().on_compare)(&source, &target).is_empty());

        target.using = Some("gin".to_string());
        assert_eq!(
            (index_comparer().on_compare)(&source, &target),
            drop_and_create(&source, "using method is different (btree vs gin)")
        );
    }

    #[test]
    fn test_where_clause_ignores_whitespace() {
        let mut source = Index::new("asset", "IDX_active", ["ownerId"]);
        source.where_clause = Some("\"deletedAt\" IS NULL".to_string());
        let mut target = source.clone();
        target.where_clause = Some("\"deletedAt\"   IS\nNULL".to_string());

        assert!((index_comparer().on_compare)(&source, &target).is_empty());
    }

    #[test]
    fn test_where_clause_ignores_pg_parens() {
        let mut source = Index::new("asset", "IDX_active", ["ownerId"]);
        source.where_clause = Some("\"deletedAt\" IS NULL".to_string());
        let mut target = source.clone();
        target.where_clause = Some("(\"deletedAt\" IS NULL)".to_string());

        assert!((index_comparer().on_compare)(&source, &target).is_empty());
    }

    fn columns() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("[a-z]{1,6}", 1..4)
    }

    proptest! {
        #[test]
        fn prop_identical_indexes_compare_equal(cols in columns(), unique in any::<bool>()) {
            let mut source = Index::new("t", "idx", cols.clone());
            source.unique = unique;
            let target = source.clone();
            prop_assert!((index_comparer().on_compare)(&source, &target).is_empty());
        }

        #[test]
        fn prop_different_columns_give_drop_then_create(a in columns(), b in columns()) {
            prop_assume!(a != b);
            let source = Index::new("t", "idx", a.clone());
            let target = Index::new("t", "idx", b.clone());

            let actions = (index_comparer().on_compare)(&source, &target);
            let reason = format!("columns are different ({} vs {})", a.join(","), b.join(","));
            prop_assert_eq!(actions, drop_and_create(&source, &reason));
        }
    }
}
