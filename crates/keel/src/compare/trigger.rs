use keel_schema::Trigger;

use super::{Comparer, canonical_expression, difference};
use crate::action::{DiffAction, Reason};

pub fn trigger_comparer() -> Comparer<Trigger> {
    Comparer {
        on_extra: |live| {
            vec![DiffAction::TriggerDrop {
                table_name: live.table_name.clone(),
                trigger_name: live.name.clone(),
                reason: Reason::MissingInSource,
            }]
        },
        on_missing: |declared| {
            vec![DiffAction::TriggerCreate {
                trigger: declared.clone(),
                reason: Reason::MissingInTarget,
            }]
        },
        on_compare: compare_triggers,
    }
}

fn compare_triggers(source: &Trigger, target: &Trigger) -> Vec<DiffAction> {
    let Some(reason) = trigger_difference(source, target) else {
        return Vec::new();
    };
    let reason = Reason::Changed(reason);

    vec![
        DiffAction::TriggerDrop {
            table_name: target.table_name.clone(),
            trigger_name: target.name.clone(),
            reason: reason.clone(),
        },
        DiffAction::TriggerCreate {
            trigger: source.clone(),
            reason,
        },
    ]
}

fn trigger_difference(source: &Trigger, target: &Trigger) -> Option<String> {
    if source.timing != target.timing {
        return Some(difference(
            "timing is",
            source.timing.to_string(),
            target.timing.to_string(),
        ));
    }

    let mut source_actions: Vec<String> = source.actions.iter().map(|a| a.to_string()).collect();
    let mut target_actions: Vec<String> = target.actions.iter().map(|a| a.to_string()).collect();
    source_actions.sort();
    target_actions.sort();
    if source_actions != target_actions {
        return Some(difference(
            "actions are",
            source_actions.join(","),
            target_actions.join(","),
        ));
    }

    if source.scope != target.scope {
        return Some(difference(
            "scope is",
            source.scope.to_string(),
            target.scope.to_string(),
        ));
    }

    if source.function_name != target.function_name {
        return Some(difference(
            "function is",
            &source.function_name,
            &target.function_name,
        ));
    }

    if source.referencing_old_table_as != target.referencing_old_table_as
        || source.referencing_new_table_as != target.referencing_new_table_as
    {
        return Some("referencing table names are different".to_string());
    }

    let source_when = source.when.as_deref().map(canonical_expression);
    let target_when = target.when.as_deref().map(canonical_expression);
    if source_when != target_when {
        return Some(difference(
            "when clause is",
            source_when.as_deref().unwrap_or("(none)"),
            target_when.as_deref().unwrap_or("(none)"),
        ));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_schema::{TriggerAction, TriggerScope, TriggerTiming};

    fn make_trigger(actions: Vec<TriggerAction>) -> Trigger {
        Trigger {
            name: "asset_updated_at".to_string(),
            table_name: "asset".to_string(),
            timing: TriggerTiming::Before,
            actions,
            scope: TriggerScope::Row,
            function_name: "updated_at".to_string(),
            referencing_old_table_as: None,
            referencing_new_table_as: None,
            when: Some("pg_trigger_depth() = 0".to_string()),
            synchronize: true,
        }
    }

    #[test]
    fn test_action_order_does_not_matter() {
        let source = make_trigger(vec![TriggerAction::Insert, TriggerAction::Update]);
        let target = make_trigger(vec![TriggerAction::Update, TriggerAction::Insert]);
        assert!((trigger_comparer().on_compare)(&source, &target).is_empty());
    }

    #[test]
    fn test_scope_change_recreates_trigger() {
        let source = make_trigger(vec![TriggerAction::Update]);
        let mut target = source.clone();
        target.scope = TriggerScope::Statement;

        let actions = (trigger_comparer().on_compare)(&source, &target);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].name(), "TriggerDrop");
        assert_eq!(
            actions[1].reason().to_string(),
            "scope is different (ROW vs STATEMENT)"
        );
    }
}
