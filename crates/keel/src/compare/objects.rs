//! Comparers for schema-level objects that are not owned by a table.

use keel_schema::{Enum, Extension, Function, Parameter, normalize_sql_expr};

use super::{Comparer, difference};
use crate::action::{DiffAction, Reason};

/// Appended values are added in place. Any other change recreates the type,
/// and the planner recreates the columns that use it.
pub fn enum_comparer() -> Comparer<Enum> {
    Comparer {
        on_extra: |live| {
            vec![DiffAction::EnumDrop {
                enum_name: live.name.clone(),
                reason: Reason::MissingInSource,
            }]
        },
        on_missing: |declared| {
            vec![DiffAction::EnumCreate {
                r#enum: declared.clone(),
                reason: Reason::MissingInTarget,
            }]
        },
        on_compare: |source, target| {
            if source.values == target.values {
                return Vec::new();
            }
            let reason = Reason::Changed(difference(
                "enum values are",
                source.values.join(","),
                target.values.join(","),
            ));
            if source.values.starts_with(&target.values) {
                return source.values[target.values.len()..]
                    .iter()
                    .map(|value| DiffAction::EnumAddValue {
                        enum_name: target.name.clone(),
                        value: value.clone(),
                        reason: reason.clone(),
                    })
                    .collect();
            }
            vec![
                DiffAction::EnumDrop {
                    enum_name: target.name.clone(),
                    reason: reason.clone(),
                },
                DiffAction::EnumCreate {
                    r#enum: source.clone(),
                    reason,
                },
            ]
        },
    }
}

pub fn extension_comparer() -> Comparer<Extension> {
    Comparer {
        on_extra: |live| {
            vec![DiffAction::ExtensionDrop {
                extension_name: live.name.clone(),
                reason: Reason::MissingInSource,
            }]
        },
        on_missing: |declared| {
            vec![DiffAction::ExtensionCreate {
                extension: declared.clone(),
                reason: Reason::MissingInTarget,
            }]
        },
        on_compare: |_, _| Vec::new(),
    }
}

/// Functions are declared as `CREATE OR REPLACE`, so a changed body is
/// replaced in place. Dropping it would fail while triggers still use it.
pub fn function_comparer() -> Comparer<Function> {
    Comparer {
        on_extra: |live| {
            vec![DiffAction::FunctionDrop {
                function_name: live.name.clone(),
                reason: Reason::MissingInSource,
            }]
        },
        on_missing: |declared| {
            vec![DiffAction::FunctionCreate {
                function: declared.clone(),
                reason: Reason::MissingInTarget,
            }]
        },
        on_compare: |source, target| {
            if function_body(&source.expression) == function_body(&target.expression) {
                return Vec::new();
            }
            vec![DiffAction::FunctionCreate {
                function: source.clone(),
                reason: Reason::Changed("function expression is different".to_string()),
            }]
        },
    }
}

/// The whitespace-normalized text between the first dollar-quote pair.
///
/// `pg_get_functiondef` rewrites the header and the quote tag (`$function$`),
/// so only the body is comparable with what was declared.
pub(crate) fn function_body(expression: &str) -> String {
    dollar_quoted(expression)
        .map(normalize_sql_expr)
        .unwrap_or_else(|| normalize_sql_expr(expression))
}

fn dollar_quoted(expression: &str) -> Option<&str> {
    let open = expression.find('$')?;
    let tag_len = expression[open + 1..].find('$')? + 2;
    let tag = &expression[open..open + tag_len];
    if !tag[1..tag.len() - 1]
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }
    let body_start = open + tag_len;
    let body_len = expression[body_start..].find(tag)?;
    Some(&expression[body_start..body_start + body_len])
}

pub fn parameter_comparer() -> Comparer<Parameter> {
    Comparer {
        on_extra: |live| {
            vec![DiffAction::ParameterDrop {
                database_name: live.database_name.clone(),
                parameter_name: live.name.clone(),
                scope: live.scope,
                reason: Reason::MissingInSource,
            }]
        },
        on_missing: |declared| {
            vec![DiffAction::ParameterCreate {
                parameter: declared.clone(),
                reason: Reason::MissingInTarget,
            }]
        },
        on_compare: |source, target| {
            if source.value == target.value && source.scope == target.scope {
                return Vec::new();
            }
            // setting a parameter overwrites the previous value
            vec![DiffAction::ParameterCreate {
                parameter: source.clone(),
                reason: Reason::Changed(difference("value is", &source.value, &target.value)),
            }]
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_schema::ParameterScope;

    fn make_enum(values: &[&str]) -> Enum {
        Enum {
            name: "assets_status_enum".to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
            synchronize: true,
        }
    }

    #[test]
    fn test_enum_appended_values_are_added() {
        let source = make_enum(&["active", "trashed", "deleted"]);
        let target = make_enum(&["active"]);

        let actions = (enum_comparer().on_compare)(&source, &target);
        let added: Vec<_> = actions
            .iter()
            .map(|a| match a {
                DiffAction::EnumAddValue { value, .. } => value.as_str(),
                other => panic!("unexpected {}", other.name()),
            })
            .collect();
        assert_eq!(added, vec!["trashed", "deleted"]);
        assert_eq!(
            actions[0].reason().to_string(),
            "enum values are different (active,trashed,deleted vs active)"
        );
    }

    #[test]
    fn test_enum_removed_value_recreates_type() {
        let source = make_enum(&["active"]);
        let target = make_enum(&["active", "trashed"]);

        let actions = (enum_comparer().on_compare)(&source, &target);
        let names: Vec<_> = actions.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["EnumDrop", "EnumCreate"]);
    }

    #[test]
    fn test_enum_reordered_values_recreate_type() {
        let source = make_enum(&["trashed", "active"]);
        let target = make_enum(&["active", "trashed"]);

        let actions = (enum_comparer().on_compare)(&source, &target);
        let names: Vec<_> = actions.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["EnumDrop", "EnumCreate"]);
    }

    #[test]
    fn test_function_body_survives_pg_rewrite() {
        let declared = "CREATE OR REPLACE FUNCTION updated_at()\n  RETURNS TRIGGER\n  LANGUAGE PLPGSQL\n  AS $$\n    BEGIN\n      new.\"updatedAt\" = now();\n      return new;\n    END;\n  $$;";
        let introspected = "CREATE OR REPLACE FUNCTION public.updated_at()\n RETURNS trigger\n LANGUAGE plpgsql\nAS $function$\n    BEGIN\n      new.\"updatedAt\" = now();\n      return new;\n    END;\n  $function$\n";
        assert_eq!(function_body(declared), function_body(introspected));
        assert_eq!(
            function_body(declared),
            "BEGIN new.\"updatedAt\" = now(); return new; END;"
        );
    }

    #[test]
    fn test_function_change_is_replaced_in_place() {
        let source = Function {
            name: "f".to_string(),
            expression: "CREATE OR REPLACE FUNCTION f() RETURNS int AS $$ SELECT 2 $$ LANGUAGE sql"
                .to_string(),
            synchronize: true,
        };
        let mut target = source.clone();
        target.expression = target.expression.replace("2", "1");

        let actions = (function_comparer().on_compare)(&source, &target);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].name(), "FunctionCreate");
    }

    #[test]
    fn test_parameter_value_change() {
        let source = Parameter {
            name: "search_path".to_string(),
            database_name: "immich".to_string(),
            value: "\"$user\", public, vectors".to_string(),
            scope: ParameterScope::Database,
            synchronize: true,
        };
        let mut target = source.clone();
        target.value = "\"$user\", public".to_string();

        let actions = (parameter_comparer().on_compare)(&source, &target);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].name(), "ParameterCreate");
    }
}
