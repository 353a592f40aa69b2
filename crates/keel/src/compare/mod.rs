//! Per-kind entity comparers.
//!
//! A [`Comparer`] is three plain functions: what to do with an entity that
//! only the database has (`on_extra`), one that only the declared schema has
//! (`on_missing`), and a pair present on both sides (`on_compare`). The
//! planner pairs entities by [`Entity::key`] and calls the right one.

use std::collections::HashSet;

use indexmap::IndexMap;
use keel_schema::{Entity, normalize_sql_expr};

use crate::action::DiffAction;

mod column;
mod constraint;
mod index;
mod objects;
mod table;
mod trigger;

pub use column::column_comparer;
pub use constraint::constraint_comparer;
pub(crate) use constraint::drop_constraint;
pub use index::index_comparer;
pub use objects::{enum_comparer, extension_comparer, function_comparer, parameter_comparer};
pub use table::table_comparer;
pub use trigger::trigger_comparer;

/// How to reconcile one kind of entity.
pub struct Comparer<T> {
    /// Called with a live entity that is not declared.
    pub on_extra: fn(&T) -> Vec<DiffAction>,
    /// Called with a declared entity that is not in the database.
    pub on_missing: fn(&T) -> Vec<DiffAction>,
    /// Called with `(declared, live)` for entities present on both sides.
    pub on_compare: fn(&T, &T) -> Vec<DiffAction>,
}

/// Pair `source` (declared) and `target` (live) entities by key and run the
/// comparer over them.
///
/// Declared entities are visited in declaration order, then extra live
/// entities in database order. An entity with `synchronize == false` on
/// either side is left alone.
pub fn compare<T: Entity>(source: &[T], target: &[T], comparer: &Comparer<T>) -> Vec<DiffAction> {
    let live: IndexMap<String, &T> = target.iter().map(|t| (t.key(), t)).collect();
    let declared: HashSet<String> = source.iter().map(|s| s.key()).collect();

    let mut actions = Vec::new();

    for item in source.iter().filter(|s| s.synchronize()) {
        match live.get(&item.key()) {
            Some(existing) if !existing.synchronize() => {}
            Some(existing) => actions.extend((comparer.on_compare)(item, existing)),
            None => actions.extend((comparer.on_missing)(item)),
        }
    }

    for (key, existing) in &live {
        if existing.synchronize() && !declared.contains(key) {
            actions.extend((comparer.on_extra)(existing));
        }
    }

    actions
}

/// `"<what> are different (<a> vs <b>)"`, the shape every change reason uses.
pub(crate) fn difference(what: &str, source: impl AsRef<str>, target: impl AsRef<str>) -> String {
    format!("{} different ({} vs {})", what, source.as_ref(), target.as_ref())
}

/// Whitespace-normalized `expression` without enclosing parentheses.
///
/// Postgres wraps check expressions, index predicates and trigger
/// conditions in extra parentheses, e.g. `(("fileSize" >= 0))`.
pub(crate) fn canonical_expression(expression: &str) -> String {
    let mut expr = normalize_sql_expr(expression);
    while let Some(inner) = strip_outer_parens(&expr) {
        expr = inner.trim().to_string();
    }
    expr
}

fn strip_outer_parens(expr: &str) -> Option<&str> {
    let inner = expr.strip_prefix('(')?.strip_suffix(')')?;
    // only strip when the opening paren closes at the very end
    let mut depth = 0i32;
    for ch in inner.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}
