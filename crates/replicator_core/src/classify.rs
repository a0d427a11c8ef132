//! Table classifier: splits reflected source tables into
//! `{View, Dynamic, Ordered, Excluded}` by regex, in a fixed, load-bearing
//! order. Pure and I/O-free so classification can be tested exhaustively
//! against hand-built inputs without a database.

use std::collections::HashSet;

use crate::config::DatabaseRule;

/// The class a single reflected table or view falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableClass {
    View,
    Dynamic,
    Ordered,
    Excluded,
}

/// Classifies one table name. `is_view` must come from the source's
/// reflected view set, not a name heuristic.
///
/// Rule order (first match wins):
/// 1. views
/// 2. `dynamic_tables`
/// 3. `exclude_tables`
/// 4. `include_tables` (if set, non-matches fall to `Excluded` rather than
///    silently vanishing, so every table lands in exactly one class)
pub fn classify_table(name: &str, is_view: bool, rule: &DatabaseRule) -> TableClass {
    if is_view {
        return TableClass::View;
    }
    if matches(&rule.dynamic_tables, name) {
        return TableClass::Dynamic;
    }
    if matches(&rule.exclude_tables, name) {
        return TableClass::Excluded;
    }
    match &rule.include_tables {
        Some(re) if !re.is_match(name) => TableClass::Excluded,
        _ => TableClass::Ordered,
    }
}

fn matches(pattern: &Option<regex::Regex>, name: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(name))
}

/// The four disjoint output sets produced by classifying every reflected
/// name of a schema.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub views: Vec<String>,
    pub dynamic: Vec<String>,
    pub ordered: Vec<String>,
    pub excluded: Vec<String>,
}

/// Classifies every reflected table/view name of one schema.
///
/// `views` holds the names the gateway reported as views; `tables` holds
/// every other reflected name. A view-replication decision (whether to
/// actually copy the view) is the materializer's job: this function
/// only reports that a name *is* a view when `replicate_views` allows it
/// through, so non-replicated views simply disappear from all four output
/// sets (they're neither copied nor mistaken for an excluded table).
pub fn classify_schema(
    tables: impl IntoIterator<Item = impl AsRef<str>>,
    views: &HashSet<String>,
    rule: &DatabaseRule,
) -> Classification {
    let mut out = Classification::default();
    for name in tables {
        let name = name.as_ref();
        let is_view = views.contains(name);
        match classify_table(name, is_view, rule) {
            TableClass::View => {
                if rule.replicate_views {
                    out.views.push(name.to_string());
                }
            }
            TableClass::Dynamic => out.dynamic.push(name.to_string()),
            TableClass::Ordered => out.ordered.push(name.to_string()),
            TableClass::Excluded => out.excluded.push(name.to_string()),
        }
    }
    out
}
