//! Pure derivation of a target schema name from a `DatabaseRule` and the
//! matched source schema name. No I/O; kept separate from the orchestrator
//! so it can be property-tested in isolation.

use crate::config::{DatabaseRule, NamingStrategy};

/// Derives the target database name for one matched source schema.
///
/// Validation (`config::validate_database_rule`) already guarantees
/// `target_name` is present whenever `naming_strategy` needs it, so this
/// function never fails.
pub fn derive_target_name(rule: &DatabaseRule, original: &str) -> String {
    match rule.naming_strategy {
        NamingStrategy::Original => original.to_string(),
        NamingStrategy::Exact => rule
            .target_name
            .clone()
            .expect("validated: exact naming requires target_name"),
        NamingStrategy::Replace => {
            let replacement = rule
                .target_name
                .as_deref()
                .expect("validated: replace naming requires target_name");
            rule.source_pattern
                .replace(original, replacement)
                .into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use regex::Regex;

    use super::*;

    fn rule(strategy: NamingStrategy, pattern: &str, target: Option<&str>) -> DatabaseRule {
        DatabaseRule {
            source_pattern: Regex::new(pattern).unwrap(),
            target_name: target.map(str::to_string),
            naming_strategy: strategy,
            include_tables: None,
            exclude_tables: None,
            dynamic_tables: None,
            replicate_views: false,
            order_by: "Time".to_string(),
        }
    }

    #[test]
    fn original_is_identity() {
        let rule = rule(NamingStrategy::Original, "^app_.*$", None);
        assert_eq!(derive_target_name(&rule, "app_prod"), "app_prod");
    }

    #[test]
    fn exact_ignores_source_name() {
        let rule = rule(NamingStrategy::Exact, "^app_.*$", Some("warehouse"));
        assert_eq!(derive_target_name(&rule, "app_prod"), "warehouse");
        assert_eq!(derive_target_name(&rule, "app_staging"), "warehouse");
    }

    #[test]
    fn replace_substitutes_pattern() {
        let rule = rule(NamingStrategy::Replace, "^app_", Some("wh_"));
        assert_eq!(derive_target_name(&rule, "app_prod"), "wh_prod");
    }

    #[test]
    fn replace_is_a_pure_function_of_its_inputs() {
        let rule_a = rule(NamingStrategy::Replace, "^app_", Some("wh_"));
        let rule_b = rule(NamingStrategy::Replace, "^app_", Some("wh_"));
        assert_eq!(
            derive_target_name(&rule_a, "app_prod"),
            derive_target_name(&rule_b, "app_prod")
        );
    }
}
