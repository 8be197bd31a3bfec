//! Condition evaluator: decides which branch a `condition` node takes.
//!
//! The comparison rules intentionally differ per operator (some trim, some lowercase,
//! `contains` does neither). Flows authored against the editor preview depend on those
//! exact normalizations, so do not unify them.

use crate::flow::model::{Combinator, Operator, Rule};
use crate::flow::value::{js_number, js_string, js_truthy, string_to_js_number, Bindings, Scalar};

/// Evaluates a rule set. An empty rule set passes.
pub fn evaluate(combinator: &Combinator, rules: &[Rule], bindings: &Bindings) -> bool {
    if combinator.is_or() {
        rules.is_empty() || rules.iter().any(|rule| evaluate_rule(rule, bindings))
    } else {
        rules.iter().all(|rule| evaluate_rule(rule, bindings))
    }
}

/// Evaluates one rule against the binding named by `rule.field`.
pub fn evaluate_rule(rule: &Rule, bindings: &Bindings) -> bool {
    let field = bindings.get(&rule.field);
    let expected = rule.value.as_str();

    match rule.operator {
        Operator::Equals => normalize(&js_string(field)) == normalize(expected),
        Operator::NotEquals => normalize(&js_string(field)) != normalize(expected),
        Operator::Contains => js_string(field).contains(expected),
        Operator::StartsWith => js_string(field)
            .to_lowercase()
            .starts_with(&expected.to_lowercase()),
        Operator::EndsWith => js_string(field)
            .to_lowercase()
            .ends_with(&expected.to_lowercase()),
        // NaN on either side compares false.
        Operator::GreaterThan => js_number(field) > string_to_js_number(expected),
        Operator::LessThan => js_number(field) < string_to_js_number(expected),
        Operator::IsEmpty => is_empty(field),
        Operator::IsNotEmpty => !is_empty(field),
        Operator::InList => in_list(field, expected),
        Operator::NotInList => !in_list(field, expected),
        Operator::Unknown(_) => false,
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

fn is_empty(field: Option<&Scalar>) -> bool {
    !js_truthy(field) || js_string(field).trim().is_empty()
}

fn in_list(field: Option<&Scalar>, list: &str) -> bool {
    let needle = normalize(&js_string(field));
    list.split(',').any(|item| normalize(item) == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, Scalar)]) -> Bindings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn s(v: &str) -> Scalar {
        Scalar::String(v.to_string())
    }

    #[test]
    fn test_empty_rules_pass_for_both_combinators() {
        let b = Bindings::new();
        assert!(evaluate(&Combinator::And, &[], &b));
        assert!(evaluate(&Combinator::Or, &[], &b));
    }

    #[test]
    fn test_and_requires_every_rule() {
        let b = bindings(&[("a", s("x")), ("b", s("y"))]);
        let rules = vec![
            Rule::new("a", Operator::Equals, "x"),
            Rule::new("b", Operator::Equals, "nope"),
        ];
        assert!(!evaluate(&Combinator::And, &rules, &b));
        assert!(evaluate(&Combinator::Or, &rules, &b));
        assert!(evaluate(&Combinator::And, &rules[..1], &b));
    }

    #[test]
    fn test_unrecognized_combinator_behaves_as_and() {
        let b = bindings(&[("a", s("x"))]);
        let rules = vec![
            Rule::new("a", Operator::Equals, "x"),
            Rule::new("a", Operator::Equals, "y"),
        ];
        assert!(!evaluate(&Combinator::Other("xor".into()), &rules, &b));
        assert!(evaluate(&Combinator::Other(" OR ".into()), &rules, &b));
    }

    #[test]
    fn test_or_fails_when_no_rule_matches() {
        let b = bindings(&[("a", s("x"))]);
        let rules = vec![
            Rule::new("a", Operator::Equals, "y"),
            Rule::new("a", Operator::Equals, "z"),
        ];
        assert!(!evaluate(&Combinator::Or, &rules, &b));
    }

    #[test]
    fn test_equals_trims_and_ignores_case() {
        let b = bindings(&[("ab", s("  A "))]);
        assert!(evaluate_rule(&Rule::new("ab", Operator::Equals, "a"), &b));
        assert!(!evaluate_rule(&Rule::new("ab", Operator::NotEquals, " a"), &b));
    }

    #[test]
    fn test_equals_on_numbers_uses_js_string_form() {
        let b = bindings(&[("years", Scalar::Number(5.0)), ("flag", Scalar::Bool(true))]);
        assert!(evaluate_rule(&Rule::new("years", Operator::Equals, "5"), &b));
        assert!(evaluate_rule(&Rule::new("flag", Operator::Equals, "TRUE"), &b));
    }

    #[test]
    fn test_missing_field_stringifies_as_undefined() {
        let b = Bindings::new();
        assert!(evaluate_rule(&Rule::new("x", Operator::Equals, "undefined"), &b));
        assert!(evaluate_rule(&Rule::new("x", Operator::NotEquals, "a"), &b));
    }

    #[test]
    fn test_contains_is_case_sensitive_and_untrimmed() {
        let b = bindings(&[("skills", s("Rust, Go"))]);
        assert!(evaluate_rule(&Rule::new("skills", Operator::Contains, "Rust"), &b));
        assert!(!evaluate_rule(&Rule::new("skills", Operator::Contains, "rust"), &b));
        assert!(!evaluate_rule(&Rule::new("skills", Operator::Contains, " Rust"), &b));
    }

    #[test]
    fn test_starts_and_ends_with_lowercase_without_trim() {
        let b = bindings(&[("email", s("Jane@Example.COM"))]);
        assert!(evaluate_rule(&Rule::new("email", Operator::StartsWith, "jane"), &b));
        assert!(evaluate_rule(&Rule::new("email", Operator::EndsWith, "example.com"), &b));
        assert!(!evaluate_rule(&Rule::new("email", Operator::EndsWith, "example.com "), &b));
    }

    #[test]
    fn test_greater_than_with_numeric_string() {
        let rule = Rule::new("age", Operator::GreaterThan, "18");
        assert!(evaluate_rule(&rule, &bindings(&[("age", s("21"))])));
        assert!(!evaluate_rule(&rule, &bindings(&[("age", s("18"))])));
    }

    #[test]
    fn test_numeric_comparison_with_non_numbers_is_false() {
        let gt = Rule::new("age", Operator::GreaterThan, "18");
        let lt = Rule::new("age", Operator::LessThan, "18");
        let b = bindings(&[("age", s("not-a-number"))]);
        assert!(!evaluate_rule(&gt, &b));
        assert!(!evaluate_rule(&lt, &b));
        assert!(!evaluate_rule(&gt, &Bindings::new()));
        let bad_threshold = Rule::new("age", Operator::LessThan, "abc");
        assert!(!evaluate_rule(&bad_threshold, &bindings(&[("age", s("3"))])));
    }

    #[test]
    fn test_empty_string_compares_as_zero() {
        let b = bindings(&[("n", s(""))]);
        assert!(evaluate_rule(&Rule::new("n", Operator::LessThan, "1"), &b));
    }

    #[test]
    fn test_is_empty_follows_truthiness() {
        let rule = Rule::new("x", Operator::IsEmpty, "");
        assert!(evaluate_rule(&rule, &Bindings::new()));
        assert!(evaluate_rule(&rule, &bindings(&[("x", s("   "))])));
        assert!(evaluate_rule(&rule, &bindings(&[("x", Scalar::Number(0.0))])));
        assert!(evaluate_rule(&rule, &bindings(&[("x", Scalar::Bool(false))])));
        assert!(!evaluate_rule(&rule, &bindings(&[("x", s("a"))])));

        let not_empty = Rule::new("x", Operator::IsNotEmpty, "");
        assert!(evaluate_rule(&not_empty, &bindings(&[("x", Scalar::Number(7.0))])));
    }

    #[test]
    fn test_in_list_is_case_and_space_insensitive() {
        let rule = Rule::new("role", Operator::InList, "admin, editor");
        assert!(evaluate_rule(&rule, &bindings(&[("role", s("Editor"))])));
        assert!(evaluate_rule(&rule, &bindings(&[("role", s(" ADMIN "))])));
        assert!(!evaluate_rule(&rule, &bindings(&[("role", s("viewer"))])));
    }

    #[test]
    fn test_in_list_and_not_in_list_are_complements() {
        let cases = [
            (Some(s("Editor")), "admin, editor"),
            (Some(s("viewer")), "admin, editor"),
            (None, "undefined"),
            (None, ""),
            (Some(s("")), ""),
            (Some(Scalar::Number(3.0)), "1,2,3"),
            (Some(Scalar::Bool(false)), "true"),
        ];
        for (value, list) in cases {
            let mut b = Bindings::new();
            if let Some(v) = value {
                b.insert("f".to_string(), v);
            }
            let yes = evaluate_rule(&Rule::new("f", Operator::InList, list), &b);
            let no = evaluate_rule(&Rule::new("f", Operator::NotInList, list), &b);
            assert!(yes ^ no, "list {list:?}");
        }
    }

    #[test]
    fn test_unknown_operator_never_matches() {
        let b = bindings(&[("x", s("a"))]);
        let rule = Rule::new("x", Operator::Unknown("matches_regex".into()), "a");
        assert!(!evaluate_rule(&rule, &b));
    }
}
