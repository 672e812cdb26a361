//! # Rule Evaluator
//!
//! Classifies a customer's [`CustomerMetrics`] against segment condition trees.
//!
//! Evaluation never fails: an unknown operator, or a value whose type the
//! operator cannot use, simply evaluates to `false`. `notEquals` is the plain
//! negation of `equals`, so values of different types are "not equal".

use std::cmp::Ordering;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::metrics::{CustomerMetrics, MetricValue};
use crate::models::{ConditionGroup, GroupOperator, Rule, RuleOperator, Segment};

/// Evaluates one rule against the projected metrics.
pub fn evaluate(rule: &Rule, metrics: &CustomerMetrics) -> bool {
    let field = metrics.get(rule.field);
    let value = &rule.value;

    match rule.operator {
        RuleOperator::Equals => strict_eq(&field, value),
        RuleOperator::NotEquals => !strict_eq(&field, value),
        RuleOperator::GreaterThan => compare(&field, value) == Some(Ordering::Greater),
        RuleOperator::LessThan => compare(&field, value) == Some(Ordering::Less),
        RuleOperator::Contains => contains(&field, value).unwrap_or(false),
        RuleOperator::NotContains => contains(&field, value).is_some_and(|hit| !hit),
        RuleOperator::In => within(&field, value).unwrap_or(false),
        RuleOperator::NotIn => within(&field, value).is_some_and(|hit| !hit),
        RuleOperator::Unknown => false,
    }
}

/// A group holds when all (AND) or any (OR) of its rules hold.
///
/// An empty AND group holds; an empty OR group does not.
pub fn group_matches(group: &ConditionGroup, metrics: &CustomerMetrics) -> bool {
    match group.operator {
        GroupOperator::And => group.rules.iter().all(|rule| evaluate(rule, metrics)),
        GroupOperator::Or => group.rules.iter().any(|rule| evaluate(rule, metrics)),
    }
}

/// Groups are AND-ed; evaluation stops at the first group that fails.
pub fn conditions_match(conditions: &[ConditionGroup], metrics: &CustomerMetrics) -> bool {
    conditions.iter().all(|group| group_matches(group, metrics))
}

pub fn matches_segment(segment: &Segment, metrics: &CustomerMetrics) -> bool {
    conditions_match(&segment.conditions, metrics)
}

fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

fn strict_eq(field: &MetricValue, value: &Value) -> bool {
    match field {
        MetricValue::Number(n) => value.as_f64() == Some(*n),
        MetricValue::Timestamp(t) => as_timestamp(value) == Some(*t),
        MetricValue::Null => value.is_null(),
        MetricValue::List(_) => false,
    }
}

fn compare(field: &MetricValue, value: &Value) -> Option<Ordering> {
    match field {
        MetricValue::Number(n) => n.partial_cmp(&value.as_f64()?),
        MetricValue::Timestamp(t) => Some(t.cmp(&as_timestamp(value)?)),
        MetricValue::List(_) | MetricValue::Null => None,
    }
}

fn contains(field: &MetricValue, value: &Value) -> Option<bool> {
    match (field, value) {
        (MetricValue::List(items), Value::String(needle)) => Some(items.contains(needle)),
        _ => None,
    }
}

fn within(field: &MetricValue, value: &Value) -> Option<bool> {
    let candidates = value.as_array()?;
    let hit = match field {
        MetricValue::List(items) => items
            .iter()
            .any(|item| candidates.iter().any(|c| c.as_str() == Some(item.as_str()))),
        scalar => candidates.iter().any(|c| strict_eq(scalar, c)),
    };
    Some(hit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Customer, RuleField};
    use serde_json::json;

    fn metrics(total_spend: f64) -> CustomerMetrics {
        let mut customer = Customer::new("Asha".into(), "asha@example.com".into());
        customer.total_spend = total_spend;
        customer.total_purchases = 3;
        let mut m = CustomerMetrics::project(&customer, &[], Utc::now());
        m.payment_methods = vec!["card".into(), "upi".into()];
        m
    }

    fn rule(field: RuleField, operator: RuleOperator, value: Value) -> Rule {
        Rule { field, operator, value }
    }

    #[test]
    fn greater_than_on_spend() {
        let r = rule(RuleField::TotalSpend, RuleOperator::GreaterThan, json!(1000));
        assert!(evaluate(&r, &metrics(1500.0)));
        assert!(!evaluate(&r, &metrics(500.0)));
    }

    #[test]
    fn equality_is_strict_on_type() {
        let as_number = rule(RuleField::TotalPurchases, RuleOperator::Equals, json!(3));
        let as_string = rule(RuleField::TotalPurchases, RuleOperator::Equals, json!("3"));
        assert!(evaluate(&as_number, &metrics(0.0)));
        assert!(!evaluate(&as_string, &metrics(0.0)));

        let not_string = rule(RuleField::TotalPurchases, RuleOperator::NotEquals, json!("3"));
        assert!(evaluate(&not_string, &metrics(0.0)));
    }

    #[test]
    fn unknown_operator_is_false() {
        let r = rule(RuleField::TotalSpend, RuleOperator::Unknown, json!(0));
        assert!(!evaluate(&r, &metrics(10.0)));
    }

    #[test]
    fn contains_on_a_number_is_false_both_ways() {
        let c = rule(RuleField::TotalSpend, RuleOperator::Contains, json!("1"));
        let nc = rule(RuleField::TotalSpend, RuleOperator::NotContains, json!("1"));
        assert!(!evaluate(&c, &metrics(10.0)));
        assert!(!evaluate(&nc, &metrics(10.0)));
    }

    #[test]
    fn list_fields_support_membership_operators() {
        let m = metrics(0.0);
        assert!(evaluate(&rule(RuleField::PaymentMethod, RuleOperator::Contains, json!("upi")), &m));
        assert!(evaluate(&rule(RuleField::PaymentMethod, RuleOperator::NotContains, json!("cash")), &m));
        assert!(evaluate(&rule(RuleField::PaymentMethod, RuleOperator::In, json!(["cash", "card"])), &m));
        assert!(evaluate(&rule(RuleField::PaymentMethod, RuleOperator::NotIn, json!(["cash"])), &m));
        assert!(!evaluate(&rule(RuleField::PaymentMethod, RuleOperator::Equals, json!("card")), &m));
    }

    #[test]
    fn in_requires_a_list_value() {
        let m = metrics(100.0);
        assert!(evaluate(&rule(RuleField::TotalSpend, RuleOperator::In, json!([50, 100])), &m));
        assert!(!evaluate(&rule(RuleField::TotalSpend, RuleOperator::In, json!(100)), &m));
        assert!(!evaluate(&rule(RuleField::TotalSpend, RuleOperator::NotIn, json!(100)), &m));
    }

    #[test]
    fn last_purchase_compares_as_time() {
        let mut m = metrics(0.0);
        m.last_purchase = DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z")
            .ok()
            .map(|t| t.with_timezone(&Utc));
        let after = rule(RuleField::LastPurchase, RuleOperator::GreaterThan, json!("2024-01-01T00:00:00Z"));
        let before = rule(RuleField::LastPurchase, RuleOperator::LessThan, json!("2024-01-01T00:00:00Z"));
        assert!(evaluate(&after, &m));
        assert!(!evaluate(&before, &m));

        m.last_purchase = None;
        assert!(!evaluate(&after, &m));
        assert!(!evaluate(&before, &m));
    }

    #[test]
    fn group_operators_reduce_rules() {
        let high = rule(RuleField::TotalSpend, RuleOperator::GreaterThan, json!(1000));
        let frequent = rule(RuleField::TotalPurchases, RuleOperator::GreaterThan, json!(2));
        let m = metrics(500.0);

        let and = ConditionGroup { operator: GroupOperator::And, rules: vec![high.clone(), frequent.clone()] };
        let or = ConditionGroup { operator: GroupOperator::Or, rules: vec![high, frequent] };
        assert!(!group_matches(&and, &m));
        assert!(group_matches(&or, &m));
    }

    #[test]
    fn empty_groups_follow_all_and_any() {
        let m = metrics(0.0);
        let and = ConditionGroup { operator: GroupOperator::And, rules: vec![] };
        let or = ConditionGroup { operator: GroupOperator::Or, rules: vec![] };
        assert!(group_matches(&and, &m));
        assert!(!group_matches(&or, &m));
        assert!(conditions_match(&[], &m));
    }

    #[test]
    fn groups_are_anded_together() {
        let m = metrics(1500.0);
        let pass = ConditionGroup {
            operator: GroupOperator::And,
            rules: vec![rule(RuleField::TotalSpend, RuleOperator::GreaterThan, json!(1000))],
        };
        let fail = ConditionGroup {
            operator: GroupOperator::Or,
            rules: vec![rule(RuleField::TotalPurchases, RuleOperator::GreaterThan, json!(10))],
        };
        assert!(conditions_match(&[pass.clone()], &m));
        assert!(!conditions_match(&[pass, fail], &m));
    }
}
