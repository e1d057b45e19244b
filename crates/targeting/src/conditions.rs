//! Condition evaluation over the visitor context.
//!
//! Fields resolve through a fixed allow-list. Unknown fields, unknown
//! operators and type mismatches evaluate to `false` and are logged, so a
//! single bad rule never aborts a filter pass.

use std::cmp::Ordering;

use popup_core::types::{Condition, ConditionOperator, LogicOperator, RuleSet, VisitorContext};
use serde_json::Value;
use tracing::warn;

/// Context attributes a condition may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextField {
    IsReturningVisitor,
    CartValue,
    CartItemCount,
    DeviceType,
    PageType,
    Country,
    SessionPageViews,
    IsLoggedIn,
    Referrer,
    UtmSource,
}

impl ContextField {
    pub fn parse(name: &str) -> Option<Self> {
        let field = match name {
            "isReturningVisitor" | "is_returning_visitor" => ContextField::IsReturningVisitor,
            "cartValue" | "cart_value" => ContextField::CartValue,
            "cartItemCount" | "cart_item_count" => ContextField::CartItemCount,
            "deviceType" | "device_type" => ContextField::DeviceType,
            "pageType" | "page_type" => ContextField::PageType,
            "country" | "countryCode" | "country_code" => ContextField::Country,
            "sessionPageViews" | "session_page_views" => ContextField::SessionPageViews,
            "isLoggedIn" | "is_logged_in" => ContextField::IsLoggedIn,
            "referrer" => ContextField::Referrer,
            "utmSource" | "utm_source" => ContextField::UtmSource,
            _ => return None,
        };
        Some(field)
    }

    pub fn resolve(&self, context: &VisitorContext) -> Value {
        match self {
            ContextField::IsReturningVisitor => Value::Bool(context.is_returning_visitor),
            ContextField::CartValue => serde_json::json!(context.cart.total_value),
            ContextField::CartItemCount => serde_json::json!(context.cart.item_count()),
            ContextField::DeviceType => Value::String(context.device.as_str().to_string()),
            ContextField::PageType => Value::String(context.page_type.as_str().to_string()),
            ContextField::Country => optional_string(&context.country),
            ContextField::SessionPageViews => serde_json::json!(context.session_page_views),
            ContextField::IsLoggedIn => Value::Bool(context.is_logged_in),
            ContextField::Referrer => optional_string(&context.referrer),
            ContextField::UtmSource => optional_string(&context.utm_source),
        }
    }
}

fn optional_string(value: &Option<String>) -> Value {
    value
        .as_ref()
        .map_or(Value::Null, |s| Value::String(s.clone()))
}

/// Evaluate one condition against the context.
pub fn evaluate(condition: &Condition, context: &VisitorContext) -> bool {
    let Some(field) = ContextField::parse(&condition.field) else {
        warn!(field = %condition.field, "unknown condition field, failing closed");
        return false;
    };
    let actual = field.resolve(context);
    compare_values(&actual, condition.operator, &condition.value)
}

/// Evaluate a flat rule set. An empty rule set matches everyone.
pub fn evaluate_rule_set(rules: &RuleSet, context: &VisitorContext) -> bool {
    if rules.conditions.is_empty() {
        return true;
    }
    match rules.logic_operator {
        LogicOperator::And => rules.conditions.iter().all(|c| evaluate(c, context)),
        LogicOperator::Or => rules.conditions.iter().any(|c| evaluate(c, context)),
    }
}

pub fn compare_values(actual: &Value, operator: ConditionOperator, expected: &Value) -> bool {
    match operator {
        ConditionOperator::Eq => loosely_equal(actual, expected),
        ConditionOperator::Ne => !actual.is_null() && !loosely_equal(actual, expected),
        ConditionOperator::Gt => numeric_cmp(actual, expected) == Some(Ordering::Greater),
        ConditionOperator::Gte => matches!(
            numeric_cmp(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        ConditionOperator::Lt => numeric_cmp(actual, expected) == Some(Ordering::Less),
        ConditionOperator::Lte => matches!(
            numeric_cmp(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        ConditionOperator::In => expected
            .as_array()
            .is_some_and(|list| list.iter().any(|e| loosely_equal(actual, e))),
        ConditionOperator::Nin => expected
            .as_array()
            .is_some_and(|list| !actual.is_null() && !list.iter().any(|e| loosely_equal(actual, e))),
        ConditionOperator::Unknown => {
            warn!("unknown condition operator, failing closed");
            false
        }
    }
}

/// Equality that tolerates the stringly-typed values the admin editor
/// produces: numbers compare numerically, `"true"` equals `true`, strings
/// compare case-insensitively.
fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Bool(a), Value::Bool(e)) => a == e,
        (Value::Bool(a), Value::String(e)) => e.parse::<bool>().is_ok_and(|e| *a == e),
        (Value::String(a), Value::String(e)) => a.eq_ignore_ascii_case(e),
        _ => numeric_cmp(actual, expected) == Some(Ordering::Equal),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn numeric_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    as_number(a)?.partial_cmp(&as_number(b)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use popup_core::types::{CartSnapshot, DeviceClass};
    use serde_json::json;

    fn context() -> VisitorContext {
        let mut ctx = VisitorContext::new("v-1", "s-1");
        ctx.device = DeviceClass::Mobile;
        ctx.is_returning_visitor = true;
        ctx.cart = CartSnapshot {
            total_value: 80.0,
            item_ids: vec!["p-1".into(), "p-2".into()],
        };
        ctx.country = Some("US".into());
        ctx
    }

    fn cond(field: &str, operator: ConditionOperator, value: Value) -> Condition {
        Condition {
            field: field.into(),
            operator,
            value,
        }
    }

    #[test]
    fn test_numeric_operators() {
        let ctx = context();
        assert!(evaluate(&cond("cartValue", ConditionOperator::Gt, json!(50)), &ctx));
        assert!(evaluate(&cond("cartValue", ConditionOperator::Gte, json!(80)), &ctx));
        assert!(!evaluate(&cond("cartValue", ConditionOperator::Lt, json!(80)), &ctx));
        assert!(evaluate(&cond("cartValue", ConditionOperator::Lte, json!("80")), &ctx));
        assert!(evaluate(&cond("cartItemCount", ConditionOperator::Eq, json!(2)), &ctx));
    }

    #[test]
    fn test_equality_coercions() {
        let ctx = context();
        assert!(evaluate(&cond("isReturningVisitor", ConditionOperator::Eq, json!(true)), &ctx));
        assert!(evaluate(&cond("isReturningVisitor", ConditionOperator::Eq, json!("true")), &ctx));
        assert!(evaluate(&cond("deviceType", ConditionOperator::Eq, json!("Mobile")), &ctx));
        assert!(evaluate(&cond("deviceType", ConditionOperator::Ne, json!("desktop")), &ctx));
    }

    #[test]
    fn test_membership_operators() {
        let ctx = context();
        assert!(evaluate(&cond("country", ConditionOperator::In, json!(["CA", "US"])), &ctx));
        assert!(!evaluate(&cond("country", ConditionOperator::Nin, json!(["CA", "US"])), &ctx));
        assert!(evaluate(&cond("country", ConditionOperator::Nin, json!(["FR"])), &ctx));
        // Non-list operand fails closed for both.
        assert!(!evaluate(&cond("country", ConditionOperator::In, json!("US")), &ctx));
        assert!(!evaluate(&cond("country", ConditionOperator::Nin, json!("FR")), &ctx));
    }

    #[test]
    fn test_unknown_field_and_operator_fail_closed() {
        let ctx = context();
        assert!(!evaluate(&cond("favouriteColour", ConditionOperator::Eq, json!("red")), &ctx));
        assert!(!evaluate(&cond("cartValue", ConditionOperator::Unknown, json!(1)), &ctx));
    }

    #[test]
    fn test_missing_optional_value_fails_closed() {
        let ctx = context();
        assert!(!evaluate(&cond("referrer", ConditionOperator::Eq, json!("google")), &ctx));
        assert!(!evaluate(&cond("referrer", ConditionOperator::Ne, json!("google")), &ctx));
    }

    #[test]
    fn test_rule_set_logic() {
        let ctx = context();
        let pass = cond("isReturningVisitor", ConditionOperator::Eq, json!(true));
        let fail = cond("cartValue", ConditionOperator::Gt, json!(500));

        let and_rules = RuleSet {
            conditions: vec![pass.clone(), fail.clone()],
            logic_operator: LogicOperator::And,
        };
        let or_rules = RuleSet {
            conditions: vec![pass, fail],
            logic_operator: LogicOperator::Or,
        };
        assert!(!evaluate_rule_set(&and_rules, &ctx));
        assert!(evaluate_rule_set(&or_rules, &ctx));
        assert!(evaluate_rule_set(&RuleSet::default(), &ctx));
    }
}
