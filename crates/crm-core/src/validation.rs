//! Field-level validators.
//!
//! Every service calls these before touching a store, so a rejected request
//! never leaves partial state behind.

use crate::error::{AppError, Result};
use crate::models::{
    ConditionGroup, CustomerInput, OrderItem, PurchaseRecord, Rule, RuleField, RuleOperator,
    ShippingAddress,
};

fn require(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::validation(format!("{what} is required")));
    }
    Ok(())
}

/// Trims and lower-cases an email address, rejecting anything without an `@`.
pub fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    require(&email, "email")?;
    if !email.contains('@') {
        return Err(AppError::validation(format!("invalid email address: {email}")));
    }
    Ok(email)
}

pub fn validate_customer(input: &CustomerInput) -> Result<()> {
    require(&input.name, "customer name")?;
    if input.total_purchases < 0 {
        return Err(AppError::validation("total purchases cannot be negative"));
    }
    if !input.total_spend.is_finite() || input.total_spend < 0.0 {
        return Err(AppError::validation("total spend cannot be negative"));
    }
    input
        .purchase_history
        .iter()
        .try_for_each(validate_purchase_record)
}

fn validate_purchase_record(record: &PurchaseRecord) -> Result<()> {
    require(&record.product_name, "product name")?;
    if !record.amount.is_finite() || record.amount < 0.0 {
        return Err(AppError::validation("amount cannot be negative"));
    }
    Ok(())
}

pub fn validate_items(items: &[OrderItem]) -> Result<()> {
    if items.is_empty() {
        return Err(AppError::validation("at least one item is required"));
    }
    for item in items {
        require(&item.name, "item name")?;
        if item.quantity < 1 {
            return Err(AppError::validation(format!(
                "item '{}' quantity must be at least 1",
                item.name
            )));
        }
        if !item.price.is_finite() || item.price < 0.0 {
            return Err(AppError::validation(format!(
                "item '{}' price cannot be negative",
                item.name
            )));
        }
    }
    Ok(())
}

pub fn validate_shipping_address(address: &ShippingAddress) -> Result<()> {
    require(&address.street, "shipping street")?;
    require(&address.city, "shipping city")?;
    require(&address.state, "shipping state")?;
    require(&address.zip_code, "shipping zip code")?;
    require(&address.country, "shipping country")
}

pub fn validate_segment(name: &str, conditions: &[ConditionGroup]) -> Result<()> {
    require(name, "segment name")?;
    validate_conditions(conditions)
}

/// Rejects unknown fields/operators and values whose shape the operator cannot use.
pub fn validate_conditions(conditions: &[ConditionGroup]) -> Result<()> {
    for (g, group) in conditions.iter().enumerate() {
        for (r, rule) in group.rules.iter().enumerate() {
            validate_rule(rule).map_err(|reason| {
                AppError::validation(format!("condition group {g}, rule {r}: {reason}"))
            })?;
        }
    }
    Ok(())
}

fn validate_rule(rule: &Rule) -> std::result::Result<(), String> {
    use serde_json::Value;

    if rule.field == RuleField::Unknown {
        return Err("unknown field".to_string());
    }
    match rule.operator {
        RuleOperator::Unknown => Err("unknown operator".to_string()),
        RuleOperator::In | RuleOperator::NotIn => match rule.value {
            Value::Array(_) => Ok(()),
            _ => Err("value must be a list".to_string()),
        },
        RuleOperator::GreaterThan | RuleOperator::LessThan => match (&rule.value, rule.field) {
            (Value::Number(_), _) => Ok(()),
            (Value::String(s), RuleField::LastPurchase)
                if chrono::DateTime::parse_from_rfc3339(s).is_ok() =>
            {
                Ok(())
            }
            _ => Err("value must be a number or an RFC 3339 timestamp".to_string()),
        },
        RuleOperator::Contains | RuleOperator::NotContains => match rule.value {
            Value::String(_) => Ok(()),
            _ => Err("value must be a string".to_string()),
        },
        RuleOperator::Equals | RuleOperator::NotEquals => Ok(()),
    }
}

pub fn validate_campaign(name: &str, message_content: &str) -> Result<()> {
    require(name, "campaign name")?;
    require(message_content, "message content")
}
