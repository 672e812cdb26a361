use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named, rule-defined customer subset.
///
/// `customers` is a cached view: it only changes when membership is
/// explicitly recomputed, so it goes stale as customers and orders change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Groups are AND-ed together
    pub conditions: Vec<ConditionGroup>,
    pub customers: Vec<Uuid>,
    pub audience_size: i64,
    pub last_evaluated: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Segment {
    pub fn new(name: String, description: Option<String>, conditions: Vec<ConditionGroup>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name,
            description,
            conditions,
            customers: Vec::new(),
            audience_size: 0,
            last_evaluated: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the cached membership and stamps the evaluation time.
    pub fn set_membership(&mut self, customers: Vec<Uuid>, evaluated_at: DateTime<Utc>) {
        self.audience_size = customers.len() as i64;
        self.customers = customers;
        self.last_evaluated = Some(evaluated_at);
    }
}

/// A set of rules combined by a single boolean operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub operator: GroupOperator,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupOperator {
    And,
    Or,
}

/// `(field, operator, value)` triple tested against a customer's metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub field: RuleField,
    pub operator: RuleOperator,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleField {
    TotalSpend,
    TotalPurchases,
    LastPurchase,
    AverageOrderValue,
    OrderFrequency,
    PaymentMethod,
    OrderStatus,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    NotContains,
    In,
    NotIn,
    /// Anything else read off the wire; always evaluates to `false`
    #[serde(other)]
    Unknown,
}

/// Caller-supplied fields for creating or replacing a segment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentInput {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub conditions: Vec<ConditionGroup>,
}
