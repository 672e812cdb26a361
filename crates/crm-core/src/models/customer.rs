use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A person the business sells to.
///
/// `total_spend`, `total_purchases` and `last_purchase` are eagerly maintained
/// aggregates, bumped every time an order is created for the customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    /// Stored trimmed and lower-cased
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub last_visited: Option<DateTime<Utc>>,
    pub total_purchases: i64,
    pub total_spend: f64,
    pub purchase_history: Vec<PurchaseRecord>,
    pub is_active: bool,
    pub last_purchase: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(name: String, email: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name,
            email,
            phone: None,
            address: None,
            last_visited: Some(now),
            total_purchases: 0,
            total_spend: 0.0,
            purchase_history: Vec::new(),
            is_active: true,
            last_purchase: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One line of a customer's purchase history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub product_name: String,
    pub amount: f64,
    pub purchase_date: DateTime<Utc>,
}

/// Caller-supplied fields for creating or replacing a customer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInput {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub total_purchases: i64,
    #[serde(default)]
    pub total_spend: f64,
    #[serde(default)]
    pub purchase_history: Vec<PurchaseRecord>,
    pub is_active: Option<bool>,
    pub last_purchase: Option<DateTime<Utc>>,
}
