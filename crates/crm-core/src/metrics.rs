//! # Metric Projector
//!
//! Flattens one customer and their orders into the feature set that segment
//! rules are evaluated against.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Customer, Order, RuleField};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Derived per-customer features.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerMetrics {
    /// Copied from the customer aggregate, not recomputed from orders
    pub total_spend: f64,
    pub total_purchases: i64,
    pub last_purchase: Option<DateTime<Utc>>,
    /// Mean order total; 0 without orders
    pub average_order_value: f64,
    /// Days since the customer was created divided by the number of orders.
    ///
    /// This is days *per order*: a larger value means a customer who buys
    /// less often. 0 without orders.
    pub order_frequency: f64,
    /// Distinct payment methods across the customer's orders, in first-seen order
    pub payment_methods: Vec<String>,
    /// Distinct order statuses across the customer's orders, in first-seen order
    pub order_statuses: Vec<String>,
}

/// A metric as seen by the rule evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Number(f64),
    Timestamp(DateTime<Utc>),
    List(Vec<String>),
    Null,
}

impl CustomerMetrics {
    /// Projects `customer` and `orders` (all belonging to that customer) as of `now`.
    pub fn project(customer: &Customer, orders: &[Order], now: DateTime<Utc>) -> Self {
        let order_count = orders.len() as f64;

        let average_order_value = if orders.is_empty() {
            0.0
        } else {
            orders.iter().map(|o| o.total_amount).sum::<f64>() / order_count
        };

        let order_frequency = if orders.is_empty() {
            0.0
        } else {
            let age_days =
                (now - customer.created_at).num_milliseconds() as f64 / MILLIS_PER_DAY;
            age_days / order_count
        };

        Self {
            total_spend: customer.total_spend,
            total_purchases: customer.total_purchases,
            last_purchase: customer.last_purchase,
            average_order_value,
            order_frequency,
            payment_methods: distinct(orders.iter().map(|o| o.payment_method.as_str())),
            order_statuses: distinct(orders.iter().map(|o| o.status.as_str())),
        }
    }

    pub fn get(&self, field: RuleField) -> MetricValue {
        match field {
            RuleField::TotalSpend => MetricValue::Number(self.total_spend),
            RuleField::TotalPurchases => MetricValue::Number(self.total_purchases as f64),
            RuleField::LastPurchase => self
                .last_purchase
                .map_or(MetricValue::Null, MetricValue::Timestamp),
            RuleField::AverageOrderValue => MetricValue::Number(self.average_order_value),
            RuleField::OrderFrequency => MetricValue::Number(self.order_frequency),
            RuleField::PaymentMethod => MetricValue::List(self.payment_methods.clone()),
            RuleField::OrderStatus => MetricValue::List(self.order_statuses.clone()),
            RuleField::Unknown => MetricValue::Null,
        }
    }
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for v in values {
        if !out.iter().any(|seen| seen == v) {
            out.push(v.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderItem, OrderStatus, PaymentMethod, PaymentStatus, ShippingAddress};
    use chrono::Duration;
    use uuid::Uuid;

    fn order(customer: &Customer, total: f64, method: PaymentMethod, status: OrderStatus) -> Order {
        let now = Utc::now();
        let mut order = Order {
            id: Uuid::now_v7(),
            order_number: "ORD000001".into(),
            customer_id: customer.id,
            items: Vec::new(),
            total_amount: 0.0,
            status,
            payment_status: PaymentStatus::Pending,
            payment_method: method,
            shipping_address: ShippingAddress::default(),
            notes: None,
            created_at: now,
            updated_at: now,
        };
        order.set_items(vec![OrderItem { name: "x".into(), quantity: 1, price: total }]);
        order
    }

    #[test]
    fn no_orders_means_zero_derived_metrics() {
        let mut customer = Customer::new("Asha".into(), "asha@example.com".into());
        customer.total_spend = 120.0;
        customer.total_purchases = 2;

        let metrics = CustomerMetrics::project(&customer, &[], Utc::now());
        assert_eq!(metrics.average_order_value, 0.0);
        assert_eq!(metrics.order_frequency, 0.0);
        assert_eq!(metrics.total_spend, 120.0);
        assert_eq!(metrics.get(RuleField::LastPurchase), MetricValue::Null);
    }

    #[test]
    fn frequency_is_days_per_order() {
        let mut customer = Customer::new("Ben".into(), "ben@example.com".into());
        let now = Utc::now();
        customer.created_at = now - Duration::days(30);
        let orders = vec![
            order(&customer, 10.0, PaymentMethod::Card, OrderStatus::Completed),
            order(&customer, 30.0, PaymentMethod::Upi, OrderStatus::Pending),
            order(&customer, 20.0, PaymentMethod::Card, OrderStatus::Completed),
        ];

        let metrics = CustomerMetrics::project(&customer, &orders, now);
        assert!((metrics.order_frequency - 10.0).abs() < 1e-9);
        assert!((metrics.average_order_value - 20.0).abs() < 1e-9);
        assert_eq!(metrics.payment_methods, vec!["card", "upi"]);
        assert_eq!(metrics.order_statuses, vec!["completed", "pending"]);
    }
}
