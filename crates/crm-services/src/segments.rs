//! # Segment Matcher
//!
//! Segment CRUD and (re)computation of the cached membership list. Membership
//! is computed over every customer: each one is projected into
//! [`CustomerMetrics`] together with their orders and tested against the
//! segment's condition groups.

use std::sync::Arc;

use chrono::Utc;
use crm_core::error::{AppError, Result};
use crm_core::metrics::CustomerMetrics;
use crm_core::models::{ConditionGroup, Segment, SegmentInput};
use crm_core::rules;
use crm_core::traits::{CustomerRepo, OrderRepo, SegmentRepo};
use crm_core::validation::{validate_conditions, validate_segment};
use tracing::instrument;
use uuid::Uuid;

/// IDs of every customer satisfying `conditions`, in store order.
pub async fn evaluate_membership(
    customers: &dyn CustomerRepo,
    orders: &dyn OrderRepo,
    conditions: &[ConditionGroup],
) -> Result<Vec<Uuid>> {
    let now = Utc::now();
    let mut members = Vec::new();

    for customer in customers.list_customers().await? {
        let history = orders.list_orders_for_customer(customer.id).await?;
        let metrics = CustomerMetrics::project(&customer, &history, now);
        if rules::conditions_match(conditions, &metrics) {
            members.push(customer.id);
        }
    }
    Ok(members)
}

/// Recomputes and caches `segment`'s membership in place (not persisted).
pub async fn refresh_membership(
    customers: &dyn CustomerRepo,
    orders: &dyn OrderRepo,
    segment: &mut Segment,
) -> Result<()> {
    let members = evaluate_membership(customers, orders, &segment.conditions).await?;
    segment.set_membership(members, Utc::now());
    tracing::debug!(segment_id = %segment.id, audience_size = segment.audience_size, "membership recomputed");
    Ok(())
}

pub struct SegmentService {
    segments: Arc<dyn SegmentRepo>,
    customers: Arc<dyn CustomerRepo>,
    orders: Arc<dyn OrderRepo>,
}

impl SegmentService {
    pub fn new(
        segments: Arc<dyn SegmentRepo>,
        customers: Arc<dyn CustomerRepo>,
        orders: Arc<dyn OrderRepo>,
    ) -> Self {
        Self { segments, customers, orders }
    }

    /// Validates, computes the initial membership, then persists.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create(&self, input: SegmentInput) -> Result<Segment> {
        validate_segment(&input.name, &input.conditions)?;

        let mut segment = Segment::new(input.name, input.description, input.conditions);
        refresh_membership(self.customers.as_ref(), self.orders.as_ref(), &mut segment).await?;
        self.segments.create_segment(segment.clone()).await?;

        tracing::info!(segment_id = %segment.id, audience_size = segment.audience_size, "segment created");
        Ok(segment)
    }

    pub async fn get(&self, id: Uuid) -> Result<Segment> {
        self.segments
            .get_segment(id)
            .await?
            .ok_or_else(|| AppError::not_found("Segment", id))
    }

    pub async fn list(&self) -> Result<Vec<Segment>> {
        Ok(self.segments.list_segments().await?)
    }

    /// Replaces name, description and conditions; membership is recomputed.
    #[instrument(skip(self, input))]
    pub async fn update(&self, id: Uuid, input: SegmentInput) -> Result<Segment> {
        let mut segment = self.get(id).await?;
        validate_segment(&input.name, &input.conditions)?;

        segment.name = input.name;
        segment.description = input.description;
        segment.conditions = input.conditions;
        segment.updated_at = Utc::now();
        refresh_membership(self.customers.as_ref(), self.orders.as_ref(), &mut segment).await?;

        if !self.segments.update_segment(segment.clone()).await? {
            return Err(AppError::not_found("Segment", id));
        }
        Ok(segment)
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if !self.segments.delete_segment(id).await? {
            return Err(AppError::not_found("Segment", id));
        }
        tracing::info!(segment_id = %id, "segment deleted");
        Ok(())
    }

    /// Recomputes and stores the cached membership; returns the new audience size.
    #[instrument(skip(self))]
    pub async fn recompute(&self, id: Uuid) -> Result<i64> {
        let mut segment = self.get(id).await?;
        refresh_membership(self.customers.as_ref(), self.orders.as_ref(), &mut segment).await?;
        segment.updated_at = Utc::now();

        if !self.segments.update_segment(segment.clone()).await? {
            return Err(AppError::not_found("Segment", id));
        }
        Ok(segment.audience_size)
    }

    /// Audience size `conditions` would have right now. Nothing is stored.
    pub async fn preview(&self, conditions: &[ConditionGroup]) -> Result<i64> {
        validate_conditions(conditions)?;
        let members = evaluate_membership(self.customers.as_ref(), self.orders.as_ref(), conditions).await?;
        Ok(members.len() as i64)
    }

    /// Whether one customer currently satisfies the segment's conditions.
    pub async fn matches_customer(&self, segment_id: Uuid, customer_id: Uuid) -> Result<bool> {
        let segment = self.get(segment_id).await?;
        let customer = self
            .customers
            .get_customer(customer_id)
            .await?
            .ok_or_else(|| AppError::not_found("Customer", customer_id))?;
        let history = self.orders.list_orders_for_customer(customer_id).await?;

        let metrics = CustomerMetrics::project(&customer, &history, Utc::now());
        Ok(rules::matches_segment(&segment, &metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_core::models::{Customer, GroupOperator, Rule, RuleField, RuleOperator};
    use crm_core::traits::{MockCustomerRepo, MockOrderRepo, MockSegmentRepo};
    use serde_json::json;

    fn customer(name: &str, spend: f64) -> Customer {
        let mut c = Customer::new(name.into(), format!("{}@example.com", name.to_lowercase()));
        c.total_spend = spend;
        c
    }

    fn high_spenders() -> Vec<ConditionGroup> {
        vec![ConditionGroup {
            operator: GroupOperator::And,
            rules: vec![Rule {
                field: RuleField::TotalSpend,
                operator: RuleOperator::GreaterThan,
                value: json!(100),
            }],
        }]
    }

    fn repos(customers: Vec<Customer>) -> (MockCustomerRepo, MockOrderRepo) {
        let mut customer_repo = MockCustomerRepo::new();
        customer_repo
            .expect_list_customers()
            .returning(move || Ok(customers.clone()));
        let mut order_repo = MockOrderRepo::new();
        order_repo
            .expect_list_orders_for_customer()
            .returning(|_| Ok(vec![]));
        (customer_repo, order_repo)
    }

    #[tokio::test]
    async fn create_caches_matching_members() {
        let a = customer("A", 50.0);
        let b = customer("B", 200.0);
        let b_id = b.id;
        let (customer_repo, order_repo) = repos(vec![a, b]);

        let mut segment_repo = MockSegmentRepo::new();
        segment_repo
            .expect_create_segment()
            .withf(move |s| s.customers == vec![b_id] && s.audience_size == 1)
            .times(1)
            .returning(|_| Ok(()));

        let service = SegmentService::new(Arc::new(segment_repo), Arc::new(customer_repo), Arc::new(order_repo));
        let input = SegmentInput { name: "High".into(), description: None, conditions: high_spenders() };
        let segment = service.create(input).await.unwrap();

        assert_eq!(segment.customers, vec![b_id]);
        assert!(segment.last_evaluated.is_some());
    }

    #[tokio::test]
    async fn invalid_rule_is_rejected_before_any_io() {
        let service = SegmentService::new(
            Arc::new(MockSegmentRepo::new()),
            Arc::new(MockCustomerRepo::new()),
            Arc::new(MockOrderRepo::new()),
        );
        let mut conditions = high_spenders();
        conditions[0].rules[0].field = RuleField::Unknown;

        let input = SegmentInput { name: "Bad".into(), description: None, conditions };
        let err = service.create(input).await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn preview_counts_without_persisting() {
        let (customer_repo, order_repo) = repos(vec![customer("A", 150.0), customer("B", 200.0)]);
        // No expectations: any segment write would panic
        let service = SegmentService::new(
            Arc::new(MockSegmentRepo::new()),
            Arc::new(customer_repo),
            Arc::new(order_repo),
        );
        assert_eq!(service.preview(&high_spenders()).await.unwrap(), 2);
        assert_eq!(service.preview(&[]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn recompute_of_missing_segment_is_not_found() {
        let mut segment_repo = MockSegmentRepo::new();
        segment_repo.expect_get_segment().returning(|_| Ok(None));
        let service = SegmentService::new(
            Arc::new(segment_repo),
            Arc::new(MockCustomerRepo::new()),
            Arc::new(MockOrderRepo::new()),
        );
        let err = service.recompute(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(..)));
    }
}
