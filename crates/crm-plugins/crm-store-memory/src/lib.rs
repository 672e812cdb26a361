//! # crm-store-memory
//!
//! Process-local implementation of every repository port, backed by `DashMap`.
//! Nothing survives a restart; meant for tests and single-process deployments.
//!
//! The skip-or-claim guard holds the (campaign, customer) pair's index entry
//! while it inspects and inserts, so two claims for one pair cannot both win.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crm_core::models::{
    AttemptClaim, Campaign, CommunicationLog, Customer, DeliveryStatus, LogCounts, Order, PurchaseRecord,
    ReceiptDetail, Resolution, Segment,
};
use crm_core::traits::{CampaignRepo, CommunicationLogRepo, CustomerRepo, OrderRepo, SegmentRepo};
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    customers: DashMap<Uuid, Customer>,
    orders: DashMap<Uuid, Order>,
    order_seq: AtomicU64,
    segments: DashMap<Uuid, Segment>,
    campaigns: DashMap<Uuid, Campaign>,
    logs: DashMap<Uuid, CommunicationLog>,
    /// (campaign, customer) -> IDs of that pair's tracking records
    attempts: DashMap<(Uuid, Uuid), Vec<Uuid>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Newest first; IDs are time-ordered and break ties.
fn newest_first<T>(mut items: Vec<T>, key: impl Fn(&T) -> (DateTime<Utc>, Uuid)) -> Vec<T> {
    items.sort_by(|a, b| key(b).cmp(&key(a)));
    items
}

fn replace<T: Clone>(map: &DashMap<Uuid, T>, id: Uuid, value: T) -> bool {
    match map.get_mut(&id) {
        Some(mut slot) => {
            *slot = value;
            true
        }
        None => false,
    }
}

#[async_trait]
impl CustomerRepo for MemoryStore {
    async fn get_customer(&self, id: Uuid) -> anyhow::Result<Option<Customer>> {
        Ok(self.customers.get(&id).map(|c| c.clone()))
    }

    async fn get_customer_by_email(&self, email: &str) -> anyhow::Result<Option<Customer>> {
        Ok(self
            .customers
            .iter()
            .find(|c| c.email == email)
            .map(|c| c.value().clone()))
    }

    async fn list_customers(&self) -> anyhow::Result<Vec<Customer>> {
        let all: Vec<Customer> = self.customers.iter().map(|c| c.value().clone()).collect();
        Ok(newest_first(all, |c| (c.created_at, c.id)))
    }

    async fn create_customer(&self, customer: Customer) -> anyhow::Result<()> {
        self.customers.insert(customer.id, customer);
        Ok(())
    }

    async fn update_customer(&self, customer: Customer) -> anyhow::Result<bool> {
        Ok(replace(&self.customers, customer.id, customer))
    }

    async fn delete_customer(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.customers.remove(&id).is_some())
    }

    async fn record_purchase(
        &self,
        id: Uuid,
        amount: f64,
        history: Vec<PurchaseRecord>,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let Some(mut customer) = self.customers.get_mut(&id) else {
            return Ok(false);
        };
        customer.total_purchases += 1;
        customer.total_spend += amount;
        customer.last_purchase = Some(at);
        customer.purchase_history.extend(history);
        customer.updated_at = at;
        Ok(true)
    }
}

#[async_trait]
impl OrderRepo for MemoryStore {
    async fn allocate_order_number(&self) -> anyhow::Result<String> {
        let seq = self.order_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("ORD{seq:06}"))
    }

    async fn create_order(&self, order: Order) -> anyhow::Result<()> {
        self.orders.insert(order.id, order);
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> anyhow::Result<Option<Order>> {
        Ok(self.orders.get(&id).map(|o| o.clone()))
    }

    async fn list_orders(&self) -> anyhow::Result<Vec<Order>> {
        let all: Vec<Order> = self.orders.iter().map(|o| o.value().clone()).collect();
        Ok(newest_first(all, |o| (o.created_at, o.id)))
    }

    async fn list_orders_for_customer(&self, customer_id: Uuid) -> anyhow::Result<Vec<Order>> {
        let mine: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| o.customer_id == customer_id)
            .map(|o| o.value().clone())
            .collect();
        Ok(newest_first(mine, |o| (o.created_at, o.id)))
    }

    async fn update_order(&self, order: Order) -> anyhow::Result<bool> {
        Ok(replace(&self.orders, order.id, order))
    }

    async fn delete_order(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.orders.remove(&id).is_some())
    }
}

#[async_trait]
impl SegmentRepo for MemoryStore {
    async fn create_segment(&self, segment: Segment) -> anyhow::Result<()> {
        self.segments.insert(segment.id, segment);
        Ok(())
    }

    async fn get_segment(&self, id: Uuid) -> anyhow::Result<Option<Segment>> {
        Ok(self.segments.get(&id).map(|s| s.clone()))
    }

    async fn list_segments(&self) -> anyhow::Result<Vec<Segment>> {
        let all: Vec<Segment> = self.segments.iter().map(|s| s.value().clone()).collect();
        Ok(newest_first(all, |s| (s.created_at, s.id)))
    }

    async fn update_segment(&self, segment: Segment) -> anyhow::Result<bool> {
        Ok(replace(&self.segments, segment.id, segment))
    }

    async fn delete_segment(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.segments.remove(&id).is_some())
    }
}

#[async_trait]
impl CampaignRepo for MemoryStore {
    async fn create_campaign(&self, campaign: Campaign) -> anyhow::Result<()> {
        self.campaigns.insert(campaign.id, campaign);
        Ok(())
    }

    async fn get_campaign(&self, id: Uuid) -> anyhow::Result<Option<Campaign>> {
        Ok(self.campaigns.get(&id).map(|c| c.clone()))
    }

    async fn list_campaigns(&self) -> anyhow::Result<Vec<Campaign>> {
        let all: Vec<Campaign> = self.campaigns.iter().map(|c| c.value().clone()).collect();
        Ok(newest_first(all, |c| (c.created_at, c.id)))
    }

    async fn update_campaign(&self, campaign: Campaign) -> anyhow::Result<bool> {
        Ok(replace(&self.campaigns, campaign.id, campaign))
    }

    async fn delete_campaign(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.campaigns.remove(&id).is_some())
    }
}

#[async_trait]
impl CommunicationLogRepo for MemoryStore {
    async fn claim_attempt(&self, log: CommunicationLog) -> anyhow::Result<AttemptClaim> {
        // Holding the pair's entry serialises claims for that pair
        let mut attempts = self.attempts.entry((log.campaign_id, log.customer_id)).or_default();

        let mut in_flight = false;
        for id in attempts.iter() {
            match self.logs.get(id).map(|existing| existing.status) {
                Some(DeliveryStatus::Sent) => return Ok(AttemptClaim::AlreadySent),
                Some(DeliveryStatus::Pending) => in_flight = true,
                Some(DeliveryStatus::Failed) | None => {}
            }
        }
        if in_flight {
            return Ok(AttemptClaim::InFlight);
        }

        attempts.push(log.id);
        self.logs.insert(log.id, log.clone());
        Ok(AttemptClaim::Claimed(log))
    }

    async fn resolve_pending(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        receipt: ReceiptDetail,
    ) -> anyhow::Result<Resolution> {
        let Some(mut log) = self.logs.get_mut(&id) else {
            return Ok(Resolution::Missing);
        };
        if log.status != DeliveryStatus::Pending {
            return Ok(Resolution::AlreadyResolved(log.clone()));
        }
        log.status = status;
        log.delivery_receipt = Some(receipt);
        log.updated_at = Utc::now();
        Ok(Resolution::Resolved(log.clone()))
    }

    async fn purge_pending(&self, campaign_id: Uuid) -> anyhow::Result<u64> {
        let candidates: Vec<(Uuid, Uuid)> = self
            .logs
            .iter()
            .filter(|l| l.campaign_id == campaign_id && l.status == DeliveryStatus::Pending)
            .map(|l| (l.id, l.customer_id))
            .collect();

        let mut purged = 0;
        for (id, customer_id) in candidates {
            if self
                .logs
                .remove_if(&id, |_, l| l.status == DeliveryStatus::Pending)
                .is_some()
            {
                purged += 1;
                if let Some(mut attempts) = self.attempts.get_mut(&(campaign_id, customer_id)) {
                    attempts.retain(|a| *a != id);
                }
            }
        }
        tracing::debug!(campaign_id = %campaign_id, purged, "pending records purged");
        Ok(purged)
    }

    async fn get_log(&self, id: Uuid) -> anyhow::Result<Option<CommunicationLog>> {
        Ok(self.logs.get(&id).map(|l| l.clone()))
    }

    async fn list_logs_for_campaign(&self, campaign_id: Uuid) -> anyhow::Result<Vec<CommunicationLog>> {
        let logs: Vec<CommunicationLog> = self
            .logs
            .iter()
            .filter(|l| l.campaign_id == campaign_id)
            .map(|l| l.value().clone())
            .collect();
        Ok(newest_first(logs, |l| (l.created_at, l.id)))
    }

    async fn count_by_status(&self, campaign_id: Uuid) -> anyhow::Result<LogCounts> {
        let mut counts = LogCounts::default();
        for log in self.logs.iter().filter(|l| l.campaign_id == campaign_id) {
            counts.total += 1;
            match log.status {
                DeliveryStatus::Sent => counts.sent += 1,
                DeliveryStatus::Failed => counts.failed += 1,
                DeliveryStatus::Pending => counts.pending += 1,
            }
        }
        Ok(counts)
    }
}
