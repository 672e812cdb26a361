//! # Core Traits (Ports)
//!
//! Any storage or messaging plugin must implement these traits to be wired
//! into the services. Services take them as `Arc<dyn ...>` handles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    AttemptClaim, Campaign, CommunicationLog, Customer, DeliveryStatus, LogCounts, Order, OutboundMessage,
    PurchaseRecord, ReceiptDetail, Resolution, Segment, SendAck,
};

/// Data persistence contract for customers.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CustomerRepo: Send + Sync {
    async fn get_customer(&self, id: Uuid) -> anyhow::Result<Option<Customer>>;
    async fn get_customer_by_email(&self, email: &str) -> anyhow::Result<Option<Customer>>;
    async fn list_customers(&self) -> anyhow::Result<Vec<Customer>>;
    async fn create_customer(&self, customer: Customer) -> anyhow::Result<()>;
    /// Returns `false` when no customer has that ID.
    async fn update_customer(&self, customer: Customer) -> anyhow::Result<bool>;
    async fn delete_customer(&self, id: Uuid) -> anyhow::Result<bool>;

    /// Atomically bumps the purchase aggregates and appends history entries.
    /// Returns `false` when no customer has that ID.
    async fn record_purchase(
        &self,
        id: Uuid,
        amount: f64,
        history: Vec<PurchaseRecord>,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool>;
}

/// Data persistence contract for orders, including order-number allocation.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait OrderRepo: Send + Sync {
    /// Allocates the next number of the global sequence (`ORD000001`, `ORD000002`, ...).
    async fn allocate_order_number(&self) -> anyhow::Result<String>;
    async fn create_order(&self, order: Order) -> anyhow::Result<()>;
    async fn get_order(&self, id: Uuid) -> anyhow::Result<Option<Order>>;
    async fn list_orders(&self) -> anyhow::Result<Vec<Order>>;
    async fn list_orders_for_customer(&self, customer_id: Uuid) -> anyhow::Result<Vec<Order>>;
    async fn update_order(&self, order: Order) -> anyhow::Result<bool>;
    async fn delete_order(&self, id: Uuid) -> anyhow::Result<bool>;
}

/// Data persistence contract for segments and their cached membership.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait SegmentRepo: Send + Sync {
    async fn create_segment(&self, segment: Segment) -> anyhow::Result<()>;
    async fn get_segment(&self, id: Uuid) -> anyhow::Result<Option<Segment>>;
    async fn list_segments(&self) -> anyhow::Result<Vec<Segment>>;
    async fn update_segment(&self, segment: Segment) -> anyhow::Result<bool>;
    async fn delete_segment(&self, id: Uuid) -> anyhow::Result<bool>;
}

/// Data persistence contract for campaigns.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CampaignRepo: Send + Sync {
    async fn create_campaign(&self, campaign: Campaign) -> anyhow::Result<()>;
    async fn get_campaign(&self, id: Uuid) -> anyhow::Result<Option<Campaign>>;
    async fn list_campaigns(&self) -> anyhow::Result<Vec<Campaign>>;
    async fn update_campaign(&self, campaign: Campaign) -> anyhow::Result<bool>;
    async fn delete_campaign(&self, id: Uuid) -> anyhow::Result<bool>;
}

/// Data persistence contract for per-recipient tracking records.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CommunicationLogRepo: Send + Sync {
    /// The skip-or-claim guard. In one atomic step: report `AlreadySent` if a SENT
    /// record exists for the pair, `InFlight` if a PENDING one does, otherwise
    /// insert `log` (which is PENDING) and return it as `Claimed`.
    async fn claim_attempt(&self, log: CommunicationLog) -> anyhow::Result<AttemptClaim>;

    /// Moves a record out of PENDING. Never overwrites an already resolved record.
    async fn resolve_pending(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        receipt: ReceiptDetail,
    ) -> anyhow::Result<Resolution>;

    /// Deletes every PENDING record of the campaign; returns how many went.
    async fn purge_pending(&self, campaign_id: Uuid) -> anyhow::Result<u64>;

    async fn get_log(&self, id: Uuid) -> anyhow::Result<Option<CommunicationLog>>;
    async fn list_logs_for_campaign(&self, campaign_id: Uuid) -> anyhow::Result<Vec<CommunicationLog>>;
    async fn count_by_status(&self, campaign_id: Uuid) -> anyhow::Result<LogCounts>;
}

/// Outbound messaging capability (the vendor's "send" endpoint).
///
/// An `Err` is a synchronous send failure. Delivery itself is reported later,
/// out of band, as a [`crate::models::DeliveryReceipt`] carrying the tracking reference.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> anyhow::Result<SendAck>;
}
