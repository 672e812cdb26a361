//! # crm-db-sqlite
//!
//! Maps the CRM domain models onto SQLite tables. Nested values (order items,
//! addresses, segment conditions and membership, receipts) live in JSON
//! columns; enums are stored as their wire strings.
//!
//! Delivery bookkeeping leans on single-statement atomicity: the claim is a
//! conditional insert backed by a partial unique index, and receipt
//! resolution is a compare-and-swap on `status = 'PENDING'`.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crm_config::DatabaseSettings;
use crm_core::error::DuplicateKey;
use crm_core::models::{
    AttemptClaim, Campaign, CampaignStats, CommunicationLog, ConditionGroup, Customer, DeliveryStatus, LogCounts,
    Order, OrderItem, PurchaseRecord, ReceiptDetail, Resolution, Segment, ShippingAddress,
};
use crm_core::traits::{CampaignRepo, CommunicationLogRepo, CustomerRepo, OrderRepo, SegmentRepo};
use secrecy::ExposeSecret;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(url: &str) -> anyhow::Result<Self> {
        Self::connect(url, 5).await
    }

    pub async fn from_settings(settings: &DatabaseSettings) -> anyhow::Result<Self> {
        Self::connect(settings.url.expose_secret(), settings.max_connections).await
    }

    /// Opens the pool and applies pending migrations.
    ///
    /// An in-memory database exists per connection, so it gets exactly one
    /// connection that is never recycled.
    pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");

        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(options)
                .await?
        };

        MIGRATOR.run(&pool).await?;
        tracing::info!(in_memory, "sqlite store ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse<T: FromStr<Err = String>>(raw: String) -> anyhow::Result<T> {
    raw.parse().map_err(anyhow::Error::msg)
}

/// Newest first; IDs are time-ordered and break ties.
fn newest_first<T>(mut items: Vec<T>, key: impl Fn(&T) -> (DateTime<Utc>, Uuid)) -> Vec<T> {
    items.sort_by(|a, b| key(b).cmp(&key(a)));
    items
}

fn customer_from_row(row: &SqliteRow) -> anyhow::Result<Customer> {
    Ok(Customer {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        address: row.try_get("address")?,
        last_visited: row.try_get("last_visited")?,
        total_purchases: row.try_get("total_purchases")?,
        total_spend: row.try_get("total_spend")?,
        purchase_history: row.try_get::<Json<Vec<PurchaseRecord>>, _>("purchase_history")?.0,
        is_active: row.try_get("is_active")?,
        last_purchase: row.try_get("last_purchase")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn order_from_row(row: &SqliteRow) -> anyhow::Result<Order> {
    Ok(Order {
        id: row.try_get("id")?,
        order_number: row.try_get("order_number")?,
        customer_id: row.try_get("customer_id")?,
        items: row.try_get::<Json<Vec<OrderItem>>, _>("items")?.0,
        total_amount: row.try_get("total_amount")?,
        status: parse(row.try_get("status")?)?,
        payment_status: parse(row.try_get("payment_status")?)?,
        payment_method: parse(row.try_get("payment_method")?)?,
        shipping_address: row.try_get::<Json<ShippingAddress>, _>("shipping_address")?.0,
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn segment_from_row(row: &SqliteRow) -> anyhow::Result<Segment> {
    Ok(Segment {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        conditions: row.try_get::<Json<Vec<ConditionGroup>>, _>("conditions")?.0,
        customers: row.try_get::<Json<Vec<Uuid>>, _>("customers")?.0,
        audience_size: row.try_get("audience_size")?,
        last_evaluated: row.try_get("last_evaluated")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn campaign_from_row(row: &SqliteRow) -> anyhow::Result<Campaign> {
    Ok(Campaign {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        segment_id: row.try_get("segment_id")?,
        status: parse(row.try_get("status")?)?,
        message_template: row.try_get("message_template")?,
        message_content: row.try_get("message_content")?,
        schedule_date: row.try_get("schedule_date")?,
        stats: CampaignStats {
            audience_size: row.try_get("audience_size")?,
            sent: row.try_get("sent")?,
            failed: row.try_get("failed")?,
            last_updated: row.try_get("stats_updated")?,
        },
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn log_from_row(row: &SqliteRow) -> anyhow::Result<CommunicationLog> {
    Ok(CommunicationLog {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        customer_id: row.try_get("customer_id")?,
        message: row.try_get("message")?,
        status: parse(row.try_get("status")?)?,
        delivery_receipt: row
            .try_get::<Option<Json<ReceiptDetail>>, _>("delivery_receipt")?
            .map(|json| json.0),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl CustomerRepo for SqliteStore {
    async fn get_customer(&self, id: Uuid) -> anyhow::Result<Option<Customer>> {
        sqlx::query("SELECT * FROM customers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| customer_from_row(&row))
            .transpose()
    }

    async fn get_customer_by_email(&self, email: &str) -> anyhow::Result<Option<Customer>> {
        sqlx::query("SELECT * FROM customers WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| customer_from_row(&row))
            .transpose()
    }

    async fn list_customers(&self) -> anyhow::Result<Vec<Customer>> {
        let customers = sqlx::query("SELECT * FROM customers")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(customer_from_row)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(newest_first(customers, |c| (c.created_at, c.id)))
    }

    async fn create_customer(&self, customer: Customer) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO customers (id, name, email, phone, address, last_visited, total_purchases, total_spend, \
             purchase_history, is_active, last_purchase, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(customer.id)
        .bind(&customer.name)
        .bind(&customer.email)
        .bind(&customer.phone)
        .bind(&customer.address)
        .bind(customer.last_visited)
        .bind(customer.total_purchases)
        .bind(customer.total_spend)
        .bind(Json(&customer.purchase_history))
        .bind(customer.is_active)
        .bind(customer.last_purchase)
        .bind(customer.created_at)
        .bind(customer.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| email_conflict(e, &customer.email))?;
        Ok(())
    }

    async fn update_customer(&self, customer: Customer) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE customers SET name = ?, email = ?, phone = ?, address = ?, last_visited = ?, \
             total_purchases = ?, total_spend = ?, purchase_history = ?, is_active = ?, last_purchase = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(&customer.name)
        .bind(&customer.email)
        .bind(&customer.phone)
        .bind(&customer.address)
        .bind(customer.last_visited)
        .bind(customer.total_purchases)
        .bind(customer.total_spend)
        .bind(Json(&customer.purchase_history))
        .bind(customer.is_active)
        .bind(customer.last_purchase)
        .bind(customer.updated_at)
        .bind(customer.id)
        .execute(&self.pool)
        .await
        .map_err(|e| email_conflict(e, &customer.email))?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_customer(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM customers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// The aggregate update takes the write lock first, so the history
    /// appends in the same transaction cannot interleave with another purchase.
    async fn record_purchase(
        &self,
        id: Uuid,
        amount: f64,
        history: Vec<PurchaseRecord>,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE customers SET total_purchases = total_purchases + 1, total_spend = total_spend + ?, \
             last_purchase = ?, updated_at = ? WHERE id = ?",
        )
        .bind(amount)
        .bind(at)
        .bind(at)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        for record in &history {
            sqlx::query("UPDATE customers SET purchase_history = json_insert(purchase_history, '$[#]', json(?)) WHERE id = ?")
                .bind(serde_json::to_string(record)?)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl OrderRepo for SqliteStore {
    async fn allocate_order_number(&self) -> anyhow::Result<String> {
        let seq: i64 = sqlx::query_scalar(
            "INSERT INTO counters (name, value) VALUES ('order_number', 1) \
             ON CONFLICT (name) DO UPDATE SET value = value + 1 RETURNING value",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(format!("ORD{seq:06}"))
    }

    async fn create_order(&self, order: Order) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO orders (id, order_number, customer_id, items, total_amount, status, payment_status, \
             payment_method, shipping_address, notes, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.customer_id)
        .bind(Json(&order.items))
        .bind(order.total_amount)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.payment_method.as_str())
        .bind(Json(&order.shipping_address))
        .bind(&order.notes)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> anyhow::Result<Option<Order>> {
        sqlx::query("SELECT * FROM orders WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| order_from_row(&row))
            .transpose()
    }

    async fn list_orders(&self) -> anyhow::Result<Vec<Order>> {
        let orders = sqlx::query("SELECT * FROM orders")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(order_from_row)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(newest_first(orders, |o| (o.created_at, o.id)))
    }

    async fn list_orders_for_customer(&self, customer_id: Uuid) -> anyhow::Result<Vec<Order>> {
        let orders = sqlx::query("SELECT * FROM orders WHERE customer_id = ?")
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(order_from_row)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(newest_first(orders, |o| (o.created_at, o.id)))
    }

    async fn update_order(&self, order: Order) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE orders SET customer_id = ?, items = ?, total_amount = ?, status = ?, payment_status = ?, \
             payment_method = ?, shipping_address = ?, notes = ?, updated_at = ? WHERE id = ?",
        )
        .bind(order.customer_id)
        .bind(Json(&order.items))
        .bind(order.total_amount)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.payment_method.as_str())
        .bind(Json(&order.shipping_address))
        .bind(&order.notes)
        .bind(order.updated_at)
        .bind(order.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_order(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM orders WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl SegmentRepo for SqliteStore {
    async fn create_segment(&self, segment: Segment) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO segments (id, name, description, conditions, customers, audience_size, last_evaluated, \
             is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(segment.id)
        .bind(&segment.name)
        .bind(&segment.description)
        .bind(Json(&segment.conditions))
        .bind(Json(&segment.customers))
        .bind(segment.audience_size)
        .bind(segment.last_evaluated)
        .bind(segment.is_active)
        .bind(segment.created_at)
        .bind(segment.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_segment(&self, id: Uuid) -> anyhow::Result<Option<Segment>> {
        sqlx::query("SELECT * FROM segments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| segment_from_row(&row))
            .transpose()
    }

    async fn list_segments(&self) -> anyhow::Result<Vec<Segment>> {
        let segments = sqlx::query("SELECT * FROM segments")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(segment_from_row)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(newest_first(segments, |s| (s.created_at, s.id)))
    }

    async fn update_segment(&self, segment: Segment) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE segments SET name = ?, description = ?, conditions = ?, customers = ?, audience_size = ?, \
             last_evaluated = ?, is_active = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&segment.name)
        .bind(&segment.description)
        .bind(Json(&segment.conditions))
        .bind(Json(&segment.customers))
        .bind(segment.audience_size)
        .bind(segment.last_evaluated)
        .bind(segment.is_active)
        .bind(segment.updated_at)
        .bind(segment.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_segment(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM segments WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl CampaignRepo for SqliteStore {
    async fn create_campaign(&self, campaign: Campaign) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO campaigns (id, name, description, segment_id, status, message_template, message_content, \
             schedule_date, audience_size, sent, failed, stats_updated, is_active, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(campaign.id)
        .bind(&campaign.name)
        .bind(&campaign.description)
        .bind(campaign.segment_id)
        .bind(campaign.status.as_str())
        .bind(&campaign.message_template)
        .bind(&campaign.message_content)
        .bind(campaign.schedule_date)
        .bind(campaign.stats.audience_size)
        .bind(campaign.stats.sent)
        .bind(campaign.stats.failed)
        .bind(campaign.stats.last_updated)
        .bind(campaign.is_active)
        .bind(campaign.created_at)
        .bind(campaign.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_campaign(&self, id: Uuid) -> anyhow::Result<Option<Campaign>> {
        sqlx::query("SELECT * FROM campaigns WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| campaign_from_row(&row))
            .transpose()
    }

    async fn list_campaigns(&self) -> anyhow::Result<Vec<Campaign>> {
        let campaigns = sqlx::query("SELECT * FROM campaigns")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(campaign_from_row)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(newest_first(campaigns, |c| (c.created_at, c.id)))
    }

    async fn update_campaign(&self, campaign: Campaign) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE campaigns SET name = ?, description = ?, segment_id = ?, status = ?, message_template = ?, \
             message_content = ?, schedule_date = ?, audience_size = ?, sent = ?, failed = ?, stats_updated = ?, \
             is_active = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&campaign.name)
        .bind(&campaign.description)
        .bind(campaign.segment_id)
        .bind(campaign.status.as_str())
        .bind(&campaign.message_template)
        .bind(&campaign.message_content)
        .bind(campaign.schedule_date)
        .bind(campaign.stats.audience_size)
        .bind(campaign.stats.sent)
        .bind(campaign.stats.failed)
        .bind(campaign.stats.last_updated)
        .bind(campaign.is_active)
        .bind(campaign.updated_at)
        .bind(campaign.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_campaign(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM campaigns WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl CommunicationLogRepo for SqliteStore {
    async fn claim_attempt(&self, log: CommunicationLog) -> anyhow::Result<AttemptClaim> {
        let inserted = sqlx::query(
            "INSERT INTO communication_logs (id, campaign_id, customer_id, message, status, delivery_receipt, \
             created_at, updated_at) \
             SELECT ?, ?, ?, ?, 'PENDING', NULL, ?, ? \
             WHERE NOT EXISTS (SELECT 1 FROM communication_logs \
                               WHERE campaign_id = ? AND customer_id = ? AND status IN ('PENDING', 'SENT'))",
        )
        .bind(log.id)
        .bind(log.campaign_id)
        .bind(log.customer_id)
        .bind(&log.message)
        .bind(log.created_at)
        .bind(log.updated_at)
        .bind(log.campaign_id)
        .bind(log.customer_id)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(AttemptClaim::Claimed(log));
        }

        let live: Vec<String> = sqlx::query_scalar(
            "SELECT status FROM communication_logs \
             WHERE campaign_id = ? AND customer_id = ? AND status IN ('PENDING', 'SENT')",
        )
        .bind(log.campaign_id)
        .bind(log.customer_id)
        .fetch_all(&self.pool)
        .await?;

        if live.iter().any(|s| s == DeliveryStatus::Sent.as_str()) {
            Ok(AttemptClaim::AlreadySent)
        } else {
            Ok(AttemptClaim::InFlight)
        }
    }

    async fn resolve_pending(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        receipt: ReceiptDetail,
    ) -> anyhow::Result<Resolution> {
        let swapped = sqlx::query(
            "UPDATE communication_logs SET status = ?, delivery_receipt = ?, updated_at = ? \
             WHERE id = ? AND status = 'PENDING'",
        )
        .bind(status.as_str())
        .bind(Json(&receipt))
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        let current = self.get_log(id).await?;
        Ok(match current {
            None => Resolution::Missing,
            Some(log) if swapped.rows_affected() == 1 => Resolution::Resolved(log),
            Some(log) => Resolution::AlreadyResolved(log),
        })
    }

    async fn purge_pending(&self, campaign_id: Uuid) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM communication_logs WHERE campaign_id = ? AND status = 'PENDING'")
            .bind(campaign_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get_log(&self, id: Uuid) -> anyhow::Result<Option<CommunicationLog>> {
        sqlx::query("SELECT * FROM communication_logs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| log_from_row(&row))
            .transpose()
    }

    async fn list_logs_for_campaign(&self, campaign_id: Uuid) -> anyhow::Result<Vec<CommunicationLog>> {
        let logs = sqlx::query("SELECT * FROM communication_logs WHERE campaign_id = ?")
            .bind(campaign_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(log_from_row)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(newest_first(logs, |l| (l.created_at, l.id)))
    }

    async fn count_by_status(&self, campaign_id: Uuid) -> anyhow::Result<LogCounts> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM communication_logs WHERE campaign_id = ? GROUP BY status",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = LogCounts::default();
        for row in rows {
            let n: i64 = row.try_get("n")?;
            counts.total += n;
            match parse::<DeliveryStatus>(row.try_get("status")?)? {
                DeliveryStatus::Sent => counts.sent = n,
                DeliveryStatus::Failed => counts.failed = n,
                DeliveryStatus::Pending => counts.pending = n,
            }
        }
        Ok(counts)
    }
}

fn email_conflict(err: sqlx::Error, email: &str) -> anyhow::Error {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            DuplicateKey(format!("a customer with email {email} already exists")).into()
        }
        _ => err.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_core::error::AppError;
    use crm_core::models::{
        CampaignStatus, GroupOperator, OrderStatus, PaymentMethod, PaymentStatus, Rule, RuleField, RuleOperator,
    };

    async fn store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn detail(status: &str) -> ReceiptDetail {
        ReceiptDetail { status: status.into(), timestamp: Utc::now(), error_message: Some("n/a".into()) }
    }

    #[tokio::test]
    async fn customer_round_trips_with_history() {
        let store = store().await;
        let customer = Customer::new("Asha".into(), "asha@example.com".into());
        store.create_customer(customer.clone()).await.unwrap();

        let at = Utc::now();
        let history = vec![
            PurchaseRecord { product_name: "Tea".into(), amount: 10.0, purchase_date: at },
            PurchaseRecord { product_name: "Mug".into(), amount: 12.5, purchase_date: at },
        ];
        assert!(store.record_purchase(customer.id, 22.5, history, at).await.unwrap());

        let stored = store.get_customer_by_email("asha@example.com").await.unwrap().unwrap();
        assert_eq!(stored.id, customer.id);
        assert_eq!(stored.total_purchases, 1);
        assert!((stored.total_spend - 22.5).abs() < 1e-9);
        assert_eq!(stored.purchase_history.len(), 2);
        assert_eq!(stored.purchase_history[1].product_name, "Mug");
    }

    #[tokio::test]
    async fn duplicate_email_surfaces_as_a_conflict() {
        let store = store().await;
        store.create_customer(Customer::new("Asha".into(), "asha@example.com".into())).await.unwrap();

        let twin = store.create_customer(Customer::new("Asha B".into(), "asha@example.com".into())).await;
        let err = AppError::from(twin.unwrap_err());
        assert!(matches!(err, AppError::Conflict(_)));

        let mut bala = Customer::new("Bala".into(), "bala@example.com".into());
        store.create_customer(bala.clone()).await.unwrap();
        bala.email = "asha@example.com".into();
        let err = AppError::from(store.update_customer(bala).await.unwrap_err());
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn order_numbers_come_from_one_sequence() {
        let store = store().await;
        assert_eq!(store.allocate_order_number().await.unwrap(), "ORD000001");
        assert_eq!(store.allocate_order_number().await.unwrap(), "ORD000002");
    }

    #[tokio::test]
    async fn order_enums_and_json_columns_survive() {
        let store = store().await;
        let now = Utc::now();
        let mut order = Order {
            id: Uuid::now_v7(),
            order_number: "ORD000009".into(),
            customer_id: Uuid::now_v7(),
            items: vec![],
            total_amount: 0.0,
            status: OrderStatus::Processing,
            payment_status: PaymentStatus::Paid,
            payment_method: PaymentMethod::BankTransfer,
            shipping_address: ShippingAddress {
                street: "1 Main St".into(),
                city: "Pune".into(),
                state: "MH".into(),
                zip_code: "411001".into(),
                country: "IN".into(),
            },
            notes: Some("leave at door".into()),
            created_at: now,
            updated_at: now,
        };
        order.set_items(vec![OrderItem { name: "Tea".into(), quantity: 3, price: 2.0 }]);
        store.create_order(order.clone()).await.unwrap();

        let stored = store.list_orders_for_customer(order.customer_id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].payment_method, PaymentMethod::BankTransfer);
        assert_eq!(stored[0].status, OrderStatus::Processing);
        assert_eq!(stored[0].items, order.items);
        assert_eq!(stored[0].shipping_address, order.shipping_address);
    }

    #[tokio::test]
    async fn segment_conditions_and_membership_survive() {
        let store = store().await;
        let conditions = vec![ConditionGroup {
            operator: GroupOperator::Or,
            rules: vec![Rule {
                field: RuleField::PaymentMethod,
                operator: RuleOperator::In,
                value: serde_json::json!(["upi", "card"]),
            }],
        }];
        let mut segment = Segment::new("Digital payers".into(), None, conditions.clone());
        segment.set_membership(vec![Uuid::now_v7()], Utc::now());
        store.create_segment(segment.clone()).await.unwrap();

        let stored = store.get_segment(segment.id).await.unwrap().unwrap();
        assert_eq!(stored.conditions, conditions);
        assert_eq!(stored.customers, segment.customers);
        assert_eq!(stored.audience_size, 1);
    }

    #[tokio::test]
    async fn campaign_stats_are_columns() {
        let store = store().await;
        let mut campaign = Campaign::draft(Uuid::now_v7(), "Launch".into(), None, "Hi".into(), 5);
        store.create_campaign(campaign.clone()).await.unwrap();

        campaign.status = CampaignStatus::Running;
        campaign.stats.sent = 3;
        campaign.stats.failed = 1;
        assert!(store.update_campaign(campaign.clone()).await.unwrap());

        let stored = store.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Running);
        assert_eq!((stored.stats.audience_size, stored.stats.sent, stored.stats.failed), (5, 3, 1));
        assert!(!store.update_campaign(Campaign::draft(Uuid::now_v7(), "x".into(), None, "y".into(), 0)).await.unwrap());
    }

    #[tokio::test]
    async fn claim_guard_and_compare_and_swap() {
        let store = store().await;
        let (campaign, customer) = (Uuid::now_v7(), Uuid::now_v7());
        let attempt = || CommunicationLog::pending(campaign, customer, "Hi".into(), Utc::now());

        let AttemptClaim::Claimed(first) = store.claim_attempt(attempt()).await.unwrap() else {
            panic!("first claim must win");
        };
        assert_eq!(store.claim_attempt(attempt()).await.unwrap(), AttemptClaim::InFlight);

        store.resolve_pending(first.id, DeliveryStatus::Failed, detail("FAILED")).await.unwrap();
        let AttemptClaim::Claimed(retry) = store.claim_attempt(attempt()).await.unwrap() else {
            panic!("a failed pair may be retried");
        };

        let Resolution::Resolved(sent) =
            store.resolve_pending(retry.id, DeliveryStatus::Sent, detail("DELIVERED")).await.unwrap()
        else {
            panic!("pending record must resolve");
        };
        assert_eq!(sent.delivery_receipt.unwrap().status, "DELIVERED");

        assert!(matches!(
            store.resolve_pending(retry.id, DeliveryStatus::Failed, detail("FAILED")).await.unwrap(),
            Resolution::AlreadyResolved(_)
        ));
        assert_eq!(store.claim_attempt(attempt()).await.unwrap(), AttemptClaim::AlreadySent);

        let counts = store.count_by_status(campaign).await.unwrap();
        assert_eq!(counts, LogCounts { total: 2, sent: 1, failed: 1, pending: 0 });
    }

    #[tokio::test]
    async fn purge_deletes_only_pending() {
        let store = store().await;
        let campaign = Uuid::now_v7();
        for _ in 0..3 {
            let log = CommunicationLog::pending(campaign, Uuid::now_v7(), "Hi".into(), Utc::now());
            store.claim_attempt(log).await.unwrap();
        }
        let done = CommunicationLog::pending(campaign, Uuid::now_v7(), "Hi".into(), Utc::now());
        store.claim_attempt(done.clone()).await.unwrap();
        store.resolve_pending(done.id, DeliveryStatus::Sent, detail("DELIVERED")).await.unwrap();

        assert_eq!(store.purge_pending(campaign).await.unwrap(), 3);
        assert_eq!(store.list_logs_for_campaign(campaign).await.unwrap().len(), 1);
        assert_eq!(
            store.resolve_pending(Uuid::now_v7(), DeliveryStatus::Sent, detail("DELIVERED")).await.unwrap(),
            Resolution::Missing
        );
    }
}
