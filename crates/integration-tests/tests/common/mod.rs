#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use crm_core::models::{
    CampaignStatus, ConditionGroup, Customer, CustomerInput, GroupOperator, NewOrder, OrderItem, OutboundMessage,
    PaymentMethod, Rule, RuleField, RuleOperator, SendAck, ShippingAddress,
};
use crm_core::traits::MessageSender;
use crm_services::{CrmCore, DispatchOptions, Stores};
use crm_store_memory::MemoryStore;
use serde_json::Value;
use tokio::sync::Semaphore;
use uuid::Uuid;

pub fn memory_core(sender: Arc<dyn MessageSender>, options: DispatchOptions) -> (CrmCore, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let core = CrmCore::new(Stores::shared(store.clone()), sender, options);
    (core, store)
}

pub fn options(batch_size: usize, max_concurrency: usize) -> DispatchOptions {
    DispatchOptions { batch_size, max_concurrency, ..DispatchOptions::default() }
}

pub fn customer_input(name: &str, total_spend: f64) -> CustomerInput {
    CustomerInput {
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
        total_spend,
        ..CustomerInput::default()
    }
}

pub async fn add_customer(core: &CrmCore, name: &str, total_spend: f64) -> Customer {
    core.customers.create(customer_input(name, total_spend)).await.unwrap()
}

pub fn address() -> ShippingAddress {
    ShippingAddress {
        street: "12 MG Road".into(),
        city: "Bengaluru".into(),
        state: "KA".into(),
        zip_code: "560001".into(),
        country: "IN".into(),
    }
}

pub fn new_order(customer_id: Uuid, payment_method: PaymentMethod, items: Vec<(&str, u32, f64)>) -> NewOrder {
    NewOrder {
        customer_id,
        items: items
            .into_iter()
            .map(|(name, quantity, price)| OrderItem { name: name.into(), quantity, price })
            .collect(),
        payment_method,
        shipping_address: address(),
        notes: None,
    }
}

pub fn rule(field: RuleField, operator: RuleOperator, value: Value) -> Rule {
    Rule { field, operator, value }
}

pub fn all_of(rules: Vec<Rule>) -> ConditionGroup {
    ConditionGroup { operator: GroupOperator::And, rules }
}

pub fn any_of(rules: Vec<Rule>) -> ConditionGroup {
    ConditionGroup { operator: GroupOperator::Or, rules }
}

/// Polls until the campaign reaches `status`; panics after five seconds.
pub async fn wait_for_status(core: &CrmCore, campaign_id: Uuid, status: CampaignStatus) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if core.campaigns.get(campaign_id).await.unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "campaign never reached {status}");
}

/// Accepts every message but only once the test hands out permits.
pub struct GatedSender {
    pub gate: Arc<Semaphore>,
}

impl GatedSender {
    pub fn closed() -> Self {
        Self { gate: Arc::new(Semaphore::new(0)) }
    }
}

#[async_trait]
impl MessageSender for GatedSender {
    async fn send(&self, message: OutboundMessage) -> anyhow::Result<SendAck> {
        self.gate.acquire().await?.forget();
        Ok(SendAck { reference: message.tracking_ref.to_string(), accepted_at: Utc::now() })
    }
}
