use std::sync::Arc;

use chrono::Utc;
use crm_core::error::{AppError, Result};
use crm_core::models::{
    items_total, NewOrder, Order, OrderItem, OrderStatus, OrderUpdate, PaymentStatus, PurchaseRecord,
};
use crm_core::traits::{CustomerRepo, OrderRepo};
use crm_core::validation::{validate_items, validate_shipping_address};
use tracing::instrument;
use uuid::Uuid;

/// Largest accepted gap between a caller's expected total and the recomputed one.
const TOTAL_TOLERANCE: f64 = 0.01;

pub struct OrderService {
    orders: Arc<dyn OrderRepo>,
    customers: Arc<dyn CustomerRepo>,
}

impl OrderService {
    pub fn new(orders: Arc<dyn OrderRepo>, customers: Arc<dyn CustomerRepo>) -> Self {
        Self { orders, customers }
    }

    /// Persists a pending order and folds it into the customer's purchase aggregates.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id))]
    pub async fn create(&self, input: NewOrder) -> Result<Order> {
        validate_items(&input.items)?;
        validate_shipping_address(&input.shipping_address)?;
        if self.customers.get_customer(input.customer_id).await?.is_none() {
            return Err(AppError::not_found("Customer", input.customer_id));
        }

        let now = Utc::now();
        let mut order = Order {
            id: Uuid::now_v7(),
            order_number: self.orders.allocate_order_number().await?,
            customer_id: input.customer_id,
            items: Vec::new(),
            total_amount: 0.0,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: input.payment_method,
            shipping_address: input.shipping_address,
            notes: input.notes,
            created_at: now,
            updated_at: now,
        };
        order.set_items(input.items);
        self.orders.create_order(order.clone()).await?;

        let history = purchase_records(&order.items, now);
        if !self
            .customers
            .record_purchase(order.customer_id, order.total_amount, history, now)
            .await?
        {
            tracing::warn!(order_id = %order.id, "customer vanished before purchase was recorded");
        }

        tracing::info!(order_id = %order.id, order_number = %order.order_number, total = order.total_amount, "order created");
        Ok(order)
    }

    pub async fn get(&self, id: Uuid) -> Result<Order> {
        self.orders
            .get_order(id)
            .await?
            .ok_or_else(|| AppError::not_found("Order", id))
    }

    /// Newest first.
    pub async fn list(&self) -> Result<Vec<Order>> {
        Ok(self.orders.list_orders().await?)
    }

    #[instrument(skip(self, input))]
    pub async fn update(&self, id: Uuid, input: OrderUpdate) -> Result<Order> {
        let mut order = self.get(id).await?;
        validate_items(&input.items)?;
        validate_shipping_address(&input.shipping_address)?;

        let recomputed = items_total(&input.items);
        if let Some(expected) = input.total_amount {
            if (expected - recomputed).abs() > TOTAL_TOLERANCE {
                return Err(AppError::validation(format!(
                    "total amount {expected:.2} does not match items total {recomputed:.2}"
                )));
            }
        }
        if input.status != order.status {
            ensure_transition(order.status, input.status)?;
        }
        if input.customer_id != order.customer_id
            && self.customers.get_customer(input.customer_id).await?.is_none()
        {
            return Err(AppError::not_found("Customer", input.customer_id));
        }

        order.customer_id = input.customer_id;
        order.set_items(input.items);
        order.status = input.status;
        order.payment_status = input.payment_status;
        order.payment_method = input.payment_method;
        order.shipping_address = input.shipping_address;
        order.notes = input.notes;
        order.updated_at = Utc::now();

        self.store(order).await
    }

    pub async fn update_status(&self, id: Uuid, status: OrderStatus) -> Result<Order> {
        let mut order = self.get(id).await?;
        ensure_transition(order.status, status)?;
        order.status = status;
        order.updated_at = Utc::now();
        self.store(order).await
    }

    pub async fn update_payment_status(&self, id: Uuid, payment_status: PaymentStatus) -> Result<Order> {
        let mut order = self.get(id).await?;
        order.payment_status = payment_status;
        order.updated_at = Utc::now();
        self.store(order).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if !self.orders.delete_order(id).await? {
            return Err(AppError::not_found("Order", id));
        }
        Ok(())
    }

    async fn store(&self, order: Order) -> Result<Order> {
        if !self.orders.update_order(order.clone()).await? {
            return Err(AppError::not_found("Order", order.id));
        }
        Ok(order)
    }
}

/// Keeping the current status is always allowed.
fn ensure_transition(from: OrderStatus, to: OrderStatus) -> Result<()> {
    if from.can_transition_to(to) {
        return Ok(());
    }
    Err(AppError::InvalidTransition {
        from: from.to_string(),
        to: to.to_string(),
    })
}

fn purchase_records(items: &[OrderItem], at: chrono::DateTime<Utc>) -> Vec<PurchaseRecord> {
    items
        .iter()
        .map(|item| PurchaseRecord {
            product_name: item.name.clone(),
            amount: f64::from(item.quantity) * item.price,
            purchase_date: at,
        })
        .collect()
}
