use std::sync::Arc;

use chrono::Utc;
use crm_core::error::{AppError, Result};
use crm_core::models::{Customer, CustomerInput, Order};
use crm_core::traits::{CustomerRepo, OrderRepo};
use crm_core::validation::{normalize_email, validate_customer};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerWithOrders {
    #[serde(flatten)]
    pub customer: Customer,
    pub orders: Vec<Order>,
}

pub struct CustomerService {
    customers: Arc<dyn CustomerRepo>,
    orders: Arc<dyn OrderRepo>,
}

impl CustomerService {
    pub fn new(customers: Arc<dyn CustomerRepo>, orders: Arc<dyn OrderRepo>) -> Self {
        Self { customers, orders }
    }

    async fn ensure_email_free(&self, email: &str, owner: Option<Uuid>) -> Result<()> {
        match self.customers.get_customer_by_email(email).await? {
            Some(existing) if Some(existing.id) != owner => {
                Err(AppError::Conflict(format!("a customer with email {email} already exists")))
            }
            _ => Ok(()),
        }
    }

    #[instrument(skip(self, input))]
    pub async fn create(&self, input: CustomerInput) -> Result<Customer> {
        validate_customer(&input)?;
        let email = normalize_email(&input.email)?;
        self.ensure_email_free(&email, None).await?;

        let mut customer = Customer::new(input.name.trim().to_string(), email);
        apply_input(&mut customer, input);
        self.customers.create_customer(customer.clone()).await?;

        tracing::info!(customer_id = %customer.id, "customer created");
        Ok(customer)
    }

    pub async fn get(&self, id: Uuid) -> Result<Customer> {
        self.customers
            .get_customer(id)
            .await?
            .ok_or_else(|| AppError::not_found("Customer", id))
    }

    pub async fn get_with_orders(&self, id: Uuid) -> Result<CustomerWithOrders> {
        let customer = self.get(id).await?;
        let orders = self.orders.list_orders_for_customer(id).await?;
        Ok(CustomerWithOrders { customer, orders })
    }

    /// Newest first.
    pub async fn list(&self) -> Result<Vec<Customer>> {
        Ok(self.customers.list_customers().await?)
    }

    /// Every customer with at most `limit` of their most recent orders.
    pub async fn list_with_recent_orders(&self, limit: usize) -> Result<Vec<CustomerWithOrders>> {
        let mut out = Vec::new();
        for customer in self.customers.list_customers().await? {
            let mut orders = self.orders.list_orders_for_customer(customer.id).await?;
            orders.truncate(limit);
            out.push(CustomerWithOrders { customer, orders });
        }
        Ok(out)
    }

    #[instrument(skip(self, input))]
    pub async fn update(&self, id: Uuid, input: CustomerInput) -> Result<Customer> {
        let mut customer = self.get(id).await?;
        validate_customer(&input)?;
        let email = normalize_email(&input.email)?;
        self.ensure_email_free(&email, Some(id)).await?;

        customer.name = input.name.trim().to_string();
        customer.email = email;
        apply_input(&mut customer, input);
        customer.updated_at = Utc::now();

        if !self.customers.update_customer(customer.clone()).await? {
            return Err(AppError::not_found("Customer", id));
        }
        Ok(customer)
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if !self.customers.delete_customer(id).await? {
            return Err(AppError::not_found("Customer", id));
        }
        tracing::info!(customer_id = %id, "customer deleted");
        Ok(())
    }
}

fn apply_input(customer: &mut Customer, input: CustomerInput) {
    customer.phone = input.phone;
    customer.address = input.address;
    customer.total_purchases = input.total_purchases;
    customer.total_spend = input.total_spend;
    customer.purchase_history = input.purchase_history;
    customer.last_purchase = input.last_purchase;
    if let Some(active) = input.is_active {
        customer.is_active = active;
    }
}
