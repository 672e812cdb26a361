//! # crm-services
//!
//! Use cases of the CRM core, written against the ports in `crm_core::traits`.
//!
//! - [`segments`]: CRUD plus membership recomputation (the Segment Matcher)
//! - [`dispatcher`]: batched, resumable campaign delivery
//! - [`reconciler`]: applies asynchronous delivery receipts
//! - [`ledger`]: per-campaign aggregate refresh and the active-dispatch registry
//! - [`channel`]: in-process outbound and receipt channels
//!
//! [`CrmCore`] wires all of them over one set of [`Stores`].

use std::sync::Arc;

use crm_core::traits::{CampaignRepo, CommunicationLogRepo, CustomerRepo, OrderRepo, SegmentRepo};

pub mod campaigns;
pub mod channel;
pub mod customers;
pub mod dispatcher;
pub mod facade;
pub mod ledger;
pub mod orders;
pub mod reconciler;
pub mod segments;

pub use campaigns::{CampaignLogs, CampaignService};
pub use customers::{CustomerService, CustomerWithOrders};
pub use dispatcher::{CampaignDispatcher, CancelSignal, DispatchOptions, DispatchReport};
pub use facade::CrmCore;
pub use ledger::{DeliveryLedger, Settlement};
pub use orders::OrderService;
pub use reconciler::{DeliveryReconciler, ReceiptOutcome};
pub use segments::SegmentService;

/// Handles to every repository the services use.
#[derive(Clone)]
pub struct Stores {
    pub customers: Arc<dyn CustomerRepo>,
    pub orders: Arc<dyn OrderRepo>,
    pub segments: Arc<dyn SegmentRepo>,
    pub campaigns: Arc<dyn CampaignRepo>,
    pub logs: Arc<dyn CommunicationLogRepo>,
}

impl Stores {
    /// Uses one backend for every repository.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: CustomerRepo + OrderRepo + SegmentRepo + CampaignRepo + CommunicationLogRepo + 'static,
    {
        Self {
            customers: store.clone(),
            orders: store.clone(),
            segments: store.clone(),
            campaigns: store.clone(),
            logs: store,
        }
    }
}
