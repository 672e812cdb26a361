//! Wiring of every service over one set of stores and one sender.

use std::sync::Arc;

use crm_core::error::Result;
use crm_core::models::DeliveryReceipt;
use crm_core::traits::MessageSender;
use uuid::Uuid;

use crate::campaigns::CampaignService;
use crate::customers::CustomerService;
use crate::dispatcher::{CampaignDispatcher, CancelSignal, DispatchOptions, DispatchReport};
use crate::ledger::DeliveryLedger;
use crate::orders::OrderService;
use crate::reconciler::{DeliveryReconciler, ReceiptOutcome};
use crate::segments::SegmentService;
use crate::Stores;

pub struct CrmCore {
    pub customers: CustomerService,
    pub orders: OrderService,
    pub segments: SegmentService,
    pub campaigns: CampaignService,
    dispatcher: Arc<CampaignDispatcher>,
    reconciler: Arc<DeliveryReconciler>,
    ledger: Arc<DeliveryLedger>,
}

impl CrmCore {
    pub fn new(stores: Stores, sender: Arc<dyn MessageSender>, options: DispatchOptions) -> Self {
        let ledger = Arc::new(DeliveryLedger::new(stores.campaigns.clone(), stores.logs.clone()));

        Self {
            customers: CustomerService::new(stores.customers.clone(), stores.orders.clone()),
            orders: OrderService::new(stores.orders.clone(), stores.customers.clone()),
            segments: SegmentService::new(
                stores.segments.clone(),
                stores.customers.clone(),
                stores.orders.clone(),
            ),
            campaigns: CampaignService::new(
                stores.campaigns.clone(),
                stores.segments.clone(),
                stores.logs.clone(),
                ledger.clone(),
            ),
            reconciler: Arc::new(DeliveryReconciler::new(stores.logs.clone(), ledger.clone())),
            dispatcher: Arc::new(CampaignDispatcher::new(stores, sender, ledger.clone(), options)),
            ledger,
        }
    }

    pub async fn start_campaign(&self, campaign_id: Uuid) -> Result<DispatchReport> {
        self.dispatcher.start(campaign_id).await
    }

    pub async fn start_campaign_with_cancel(&self, campaign_id: Uuid, cancel: CancelSignal) -> Result<DispatchReport> {
        self.dispatcher.start_with_cancel(campaign_id, cancel).await
    }

    pub async fn apply_receipt(&self, receipt: DeliveryReceipt) -> Result<ReceiptOutcome> {
        self.reconciler.apply(receipt).await
    }

    pub fn is_dispatching(&self, campaign_id: Uuid) -> bool {
        self.ledger.is_dispatching(campaign_id)
    }

    pub fn dispatcher(&self) -> Arc<CampaignDispatcher> {
        self.dispatcher.clone()
    }

    /// Shared handle for [`crate::channel::spawn_receipt_listener`].
    pub fn reconciler(&self) -> Arc<DeliveryReconciler> {
        self.reconciler.clone()
    }
}
