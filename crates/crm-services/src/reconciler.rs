//! # Delivery Reconciler
//!
//! Applies the vendor's asynchronous delivery receipts to tracking records.
//! A receipt only ever moves a record out of PENDING; a receipt for a record
//! that is already resolved (a duplicate, or one that lost a race with a send
//! failure) is reported as stale and changes nothing.

use std::sync::Arc;

use crm_core::error::{AppError, Result};
use crm_core::models::{CampaignStatus, CommunicationLog, DeliveryReceipt, DeliveryStatus, ReceiptDetail, Resolution};
use crm_core::traits::CommunicationLogRepo;
use uuid::Uuid;

use crate::ledger::{DeliveryLedger, SettleMode};

#[derive(Debug, Clone, PartialEq)]
pub enum ReceiptOutcome {
    Applied {
        log: CommunicationLog,
        /// `None` if the campaign was deleted in the meantime
        campaign_status: Option<CampaignStatus>,
    },
    Stale {
        log_id: Uuid,
        current: DeliveryStatus,
    },
}

pub struct DeliveryReconciler {
    logs: Arc<dyn CommunicationLogRepo>,
    ledger: Arc<DeliveryLedger>,
}

impl DeliveryReconciler {
    pub fn new(logs: Arc<dyn CommunicationLogRepo>, ledger: Arc<DeliveryLedger>) -> Self {
        Self { logs, ledger }
    }

    #[tracing::instrument(skip(self, receipt), fields(log_id = %receipt.tracking_ref, outcome = receipt.outcome.as_str()))]
    pub async fn apply(&self, receipt: DeliveryReceipt) -> Result<ReceiptOutcome> {
        let status = receipt.outcome.resolved_status();
        let detail = ReceiptDetail {
            status: receipt.outcome.as_str().to_string(),
            timestamp: receipt.timestamp,
            error_message: receipt.error_detail,
        };

        let log = match self.logs.resolve_pending(receipt.tracking_ref, status, detail).await? {
            Resolution::Resolved(log) => log,
            Resolution::AlreadyResolved(existing) => {
                tracing::warn!(current = %existing.status, "stale receipt ignored");
                return Ok(ReceiptOutcome::Stale { log_id: existing.id, current: existing.status });
            }
            Resolution::Missing => return Err(AppError::not_found("CommunicationLog", receipt.tracking_ref)),
        };

        let settlement = self.ledger.settle(log.campaign_id, SettleMode::Observe).await?;
        if settlement.is_none() {
            tracing::warn!(campaign_id = %log.campaign_id, "receipt for a deleted campaign");
        }
        tracing::debug!(campaign_id = %log.campaign_id, status = %log.status, "receipt applied");

        Ok(ReceiptOutcome::Applied {
            campaign_status: settlement.map(|s| s.campaign.status),
            log,
        })
    }
}
