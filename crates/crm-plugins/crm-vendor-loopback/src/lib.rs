//! # crm-vendor-loopback
//!
//! Stand-in messaging vendor. Consumes the outbound channel and answers every
//! message with a receipt on the inbound channel: `DELIVERED`, or `FAILED`
//! for customers registered as undeliverable. Fully deterministic.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use crm_core::models::{DeliveryOutcome, DeliveryReceipt, OutboundMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct LoopbackVendor {
    undeliverable: HashSet<Uuid>,
    /// Pause before each receipt
    latency: Duration,
}

impl LoopbackVendor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn undeliverable(mut self, customers: impl IntoIterator<Item = Uuid>) -> Self {
        self.undeliverable.extend(customers);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn receipt_for(&self, message: &OutboundMessage) -> DeliveryReceipt {
        let (outcome, error_detail) = if self.undeliverable.contains(&message.customer_id) {
            (DeliveryOutcome::Failed, Some(format!("recipient {} is unreachable", message.customer_name)))
        } else {
            (DeliveryOutcome::Delivered, None)
        };
        DeliveryReceipt {
            tracking_ref: message.tracking_ref,
            outcome,
            timestamp: Utc::now(),
            error_detail,
        }
    }

    /// Runs until the outbound channel closes or nobody listens for receipts.
    /// Resolves to the number of receipts emitted.
    pub fn spawn(
        self,
        mut outbound: mpsc::Receiver<OutboundMessage>,
        receipts: mpsc::Sender<DeliveryReceipt>,
    ) -> JoinHandle<u64> {
        tokio::spawn(async move {
            let mut emitted = 0;
            while let Some(message) = outbound.recv().await {
                if !self.latency.is_zero() {
                    tokio::time::sleep(self.latency).await;
                }
                let receipt = self.receipt_for(&message);
                tracing::debug!(log_id = %receipt.tracking_ref, outcome = receipt.outcome.as_str(), "loopback receipt");
                if receipts.send(receipt).await.is_err() {
                    tracing::warn!("receipt channel closed, loopback vendor stopping");
                    break;
                }
                emitted += 1;
            }
            emitted
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(customer_id: Uuid) -> OutboundMessage {
        OutboundMessage {
            tracking_ref: Uuid::now_v7(),
            campaign_id: Uuid::now_v7(),
            customer_id,
            customer_name: "Ravi".into(),
            message: "Hi Ravi".into(),
        }
    }

    #[test]
    fn undeliverable_customers_fail_with_detail() {
        let blocked = Uuid::now_v7();
        let vendor = LoopbackVendor::new().undeliverable([blocked]);

        let failed = vendor.receipt_for(&message(blocked));
        assert_eq!(failed.outcome, DeliveryOutcome::Failed);
        assert!(failed.error_detail.unwrap().contains("Ravi"));

        let delivered = vendor.receipt_for(&message(Uuid::now_v7()));
        assert_eq!(delivered.outcome, DeliveryOutcome::Delivered);
        assert!(delivered.error_detail.is_none());
    }

    #[tokio::test]
    async fn echoes_the_tracking_reference() {
        let (out_tx, out_rx) = mpsc::channel(4);
        let (rcpt_tx, mut rcpt_rx) = mpsc::channel(4);
        let handle = LoopbackVendor::new().spawn(out_rx, rcpt_tx);

        let msg = message(Uuid::now_v7());
        out_tx.send(msg.clone()).await.unwrap();
        drop(out_tx);

        let receipt = rcpt_rx.recv().await.unwrap();
        assert_eq!(receipt.tracking_ref, msg.tracking_ref);
        assert_eq!(handle.await.unwrap(), 1);
    }
}
