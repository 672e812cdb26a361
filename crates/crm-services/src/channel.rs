//! In-process message channels.
//!
//! Outbound messages and delivery receipts travel on two independent queues.
//! The only link between a send and its receipt is the tracking reference.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use crm_core::models::{DeliveryReceipt, OutboundMessage, SendAck};
use crm_core::traits::MessageSender;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::reconciler::{DeliveryReconciler, ReceiptOutcome};

/// [`MessageSender`] that enqueues onto the outbound channel.
///
/// A full queue applies backpressure; a closed one is a send failure.
#[derive(Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<OutboundMessage>,
}

#[async_trait]
impl MessageSender for ChannelSender {
    async fn send(&self, message: OutboundMessage) -> anyhow::Result<SendAck> {
        let reference = message.tracking_ref.to_string();
        self.tx
            .send(message)
            .await
            .map_err(|_| anyhow!("outbound channel closed"))?;
        Ok(SendAck { reference, accepted_at: Utc::now() })
    }
}

pub fn outbound(capacity: usize) -> (ChannelSender, mpsc::Receiver<OutboundMessage>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelSender { tx }, rx)
}

pub fn receipts(capacity: usize) -> (mpsc::Sender<DeliveryReceipt>, mpsc::Receiver<DeliveryReceipt>) {
    mpsc::channel(capacity)
}

/// Applies receipts until every sender is dropped; resolves to the number applied.
///
/// Errors are logged and the listener keeps going.
pub fn spawn_receipt_listener(
    mut rx: mpsc::Receiver<DeliveryReceipt>,
    reconciler: Arc<DeliveryReconciler>,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut applied = 0;
        while let Some(receipt) = rx.recv().await {
            let tracking_ref = receipt.tracking_ref;
            match reconciler.apply(receipt).await {
                Ok(ReceiptOutcome::Applied { .. }) => applied += 1,
                Ok(ReceiptOutcome::Stale { .. }) => {}
                Err(err) => tracing::error!(log_id = %tracking_ref, error = %err, "failed to apply receipt"),
            }
        }
        tracing::debug!(applied, "receipt channel closed");
        applied
    })
}
