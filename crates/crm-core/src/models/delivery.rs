use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One per-recipient send attempt for a campaign (the "tracking record").
///
/// Its `id` is the tracking reference handed to the messaging vendor and
/// echoed back on the delivery receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationLog {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub customer_id: Uuid,
    pub message: String,
    pub status: DeliveryStatus,
    pub delivery_receipt: Option<ReceiptDetail>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommunicationLog {
    pub fn pending(campaign_id: Uuid, customer_id: Uuid, message: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            campaign_id,
            customer_id,
            message,
            status: DeliveryStatus::Pending,
            delivery_receipt: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SENT" => Ok(Self::Sent),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("invalid delivery status: {s}")),
        }
    }
}

/// Outcome detail stored on a resolved tracking record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptDetail {
    /// Vendor outcome as received (`DELIVERED`, `FAILED`, ...)
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub error_message: Option<String>,
}

/// Asynchronous delivery outcome reported by the messaging vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub tracking_ref: Uuid,
    pub outcome: DeliveryOutcome,
    pub timestamp: DateTime<Utc>,
    pub error_detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryOutcome {
    Delivered,
    Failed,
    Undelivered,
    Rejected,
    #[serde(other)]
    Unknown,
}

impl DeliveryOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "DELIVERED",
            Self::Failed => "FAILED",
            Self::Undelivered => "UNDELIVERED",
            Self::Rejected => "REJECTED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Only an explicit delivery confirmation counts as sent.
    pub const fn resolved_status(self) -> DeliveryStatus {
        match self {
            Self::Delivered => DeliveryStatus::Sent,
            _ => DeliveryStatus::Failed,
        }
    }
}

/// Request placed on the outbound channel for one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub tracking_ref: Uuid,
    pub campaign_id: Uuid,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub message: String,
}

/// Synchronous acknowledgement from the outbound send capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAck {
    pub reference: String,
    pub accepted_at: DateTime<Utc>,
}

/// Tracking-record tallies for one campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogCounts {
    pub total: i64,
    pub sent: i64,
    pub failed: i64,
    pub pending: i64,
}

impl LogCounts {
    pub fn tally<'a>(logs: impl IntoIterator<Item = &'a CommunicationLog>) -> Self {
        logs.into_iter().fold(Self::default(), |mut acc, log| {
            acc.total += 1;
            match log.status {
                DeliveryStatus::Sent => acc.sent += 1,
                DeliveryStatus::Failed => acc.failed += 1,
                DeliveryStatus::Pending => acc.pending += 1,
            }
            acc
        })
    }
}

/// Result of the atomic skip-or-claim step for a (campaign, customer) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptClaim {
    /// A PENDING record was inserted; the caller owns the send
    Claimed(CommunicationLog),
    /// A SENT record already exists for the pair
    AlreadySent,
    /// Another attempt for the pair is still PENDING
    InFlight,
}

/// Result of the PENDING-only compare-and-swap applied by a receipt or a send failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(CommunicationLog),
    /// The record had already left PENDING; it was not touched
    AlreadyResolved(CommunicationLog),
    Missing,
}
