//! # Campaign Dispatcher
//!
//! Delivers one campaign to every member of its segment. A run:
//!
//! 1. marks the campaign `running`
//! 2. resolves the recipients from the segment's membership
//! 3. records the audience size
//! 4. purges PENDING tracking records left by earlier, interrupted runs
//! 5. walks the recipients in fixed-size batches, claiming each
//!    (campaign, customer) pair before sending so a recipient already SENT is
//!    never messaged again
//! 6. records send failures on the claimed record and moves on
//! 7. refreshes the aggregates and completes the campaign if nothing is pending
//!
//! Any failure outside the per-recipient step flips the campaign to `failed`.
//! Calling [`CampaignDispatcher::start`] again resumes a campaign: SENT
//! recipients are skipped, FAILED ones are retried.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crm_config::DispatchSettings;
use crm_core::error::{AppError, Result};
use crm_core::models::{
    AttemptClaim, Campaign, CampaignStatus, CommunicationLog, Customer, DeliveryStatus, OutboundMessage,
    ReceiptDetail, Resolution,
};
use crm_core::traits::MessageSender;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use crate::ledger::{DeliveryLedger, SettleMode};
use crate::segments::refresh_membership;
use crate::Stores;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOptions {
    pub batch_size: usize,
    /// Sends in flight at once within a batch
    pub max_concurrency: usize,
    pub send_timeout: Duration,
    pub refresh_membership: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from(&DispatchSettings::default())
    }
}

impl From<&DispatchSettings> for DispatchOptions {
    fn from(settings: &DispatchSettings) -> Self {
        Self {
            batch_size: settings.batch_size.max(1),
            max_concurrency: settings.max_concurrency.max(1),
            send_timeout: settings.send_timeout(),
            refresh_membership: settings.refresh_membership_on_start,
        }
    }
}

/// Cooperative stop request, checked between batches.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Summary of one dispatch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub campaign_id: Uuid,
    pub status: CampaignStatus,
    pub audience_size: usize,
    /// Handed to the sender without error
    pub dispatched: usize,
    /// Already SENT in an earlier run
    pub skipped: usize,
    /// Another attempt for the pair was still PENDING
    pub in_flight: usize,
    pub send_failures: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecipientOutcome {
    Dispatched,
    Skipped,
    InFlight,
    SendFailed,
}

pub struct CampaignDispatcher {
    stores: Stores,
    sender: Arc<dyn MessageSender>,
    ledger: Arc<DeliveryLedger>,
    options: DispatchOptions,
}

impl CampaignDispatcher {
    pub fn new(
        stores: Stores,
        sender: Arc<dyn MessageSender>,
        ledger: Arc<DeliveryLedger>,
        options: DispatchOptions,
    ) -> Self {
        Self { stores, sender, ledger, options }
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    pub async fn start(&self, campaign_id: Uuid) -> Result<DispatchReport> {
        self.start_with_cancel(campaign_id, CancelSignal::default()).await
    }

    /// Runs (or resumes) the campaign until every recipient has been attempted
    /// or `cancel` is raised.
    #[tracing::instrument(skip(self, cancel), fields(campaign_id = %campaign_id))]
    pub async fn start_with_cancel(&self, campaign_id: Uuid, cancel: CancelSignal) -> Result<DispatchReport> {
        let campaign = self
            .stores
            .campaigns
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| AppError::not_found("Campaign", campaign_id))?;

        let mut guard = self.ledger.begin_dispatch(campaign_id).ok_or_else(|| {
            AppError::Conflict(format!("campaign {campaign_id} is already being dispatched"))
        })?;

        let run = self.run(&campaign, &cancel).await;
        if matches!(&run, Ok(report) if report.cancelled) {
            guard.interrupt();
        }
        drop(guard);

        let outcome = match run {
            Ok(report) => self.finish(report).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(report) => Ok(report),
            Err(err) => {
                tracing::error!(error = %err, "campaign dispatch aborted");
                if let Err(mark_err) = self
                    .ledger
                    .mutate_campaign(campaign_id, |c| c.status = CampaignStatus::Failed)
                    .await
                {
                    tracing::error!(error = %mark_err, "could not mark campaign as failed");
                }
                Err(AppError::Dispatch(err.to_string()))
            }
        }
    }

    async fn run(&self, campaign: &Campaign, cancel: &CancelSignal) -> Result<DispatchReport> {
        // 1. Status: running, persisted before any send
        self.ledger
            .mutate_campaign(campaign.id, |c| c.status = CampaignStatus::Running)
            .await?;

        // 2. Recipients
        let recipients = self.resolve_recipients(campaign).await?;

        // 3. Audience size reflects the recipients resolved for this run
        let audience_size = recipients.len();
        self.ledger
            .mutate_campaign(campaign.id, |c| {
                c.stats.audience_size = audience_size as i64;
                c.stats.last_updated = Some(Utc::now());
            })
            .await?;

        // 4. Leftovers from an interrupted run
        let purged = self.stores.logs.purge_pending(campaign.id).await?;
        if purged > 0 {
            tracing::info!(purged, "removed pending records from an earlier run");
        }

        let mut report = DispatchReport {
            campaign_id: campaign.id,
            status: CampaignStatus::Running,
            audience_size,
            ..DispatchReport::default()
        };

        // 5. Batches
        for (batch_no, batch) in recipients.chunks(self.options.batch_size).enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(batch_no, "dispatch cancelled");
                report.cancelled = true;
                break;
            }

            let outcomes: Vec<Result<RecipientOutcome>> = stream::iter(batch)
                .map(|customer| self.deliver(campaign, customer))
                .buffer_unordered(self.options.max_concurrency)
                .collect()
                .await;

            for outcome in outcomes {
                match outcome? {
                    RecipientOutcome::Dispatched => report.dispatched += 1,
                    RecipientOutcome::Skipped => report.skipped += 1,
                    RecipientOutcome::InFlight => report.in_flight += 1,
                    RecipientOutcome::SendFailed => report.send_failures += 1,
                }
            }
            tracing::debug!(batch_no, size = batch.len(), "batch dispatched");
        }

        Ok(report)
    }

    async fn resolve_recipients(&self, campaign: &Campaign) -> Result<Vec<Customer>> {
        let mut segment = self
            .stores
            .segments
            .get_segment(campaign.segment_id)
            .await?
            .ok_or_else(|| AppError::not_found("Segment", campaign.segment_id))?;

        if self.options.refresh_membership {
            refresh_membership(self.stores.customers.as_ref(), self.stores.orders.as_ref(), &mut segment).await?;
            self.stores.segments.update_segment(segment.clone()).await?;
        }

        let mut recipients = Vec::with_capacity(segment.customers.len());
        for customer_id in &segment.customers {
            match self.stores.customers.get_customer(*customer_id).await? {
                Some(customer) => recipients.push(customer),
                None => tracing::warn!(customer_id = %customer_id, "segment member no longer exists, skipping"),
            }
        }
        Ok(recipients)
    }

    /// Claim, send, and on failure resolve the claimed record as FAILED.
    ///
    /// Send errors and timeouts stay local to the recipient; store errors propagate.
    async fn deliver(&self, campaign: &Campaign, customer: &Customer) -> Result<RecipientOutcome> {
        let message = campaign.render_message(&customer.name);
        let log = CommunicationLog::pending(campaign.id, customer.id, message, Utc::now());

        let log = match self.stores.logs.claim_attempt(log).await? {
            AttemptClaim::Claimed(log) => log,
            AttemptClaim::AlreadySent => {
                tracing::debug!(customer_id = %customer.id, "already sent, skipping");
                return Ok(RecipientOutcome::Skipped);
            }
            AttemptClaim::InFlight => {
                tracing::debug!(customer_id = %customer.id, "attempt still pending, skipping");
                return Ok(RecipientOutcome::InFlight);
            }
        };

        let outbound = OutboundMessage {
            tracking_ref: log.id,
            campaign_id: campaign.id,
            customer_id: customer.id,
            customer_name: customer.name.clone(),
            message: log.message.clone(),
        };

        let error_message = match tokio::time::timeout(self.options.send_timeout, self.sender.send(outbound)).await {
            Ok(Ok(ack)) => {
                tracing::debug!(customer_id = %customer.id, log_id = %log.id, reference = %ack.reference, "message accepted");
                return Ok(RecipientOutcome::Dispatched);
            }
            Ok(Err(err)) => format!("{err:#}"),
            Err(_) => format!("send timed out after {}s", self.options.send_timeout.as_secs()),
        };
        tracing::warn!(customer_id = %customer.id, log_id = %log.id, error = %error_message, "send failed");

        let receipt = ReceiptDetail {
            status: DeliveryStatus::Failed.as_str().to_string(),
            timestamp: Utc::now(),
            error_message: Some(error_message),
        };
        match self.stores.logs.resolve_pending(log.id, DeliveryStatus::Failed, receipt).await? {
            Resolution::Resolved(_) => {}
            Resolution::AlreadyResolved(existing) => {
                tracing::debug!(log_id = %log.id, status = %existing.status, "record already resolved by a receipt");
            }
            Resolution::Missing => tracing::warn!(log_id = %log.id, "claimed record disappeared"),
        }
        Ok(RecipientOutcome::SendFailed)
    }

    /// 7. Aggregates; a cancelled run is left to a later `start`.
    async fn finish(&self, mut report: DispatchReport) -> Result<DispatchReport> {
        let mode = if report.cancelled { SettleMode::Observe } else { SettleMode::Finalize };
        let settlement = self
            .ledger
            .settle(report.campaign_id, mode)
            .await?
            .ok_or_else(|| AppError::not_found("Campaign", report.campaign_id))?;

        report.status = settlement.campaign.status;
        tracing::info!(
            status = %report.status,
            dispatched = report.dispatched,
            skipped = report.skipped,
            send_failures = report.send_failures,
            pending = settlement.counts.pending,
            "dispatch run finished"
        );
        Ok(report)
    }
}
