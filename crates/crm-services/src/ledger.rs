//! # Delivery Ledger
//!
//! Serialises every write to a campaign record behind a per-campaign lock and
//! keeps track of which campaigns are currently being dispatched.
//!
//! Dispatch and receipt reconciliation both end in [`DeliveryLedger::settle`]:
//! count the campaign's tracking records, write `stats.sent`/`stats.failed`,
//! and close the campaign when nothing is left pending.

use std::sync::Arc;

use chrono::Utc;
use crm_core::error::{AppError, Result};
use crm_core::models::{Campaign, CampaignStatus, LogCounts};
use crm_core::traits::{CampaignRepo, CommunicationLogRepo};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchState {
    Active,
    /// Stopped by cancellation before every recipient was attempted
    Interrupted,
}

/// Releases the campaign lock on drop and removes its map entry once no other
/// task holds or waits on it.
struct CampaignLock<'a> {
    locks: &'a DashMap<Uuid, Arc<Mutex<()>>>,
    campaign_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for CampaignLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.campaign_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Who is settling, which decides whether the campaign may be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleMode {
    /// The dispatcher after attempting every recipient
    Finalize,
    /// A receipt; closes only when no dispatch is registered for the campaign
    Observe,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub counts: LogCounts,
    pub campaign: Campaign,
    /// The campaign moved to `completed` in this call
    pub completed: bool,
}

pub struct DeliveryLedger {
    campaigns: Arc<dyn CampaignRepo>,
    logs: Arc<dyn CommunicationLogRepo>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    dispatches: Arc<DashMap<Uuid, DispatchState>>,
}

impl DeliveryLedger {
    pub fn new(campaigns: Arc<dyn CampaignRepo>, logs: Arc<dyn CommunicationLogRepo>) -> Self {
        Self {
            campaigns,
            logs,
            locks: DashMap::new(),
            dispatches: Arc::new(DashMap::new()),
        }
    }

    async fn lock(&self, campaign_id: Uuid) -> CampaignLock<'_> {
        let lock = Arc::clone(self.locks.entry(campaign_id).or_default().value());
        CampaignLock {
            locks: &self.locks,
            campaign_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Read-modify-write of one campaign record under its lock.
    pub async fn mutate_campaign<F>(&self, campaign_id: Uuid, apply: F) -> Result<Campaign>
    where
        F: FnOnce(&mut Campaign) + Send,
    {
        let _guard = self.lock(campaign_id).await;
        let mut campaign = self
            .campaigns
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| AppError::not_found("Campaign", campaign_id))?;

        apply(&mut campaign);
        campaign.updated_at = Utc::now();

        if !self.campaigns.update_campaign(campaign.clone()).await? {
            return Err(AppError::not_found("Campaign", campaign_id));
        }
        Ok(campaign)
    }

    /// Recomputes the delivery aggregates from the tracking records.
    ///
    /// Returns `None` if the campaign no longer exists.
    #[tracing::instrument(skip(self), fields(campaign_id = %campaign_id))]
    pub async fn settle(&self, campaign_id: Uuid, mode: SettleMode) -> Result<Option<Settlement>> {
        let _guard = self.lock(campaign_id).await;
        let Some(mut campaign) = self.campaigns.get_campaign(campaign_id).await? else {
            return Ok(None);
        };
        let counts = self.logs.count_by_status(campaign_id).await?;

        let now = Utc::now();
        campaign.stats.sent = counts.sent;
        campaign.stats.failed = counts.failed;
        campaign.stats.last_updated = Some(now);
        campaign.updated_at = now;

        let may_close = match mode {
            SettleMode::Finalize => true,
            SettleMode::Observe => !self.dispatches.contains_key(&campaign_id),
        };
        let completed = may_close && counts.pending == 0 && campaign.status == CampaignStatus::Running;
        if completed {
            campaign.status = CampaignStatus::Completed;
        }

        self.campaigns.update_campaign(campaign.clone()).await?;

        if completed {
            tracing::info!(sent = counts.sent, failed = counts.failed, "campaign completed");
        } else {
            tracing::debug!(?counts, status = %campaign.status, "campaign stats refreshed");
        }
        Ok(Some(Settlement { counts, campaign, completed }))
    }

    /// Registers a dispatch; `None` if one is already running for the campaign.
    pub fn begin_dispatch(&self, campaign_id: Uuid) -> Option<DispatchGuard> {
        match self.dispatches.entry(campaign_id) {
            Entry::Occupied(mut entry) if *entry.get() == DispatchState::Interrupted => {
                entry.insert(DispatchState::Active);
            }
            Entry::Occupied(_) => return None,
            Entry::Vacant(entry) => {
                entry.insert(DispatchState::Active);
            }
        }
        Some(DispatchGuard {
            dispatches: Arc::clone(&self.dispatches),
            campaign_id,
            interrupted: false,
        })
    }

    pub fn is_dispatching(&self, campaign_id: Uuid) -> bool {
        self.dispatches
            .get(&campaign_id)
            .is_some_and(|state| *state == DispatchState::Active)
    }

    /// Drops all bookkeeping for a deleted campaign.
    pub fn forget(&self, campaign_id: Uuid) {
        self.dispatches.remove(&campaign_id);
        self.locks.remove(&campaign_id);
    }
}

/// Holds a campaign's slot in the dispatch registry until dropped.
pub struct DispatchGuard {
    dispatches: Arc<DashMap<Uuid, DispatchState>>,
    campaign_id: Uuid,
    interrupted: bool,
}

impl DispatchGuard {
    /// Keeps receipts from closing the campaign after this guard is released.
    pub fn interrupt(&mut self) {
        self.interrupted = true;
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        if self.interrupted {
            self.dispatches.insert(self.campaign_id, DispatchState::Interrupted);
        } else {
            self.dispatches.remove(&self.campaign_id);
        }
    }
}
