use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use crm_core::error::{AppError, Result};
use crm_core::models::{Campaign, CampaignStats, CampaignStatus, CommunicationLog, NewCampaign};
use crm_core::traits::{CampaignRepo, CommunicationLogRepo, SegmentRepo};
use crm_core::validation::validate_campaign;
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::ledger::DeliveryLedger;

/// Delivery view of one campaign.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignLogs {
    /// Latest tracking record per customer, newest first
    pub logs: Vec<CommunicationLog>,
    pub campaign_status: CampaignStatus,
    pub stats: CampaignStats,
}

pub struct CampaignService {
    campaigns: Arc<dyn CampaignRepo>,
    segments: Arc<dyn SegmentRepo>,
    logs: Arc<dyn CommunicationLogRepo>,
    ledger: Arc<DeliveryLedger>,
}

impl CampaignService {
    pub fn new(
        campaigns: Arc<dyn CampaignRepo>,
        segments: Arc<dyn SegmentRepo>,
        logs: Arc<dyn CommunicationLogRepo>,
        ledger: Arc<DeliveryLedger>,
    ) -> Self {
        Self { campaigns, segments, logs, ledger }
    }

    /// Creates a draft whose audience size is the segment's cached membership.
    #[instrument(skip(self, input), fields(segment_id = %input.segment_id))]
    pub async fn create_from_segment(&self, input: NewCampaign) -> Result<Campaign> {
        validate_campaign(&input.name, &input.message_content)?;
        let segment = self
            .segments
            .get_segment(input.segment_id)
            .await?
            .ok_or_else(|| AppError::not_found("Segment", input.segment_id))?;

        let campaign = Campaign::draft(
            segment.id,
            input.name.trim().to_string(),
            input.description,
            input.message_content,
            segment.customers.len() as i64,
        );
        self.campaigns.create_campaign(campaign.clone()).await?;

        tracing::info!(campaign_id = %campaign.id, audience_size = campaign.stats.audience_size, "campaign created");
        Ok(campaign)
    }

    pub async fn get(&self, id: Uuid) -> Result<Campaign> {
        self.campaigns
            .get_campaign(id)
            .await?
            .ok_or_else(|| AppError::not_found("Campaign", id))
    }

    /// Newest first.
    pub async fn list(&self) -> Result<Vec<Campaign>> {
        Ok(self.campaigns.list_campaigns().await?)
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if !self.campaigns.delete_campaign(id).await? {
            return Err(AppError::not_found("Campaign", id));
        }
        self.ledger.forget(id);
        tracing::info!(campaign_id = %id, "campaign deleted");
        Ok(())
    }

    /// Manual override; any status may be set.
    pub async fn set_status(&self, id: Uuid, status: CampaignStatus) -> Result<Campaign> {
        let campaign = self.ledger.mutate_campaign(id, |c| c.status = status).await?;
        tracing::info!(campaign_id = %id, %status, "campaign status overridden");
        Ok(campaign)
    }

    pub async fn logs(&self, id: Uuid) -> Result<CampaignLogs> {
        let campaign = self.get(id).await?;
        let all = self.logs.list_logs_for_campaign(id).await?;
        Ok(CampaignLogs {
            logs: latest_per_customer(all),
            campaign_status: campaign.status,
            stats: campaign.stats,
        })
    }
}

fn latest_per_customer(logs: Vec<CommunicationLog>) -> Vec<CommunicationLog> {
    let mut latest: HashMap<Uuid, CommunicationLog> = HashMap::new();
    for log in logs {
        match latest.get(&log.customer_id) {
            Some(kept) if (kept.created_at, kept.id) >= (log.created_at, log.id) => {}
            _ => {
                latest.insert(log.customer_id, log);
            }
        }
    }
    let mut logs: Vec<_> = latest.into_values().collect();
    logs.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
    logs
}
