use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Placeholder substituted with the recipient's name when a message is rendered.
pub const CUSTOMER_NAME_PLACEHOLDER: &str = "{{customerName}}";

pub const DEFAULT_MESSAGE_TEMPLATE: &str = "Hi {{customerName}}, {{message}}";

/// A personalised message sent to every member of one segment.
///
/// The segment is referenced by ID: the recipient set is whatever the segment
/// resolves to when the campaign is started, not when it was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub segment_id: Uuid,
    pub status: CampaignStatus,
    pub message_template: String,
    pub message_content: String,
    pub schedule_date: Option<DateTime<Utc>>,
    pub stats: CampaignStats,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn draft(
        segment_id: Uuid,
        name: String,
        description: Option<String>,
        message_content: String,
        audience_size: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name,
            description,
            segment_id,
            status: CampaignStatus::Draft,
            message_template: DEFAULT_MESSAGE_TEMPLATE.to_string(),
            message_content,
            schedule_date: None,
            stats: CampaignStats {
                audience_size,
                sent: 0,
                failed: 0,
                last_updated: Some(now),
            },
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Substitutes every `{{customerName}}` in the message content.
    pub fn render_message(&self, customer_name: &str) -> String {
        self.message_content
            .replace(CUSTOMER_NAME_PLACEHOLDER, customer_name)
    }

    /// Share of the audience with a resolved outcome, in percent.
    pub fn progress(&self) -> f64 {
        let total = self.stats.audience_size;
        if total > 0 {
            (self.stats.sent + self.stats.failed) as f64 / total as f64 * 100.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStats {
    pub audience_size: i64,
    pub sent: i64,
    pub failed: i64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Campaign lifecycle: `draft → running → {completed | failed}`.
///
/// `Scheduled` is a valid value but nothing in the core moves a campaign in or out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    #[default]
    Draft,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "scheduled" => Ok(Self::Scheduled),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid campaign status: {s}")),
        }
    }
}

/// Caller-supplied fields for a campaign built on an existing segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCampaign {
    pub segment_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub message_content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn campaign(content: &str) -> Campaign {
        Campaign::draft(Uuid::now_v7(), "c".into(), None, content.into(), 4)
    }

    #[test]
    fn render_replaces_every_placeholder() {
        let c = campaign("Hi {{customerName}}! See you soon, {{customerName}}.");
        assert_eq!(c.render_message("Asha"), "Hi Asha! See you soon, Asha.");
    }

    #[test]
    fn progress_counts_resolved_share() {
        let mut c = campaign("x");
        c.stats.sent = 2;
        c.stats.failed = 1;
        assert!((c.progress() - 75.0).abs() < f64::EPSILON);
        c.stats.audience_size = 0;
        assert_eq!(c.progress(), 0.0);
    }
}
