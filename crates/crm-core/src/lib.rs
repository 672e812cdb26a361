//! crm/crates/crm-core/src/lib.rs
//!
//! The central domain logic and interface definitions for the CRM core:
//! entities, the error taxonomy, field validators, the metric projector,
//! the rule evaluator, and the ports every adapter implements.

pub mod error;
pub mod metrics;
pub mod models;
pub mod rules;
pub mod traits;
pub mod validation;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use traits::*;

#[cfg(test)]
mod tests {
    use super::models::*;
    use uuid::Uuid;

    #[test]
    fn test_campaign_starts_as_draft() {
        let segment_id = Uuid::now_v7();
        let campaign = Campaign::draft(
            segment_id,
            "Spring sale".to_string(),
            None,
            "Hi {{customerName}}, 10% off this week".to_string(),
            3,
        );
        assert_eq!(campaign.segment_id, segment_id);
        assert_eq!(campaign.status, CampaignStatus::Draft);
        assert_eq!(campaign.stats.audience_size, 3);
        assert_eq!(campaign.message_template, DEFAULT_MESSAGE_TEMPLATE);
    }
}
