mod common;

use std::sync::Arc;

use chrono::Utc;
use common::*;
use crm_core::models::{
    CampaignStatus, CommunicationLog, DeliveryOutcome, DeliveryReceipt, DeliveryStatus, NewCampaign, SegmentInput,
};
use crm_core::AppError;
use crm_services::{CrmCore, ReceiptOutcome};
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Dispatches to `names` through a sender that acks everything and never
/// produces receipts, leaving one PENDING record per recipient.
async fn dispatched(names: &[&str]) -> (CrmCore, Uuid, Vec<CommunicationLog>) {
    let sender = GatedSender { gate: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)) };
    let (core, _) = memory_core(Arc::new(sender), options(10, 2));
    for name in names {
        add_customer(&core, name, 0.0).await;
    }
    let segment = core
        .segments
        .create(SegmentInput { name: "All".into(), description: None, conditions: vec![] })
        .await
        .unwrap();
    let campaign = core
        .campaigns
        .create_from_segment(NewCampaign {
            segment_id: segment.id,
            name: "Monsoon".into(),
            description: Some("rainy day offers".into()),
            message_content: "Stay dry, {{customerName}}".into(),
        })
        .await
        .unwrap();

    let report = core.start_campaign(campaign.id).await.unwrap();
    assert_eq!(report.status, CampaignStatus::Running);
    let logs = core.campaigns.logs(campaign.id).await.unwrap().logs;
    (core, campaign.id, logs)
}

fn receipt(tracking_ref: Uuid, outcome: DeliveryOutcome, error_detail: Option<&str>) -> DeliveryReceipt {
    DeliveryReceipt {
        tracking_ref,
        outcome,
        timestamp: Utc::now(),
        error_detail: error_detail.map(str::to_string),
    }
}

#[tokio::test]
async fn last_receipt_completes_the_campaign() {
    let (core, campaign_id, logs) = dispatched(&["Asha", "Bala", "Chitra"]).await;
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|l| l.status == DeliveryStatus::Pending));

    let outcome = core
        .apply_receipt(receipt(logs[0].id, DeliveryOutcome::Delivered, None))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ReceiptOutcome::Applied { campaign_status: Some(CampaignStatus::Running), .. }
    ));

    core.apply_receipt(receipt(logs[1].id, DeliveryOutcome::Rejected, Some("number blocked")))
        .await
        .unwrap();
    let last = core
        .apply_receipt(receipt(logs[2].id, DeliveryOutcome::Delivered, None))
        .await
        .unwrap();
    let ReceiptOutcome::Applied { log, campaign_status } = last else {
        panic!("expected the receipt to apply");
    };
    assert_eq!(log.status, DeliveryStatus::Sent);
    assert_eq!(campaign_status, Some(CampaignStatus::Completed));

    let campaign = core.campaigns.get(campaign_id).await.unwrap();
    assert_eq!(campaign.stats.sent, 2);
    assert_eq!(campaign.stats.failed, 1);
    assert_eq!(campaign.progress(), 100.0);

    let view = core.campaigns.logs(campaign_id).await.unwrap();
    let rejected = view.logs.iter().find(|l| l.id == logs[1].id).unwrap();
    assert_eq!(rejected.status, DeliveryStatus::Failed);
    let detail = rejected.delivery_receipt.as_ref().unwrap();
    assert_eq!(detail.status, "REJECTED");
    assert_eq!(detail.error_message.as_deref(), Some("number blocked"));
}

#[tokio::test]
async fn duplicate_receipt_is_stale() {
    let (core, campaign_id, logs) = dispatched(&["Dev", "Esha"]).await;

    core.apply_receipt(receipt(logs[0].id, DeliveryOutcome::Delivered, None))
        .await
        .unwrap();
    let dup = core
        .apply_receipt(receipt(logs[0].id, DeliveryOutcome::Failed, Some("late failure")))
        .await
        .unwrap();
    assert_eq!(dup, ReceiptOutcome::Stale { log_id: logs[0].id, current: DeliveryStatus::Sent });

    let campaign = core.campaigns.get(campaign_id).await.unwrap();
    assert_eq!(campaign.stats.sent, 1);
    assert_eq!(campaign.stats.failed, 0);
    assert_eq!(campaign.status, CampaignStatus::Running);
}

#[tokio::test]
async fn unknown_tracking_reference_is_not_found() {
    let (core, campaign_id, _) = dispatched(&["Farhan"]).await;

    let err = core
        .apply_receipt(receipt(Uuid::now_v7(), DeliveryOutcome::Delivered, None))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(..)));
    assert_eq!(core.campaigns.get(campaign_id).await.unwrap().stats.sent, 0);
}

#[tokio::test]
async fn receipt_after_campaign_deletion_still_resolves_the_record() {
    let (core, campaign_id, logs) = dispatched(&["Gita"]).await;
    core.campaigns.delete(campaign_id).await.unwrap();

    let outcome = core
        .apply_receipt(receipt(logs[0].id, DeliveryOutcome::Delivered, None))
        .await
        .unwrap();
    assert!(matches!(outcome, ReceiptOutcome::Applied { campaign_status: None, .. }));
}

#[tokio::test]
async fn manual_status_override_is_kept_by_receipts() {
    let (core, campaign_id, logs) = dispatched(&["Harsh"]).await;
    core.campaigns.set_status(campaign_id, CampaignStatus::Scheduled).await.unwrap();

    core.apply_receipt(receipt(logs[0].id, DeliveryOutcome::Delivered, None))
        .await
        .unwrap();
    let campaign = core.campaigns.get(campaign_id).await.unwrap();
    // Only a running campaign is closed by its receipts
    assert_eq!(campaign.status, CampaignStatus::Scheduled);
    assert_eq!(campaign.stats.sent, 1);
}
