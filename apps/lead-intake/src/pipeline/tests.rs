use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{LeadPipeline, LeadPipelineParts, SubmitError};
use crate::audit::{AuditLog, AuditOutcome, AuditStage, MemoryAuditSink};
use crate::counter::LeadCounter;
use crate::directory::ContractorDirectory;
use crate::dispatch::{DeliveryPolicy, NotificationDispatcher};
use crate::matcher::RecipientMatcher;
use crate::persistence::{JsonlFallbackStore, LeadStore, LeadStoreError, PersistenceRouter, store};
use crate::relay::{MessageRelay, RelayOutcome};
use crate::shutdown::Shutdown;
use crate::types::{
    ChannelAddress, Contractor, RawLeadSubmission, StorageTier, StoredLead,
};

#[derive(Default)]
struct RecordingRelay {
    sent: Mutex<Vec<String>>,
    rejecting: Option<String>,
}

impl RecordingRelay {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("sent lock").clone()
    }
}

#[async_trait]
impl MessageRelay for RecordingRelay {
    fn driver_name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, address: &ChannelAddress, _text: &str) -> RelayOutcome {
        self.sent
            .lock()
            .expect("sent lock")
            .push(address.as_str().to_string());
        if self.rejecting.as_deref() == Some(address.as_str()) {
            return RelayOutcome::PermanentFailure("chat not found".to_string());
        }
        RelayOutcome::Delivered
    }
}

/// Holds every send until the test opens the gate.
struct GatedRelay {
    gate: Semaphore,
    delivered: Mutex<Vec<String>>,
}

#[async_trait]
impl MessageRelay for GatedRelay {
    fn driver_name(&self) -> &'static str {
        "gated"
    }

    async fn send(&self, address: &ChannelAddress, _text: &str) -> RelayOutcome {
        let Ok(_permit) = self.gate.acquire().await else {
            return RelayOutcome::TransientFailure("gate closed".to_string());
        };
        self.delivered
            .lock()
            .expect("delivered lock")
            .push(address.as_str().to_string());
        RelayOutcome::Delivered
    }
}

struct DownStore;

#[async_trait]
impl LeadStore for DownStore {
    fn backend_name(&self) -> &'static str {
        "down"
    }

    async fn put(&self, _lead: &StoredLead) -> Result<String, LeadStoreError> {
        Err(LeadStoreError::Unavailable("connection refused".to_string()))
    }

    async fn get(&self, _lead_id: &str) -> Result<Option<StoredLead>, LeadStoreError> {
        Err(LeadStoreError::Unavailable("connection refused".to_string()))
    }
}

struct Harness {
    pipeline: LeadPipeline,
    relay: Arc<RecordingRelay>,
    audit: MemoryAuditSink,
    _dir: tempfile::TempDir,
}

fn build_pipeline(
    primary: Arc<dyn LeadStore>,
    fallback: Arc<dyn LeadStore>,
    relay: Arc<dyn MessageRelay>,
    audit: AuditLog,
) -> LeadPipeline {
    let directory = ContractorDirectory::new(vec![Contractor {
        id: "ct-plumb".to_string(),
        display_name: "Drip Fixers".to_string(),
        services_offered: vec!["Plumbing Repair".to_string()],
        notification_address: Some(ChannelAddress::new("ct-chat")),
        phone: None,
    }]);
    LeadPipeline::new(LeadPipelineParts {
        validator: Default::default(),
        persistence: PersistenceRouter::new(primary, fallback, Duration::from_millis(200)),
        directory,
        matcher: RecipientMatcher::new(ChannelAddress::new("ops-chat")),
        dispatcher: NotificationDispatcher::new(
            relay,
            audit.clone(),
            DeliveryPolicy {
                base_backoff: Duration::from_millis(1),
                ..DeliveryPolicy::default()
            },
            Shutdown::new(),
        ),
        audit,
        counter: Arc::new(LeadCounter::default()),
    })
}

fn harness(primary: Arc<dyn LeadStore>, relay: RecordingRelay) -> Result<Harness> {
    let dir = tempfile::tempdir()?;
    let relay = Arc::new(relay);
    let audit_sink = MemoryAuditSink::default();
    let pipeline = build_pipeline(
        primary,
        Arc::new(JsonlFallbackStore::new(dir.path().join("leads.jsonl"))),
        relay.clone(),
        AuditLog::new(Arc::new(audit_sink.clone())),
    );
    Ok(Harness {
        pipeline,
        relay,
        audit: audit_sink,
        _dir: dir,
    })
}

fn submission(name: &str, service: &str) -> RawLeadSubmission {
    RawLeadSubmission {
        name: Some(name.to_string()),
        phone: Some("0821234567".to_string()),
        service_name: Some(service.to_string()),
        ..RawLeadSubmission::default()
    }
}

#[tokio::test]
async fn rejected_lead_is_never_stored_or_notified() -> Result<()> {
    let h = harness(store::memory(), RecordingRelay::default())?;

    let error = h
        .pipeline
        .submit(submission("", "Cleaning"))
        .await
        .expect_err("empty name must be rejected");
    match error {
        SubmitError::Validation(error) => assert_eq!(error.missing_fields, vec!["name"]),
        other => panic!("unexpected error: {other:?}"),
    }
    h.pipeline.drain().await;

    assert!(h.relay.sent().is_empty());
    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].stage, AuditStage::Validated);
    assert_eq!(records[0].outcome, AuditOutcome::Rejected);
    assert_eq!(h.pipeline.stats().await.total_accepted, 0);
    assert_eq!(h.pipeline.stats().await.total_rejected, 1);
    Ok(())
}

#[tokio::test]
async fn accepted_lead_reaches_operations_and_matched_contractor() -> Result<()> {
    let h = harness(store::memory(), RecordingRelay::default())?;

    let receipt = h.pipeline.submit(submission("Thandi", "Plumbing")).await?;
    assert_eq!(receipt.storage_tier, StorageTier::Primary);
    h.pipeline.drain().await;

    let mut sent = h.relay.sent();
    sent.sort();
    assert_eq!(sent, vec!["ct-chat".to_string(), "ops-chat".to_string()]);

    let outcomes = h
        .audit
        .records_for(&receipt.id)
        .into_iter()
        .map(|record| (record.stage, record.outcome))
        .collect::<Vec<_>>();
    assert!(outcomes.contains(&(AuditStage::Persisted, AuditOutcome::Primary)));
    assert!(outcomes.contains(&(AuditStage::Matched, AuditOutcome::Resolved)));
    assert_eq!(
        outcomes.last(),
        Some(&(AuditStage::Notified, AuditOutcome::Notified))
    );

    let stats = h.pipeline.stats().await;
    assert_eq!(stats.leads_this_month, 1);
    assert_eq!(stats.contractor_leads_this_month.get("ct-plumb"), Some(&1));
    assert!(h.pipeline.get(&receipt.id).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn contractor_rejection_leaves_lead_partially_notified() -> Result<()> {
    let relay = RecordingRelay {
        rejecting: Some("ct-chat".to_string()),
        ..RecordingRelay::default()
    };
    let h = harness(store::memory(), relay)?;

    let receipt = h.pipeline.submit(submission("Thandi", "Plumbing")).await?;
    h.pipeline.drain().await;

    assert!(h.relay.sent().contains(&"ops-chat".to_string()));
    let last = h
        .audit
        .records_for(&receipt.id)
        .last()
        .map(|record| record.outcome);
    assert_eq!(last, Some(AuditOutcome::PartiallyNotified));
    Ok(())
}

#[tokio::test]
async fn primary_outage_still_accepts_into_fallback() -> Result<()> {
    let h = harness(Arc::new(DownStore), RecordingRelay::default())?;

    let receipt = h.pipeline.submit(submission("Thandi", "Cleaning")).await?;
    assert_eq!(receipt.storage_tier, StorageTier::Fallback);
    h.pipeline.drain().await;

    let stored = h
        .pipeline
        .get(&receipt.id)
        .await?
        .expect("fallback lead should be readable");
    assert_eq!(stored.storage_tier, StorageTier::Fallback);
    assert_eq!(h.relay.sent(), vec!["ops-chat".to_string()]);
    assert_eq!(h.pipeline.stats().await.fallback_tier, 1);
    assert_eq!(h.pipeline.pending_tasks().await, 0);
    Ok(())
}

#[tokio::test]
async fn submit_returns_before_notification_delivery() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let relay = Arc::new(GatedRelay {
        gate: Semaphore::new(0),
        delivered: Mutex::new(Vec::new()),
    });
    let audit_sink = MemoryAuditSink::default();
    let pipeline = build_pipeline(
        store::memory(),
        Arc::new(JsonlFallbackStore::new(dir.path().join("leads.jsonl"))),
        relay.clone(),
        AuditLog::new(Arc::new(audit_sink.clone())),
    );

    let receipt = tokio::time::timeout(
        Duration::from_millis(500),
        pipeline.submit(submission("Thandi", "Plumbing")),
    )
    .await
    .expect("submit must not wait for delivery")?;
    assert_eq!(receipt.storage_tier, StorageTier::Primary);
    assert!(pipeline.pending_tasks().await > 0);
    assert!(relay.delivered.lock().expect("delivered lock").is_empty());
    assert!(
        !audit_sink
            .records_for(&receipt.id)
            .iter()
            .any(|record| record.stage == AuditStage::Notified)
    );

    relay.gate.add_permits(2);
    pipeline.drain().await;

    assert_eq!(relay.delivered.lock().expect("delivered lock").len(), 2);
    assert_eq!(pipeline.pending_tasks().await, 0);
    let last = audit_sink
        .records_for(&receipt.id)
        .last()
        .map(|record| record.outcome);
    assert_eq!(last, Some(AuditOutcome::Notified));
    Ok(())
}

#[tokio::test]
async fn lead_lost_on_both_tiers_is_never_routed() -> Result<()> {
    let relay = Arc::new(RecordingRelay::default());
    let audit_sink = MemoryAuditSink::default();
    let pipeline = build_pipeline(
        Arc::new(DownStore),
        Arc::new(DownStore),
        relay.clone(),
        AuditLog::new(Arc::new(audit_sink.clone())),
    );

    let error = pipeline
        .submit(submission("Thandi", "Plumbing"))
        .await
        .expect_err("both tiers down must fail");
    let error = match error {
        SubmitError::Persistence(error) => error,
        other => panic!("unexpected error: {other:?}"),
    };
    let lead_id = error.lead_id().expect("allocated id is reported").to_string();

    assert_eq!(pipeline.pending_tasks().await, 0);
    pipeline.drain().await;
    assert!(relay.sent().is_empty());

    let records = audit_sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].lead_id.as_deref(), Some(lead_id.as_str()));
    assert_eq!(records[0].stage, AuditStage::Persisted);
    assert_eq!(records[0].outcome, AuditOutcome::Failed);
    assert!(records.iter().all(|record| {
        record.stage != AuditStage::Matched && record.stage != AuditStage::Notified
    }));

    let stats = pipeline.stats().await;
    assert_eq!(stats.total_accepted, 0);
    assert_eq!(stats.leads_this_month, 0);
    Ok(())
}
