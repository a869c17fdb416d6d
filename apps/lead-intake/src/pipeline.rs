use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::audit::{AuditLog, AuditOutcome, AuditStage};
use crate::counter::{LeadCounter, LeadCounterSnapshot};
use crate::directory::ContractorDirectory;
use crate::dispatch::NotificationDispatcher;
use crate::lifecycle::{LeadLifecycle, LeadState};
use crate::matcher::RecipientMatcher;
use crate::persistence::{PersistenceError, PersistenceRouter};
use crate::shutdown::Shutdown;
use crate::types::{
    DeliveryAttempt, DestinationKind, NotificationStatus, RawLeadSubmission, StorageTier,
    StoredLead,
};
use crate::validation::{ValidationError, Validator};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub id: String,
    pub storage_tier: StorageTier,
    pub created_at: DateTime<Utc>,
}

/// Validates, persists and hands each accepted lead to a background routing task.
#[derive(Clone)]
pub struct LeadPipeline {
    validator: Validator,
    persistence: PersistenceRouter,
    directory: ContractorDirectory,
    matcher: RecipientMatcher,
    dispatcher: NotificationDispatcher,
    audit: AuditLog,
    counter: Arc<LeadCounter>,
    tasks: Arc<Mutex<JoinSet<()>>>,
}

pub struct LeadPipelineParts {
    pub validator: Validator,
    pub persistence: PersistenceRouter,
    pub directory: ContractorDirectory,
    pub matcher: RecipientMatcher,
    pub dispatcher: NotificationDispatcher,
    pub audit: AuditLog,
    pub counter: Arc<LeadCounter>,
}

impl LeadPipeline {
    pub fn new(parts: LeadPipelineParts) -> Self {
        Self {
            validator: parts.validator,
            persistence: parts.persistence,
            directory: parts.directory,
            matcher: parts.matcher,
            dispatcher: parts.dispatcher,
            audit: parts.audit,
            counter: parts.counter,
            tasks: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Returns once the lead is durable on some tier. Matching and delivery
    /// continue in the background and never affect the result.
    pub async fn submit(&self, raw: RawLeadSubmission) -> Result<SubmitReceipt, SubmitError> {
        let mut lifecycle = LeadLifecycle::new();

        let request = match self.validator.validate(raw) {
            Ok(request) => request,
            Err(error) => {
                lifecycle.advance_or_log(LeadState::Rejected);
                self.counter.record_rejected().await;
                self.audit.record(
                    None,
                    AuditStage::Validated,
                    AuditOutcome::Rejected,
                    json!({
                        "missingFields": error.missing_fields,
                        "invalidFields": error.invalid_fields,
                    }),
                );
                return Err(error.into());
            }
        };
        lifecycle.advance_or_log(LeadState::Validated);

        let lead = match self.persistence.store(request).await {
            Ok(lead) => lead,
            Err(error) => {
                lifecycle.advance_or_log(LeadState::Rejected);
                self.counter.record_persistence_failure().await;
                self.audit.record(
                    error.lead_id(),
                    AuditStage::Persisted,
                    AuditOutcome::Failed,
                    json!({ "reason": error.to_string() }),
                );
                return Err(error.into());
            }
        };
        lifecycle.assign_id(&lead.id);
        lifecycle.advance_or_log(LeadState::Persisted);

        self.audit.record(
            Some(&lead.id),
            AuditStage::Validated,
            AuditOutcome::Accepted,
            json!({ "origin": lead.request.origin.as_str() }),
        );
        self.audit.record(
            Some(&lead.id),
            AuditStage::Persisted,
            match lead.storage_tier {
                StorageTier::Primary => AuditOutcome::Primary,
                StorageTier::Fallback => AuditOutcome::Fallback,
            },
            json!({ "storageTier": lead.storage_tier.as_str() }),
        );
        self.counter
            .record_accepted(lead.storage_tier, lead.created_at)
            .await;
        tracing::info!(
            lead_id = %lead.id,
            storage_tier = lead.storage_tier.as_str(),
            "lead accepted"
        );

        let receipt = SubmitReceipt {
            id: lead.id.clone(),
            storage_tier: lead.storage_tier,
            created_at: lead.created_at,
        };
        self.spawn_routing(lead, lifecycle).await;
        Ok(receipt)
    }

    async fn spawn_routing(&self, lead: StoredLead, lifecycle: LeadLifecycle) {
        let pipeline = self.clone();
        let mut tasks = self.tasks.lock().await;
        while let Some(finished) = tasks.try_join_next() {
            if let Err(error) = finished {
                tracing::error!(reason = %error, "lead routing task failed");
            }
        }
        tasks.spawn(async move {
            pipeline.route_and_notify(lead, lifecycle).await;
        });
    }

    /// Resolves targets against the current directory snapshot and delivers.
    pub async fn route_and_notify(
        &self,
        lead: StoredLead,
        mut lifecycle: LeadLifecycle,
    ) -> Vec<DeliveryAttempt> {
        let snapshot = self.directory.current_snapshot();
        let targets = self.matcher.resolve(&lead.request, &snapshot);
        lifecycle.advance_or_log(LeadState::Matched);
        self.audit.record(
            Some(&lead.id),
            AuditStage::Matched,
            AuditOutcome::Resolved,
            json!({ "targets": targets }),
        );
        for target in &targets {
            if target.destination_kind == DestinationKind::Contractor
                && let Some(contractor_id) = target.contractor_id.as_deref()
            {
                self.counter
                    .record_routed(contractor_id, lead.created_at)
                    .await;
            }
        }

        lifecycle.advance_or_log(LeadState::Notifying);
        let attempts = self.dispatcher.deliver(&lead, &targets).await;
        let status = NotificationStatus::summarize(&targets, &attempts);
        lifecycle.advance_or_log(status.into());
        tracing::info!(
            lead_id = %lead.id,
            status = status.as_str(),
            targets = targets.len(),
            attempts = attempts.len(),
            "lead notification settled"
        );
        self.audit.record(
            Some(&lead.id),
            AuditStage::Notified,
            match status {
                NotificationStatus::Notified => AuditOutcome::Notified,
                NotificationStatus::PartiallyNotified => AuditOutcome::PartiallyNotified,
                NotificationStatus::Unnotified => AuditOutcome::Unnotified,
            },
            json!({ "targets": targets.len(), "attempts": attempts.len() }),
        );
        attempts
    }

    pub async fn get(&self, lead_id: &str) -> Result<Option<StoredLead>, PersistenceError> {
        self.persistence.get(lead_id).await
    }

    pub async fn stats(&self) -> LeadCounterSnapshot {
        self.counter.snapshot(Utc::now()).await
    }

    #[must_use]
    pub fn directory(&self) -> &ContractorDirectory {
        &self.directory
    }

    /// Waits for every routing task spawned so far. Call after `Shutdown::trigger`
    /// so pending backoffs are abandoned instead of slept through.
    pub async fn drain(&self) {
        let mut tasks = {
            let mut guard = self.tasks.lock().await;
            std::mem::take(&mut *guard)
        };
        while let Some(finished) = tasks.join_next().await {
            if let Err(error) = finished {
                tracing::error!(reason = %error, "lead routing task failed");
            }
        }
    }

    pub async fn pending_tasks(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

/// Convenience for callers that already hold a `Shutdown`: trigger it, then drain.
pub async fn shutdown_and_drain(pipeline: &LeadPipeline, shutdown: &Shutdown) {
    shutdown.trigger();
    pipeline.drain().await;
}

#[cfg(test)]
mod tests;
