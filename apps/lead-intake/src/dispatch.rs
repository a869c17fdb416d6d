use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde_json::json;

use crate::audit::{AuditLog, AuditOutcome, AuditStage};
use crate::relay::{MessageRelay, RelayOutcome};
use crate::shutdown::Shutdown;
use crate::types::{DeliveryAttempt, DeliveryOutcome, NotificationTarget, StoredLead};
use crate::validation::truncate_chars;

pub const MESSAGE_PREVIEW_CHARS: usize = 300;

#[derive(Clone, Debug)]
pub struct DeliveryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub attempt_timeout: Duration,
    pub max_notification_chars: usize,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(10),
            max_notification_chars: 4_000,
        }
    }
}

/// Delay before retry `n + 1`, doubling from `base` after the first failure.
#[must_use]
pub fn backoff_delay(base: Duration, failed_attempt: u32) -> Duration {
    let exponent = failed_attempt.saturating_sub(1).min(16);
    base.saturating_mul(1_u32 << exponent)
}

/// Plain-text notice sent to every target of a lead.
#[must_use]
pub fn format_lead_notice(lead: &StoredLead, max_chars: usize) -> String {
    let request = &lead.request;
    let mut lines = vec![
        format!("New lead {}", lead.id),
        format!("Name: {}", request.name),
        format!("Phone: {}", request.phone),
        format!("Service: {}", request.service_name),
    ];
    if let Some(message) = request.message.as_deref() {
        let preview = if message.chars().count() > MESSAGE_PREVIEW_CHARS {
            format!("{}...", truncate_chars(message, MESSAGE_PREVIEW_CHARS))
        } else {
            message.to_string()
        };
        lines.push(format!("Message: {preview}"));
    }
    if let Some(email) = request.email.as_deref() {
        lines.push(format!("Email: {email}"));
    }
    if !request.attachment_refs.is_empty() {
        lines.push(format!("Attachments: {}", request.attachment_refs.len()));
    }
    lines.push(format!("Origin: {}", request.origin.as_str()));
    lines.push(format!(
        "Received: {}",
        lead.created_at.format("%Y-%m-%d %H:%M UTC")
    ));
    truncate_chars(&lines.join("\n"), max_chars)
}

/// Delivers a lead notice to each target independently, retrying transient
/// failures with exponential backoff.
#[derive(Clone)]
pub struct NotificationDispatcher {
    relay: Arc<dyn MessageRelay>,
    audit: AuditLog,
    policy: DeliveryPolicy,
    shutdown: Shutdown,
}

impl NotificationDispatcher {
    pub fn new(
        relay: Arc<dyn MessageRelay>,
        audit: AuditLog,
        policy: DeliveryPolicy,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            relay,
            audit,
            policy,
            shutdown,
        }
    }

    /// Attempts grouped by target, in target order.
    pub async fn deliver(
        &self,
        lead: &StoredLead,
        targets: &[NotificationTarget],
    ) -> Vec<DeliveryAttempt> {
        let text = format_lead_notice(lead, self.policy.max_notification_chars);
        let per_target = join_all(
            targets
                .iter()
                .map(|target| self.deliver_to_target(lead, target, &text)),
        )
        .await;
        per_target.into_iter().flatten().collect()
    }

    async fn deliver_to_target(
        &self,
        lead: &StoredLead,
        target: &NotificationTarget,
        text: &str,
    ) -> Vec<DeliveryAttempt> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempts = Vec::new();

        for attempt_number in 1..=max_attempts {
            let (outcome, detail) = self.send_once(target, text).await;
            attempts.push(DeliveryAttempt {
                target: target.clone(),
                attempt_number,
                outcome,
                detail: detail.clone(),
                timestamp: Utc::now(),
            });

            let final_outcome = match outcome {
                DeliveryOutcome::Delivered => Some(AuditOutcome::Delivered),
                DeliveryOutcome::PermanentFailure => Some(AuditOutcome::PermanentFailure),
                DeliveryOutcome::TransientFailure if attempt_number >= max_attempts => {
                    Some(AuditOutcome::RetriesExhausted)
                }
                DeliveryOutcome::TransientFailure => None,
            };
            if let Some(final_outcome) = final_outcome {
                self.audit_target(lead, target, final_outcome, attempt_number, detail);
                return attempts;
            }

            let delay = backoff_delay(self.policy.base_backoff, attempt_number);
            tracing::debug!(
                lead_id = %lead.id,
                target = %target.label(),
                attempt = attempt_number,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "lead notice delivery failed transiently, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.wait() => {
                    self.audit_target(lead, target, AuditOutcome::Abandoned, attempt_number, detail);
                    return attempts;
                }
            }
        }
        attempts
    }

    async fn send_once(
        &self,
        target: &NotificationTarget,
        text: &str,
    ) -> (DeliveryOutcome, Option<String>) {
        match tokio::time::timeout(
            self.policy.attempt_timeout,
            self.relay.send(&target.address, text),
        )
        .await
        {
            Ok(RelayOutcome::Delivered) => (DeliveryOutcome::Delivered, None),
            Ok(RelayOutcome::TransientFailure(reason)) => {
                (DeliveryOutcome::TransientFailure, Some(reason))
            }
            Ok(RelayOutcome::PermanentFailure(reason)) => {
                (DeliveryOutcome::PermanentFailure, Some(reason))
            }
            Err(_) => (
                DeliveryOutcome::TransientFailure,
                Some(format!(
                    "relay {} timed out",
                    self.relay.driver_name()
                )),
            ),
        }
    }

    fn audit_target(
        &self,
        lead: &StoredLead,
        target: &NotificationTarget,
        outcome: AuditOutcome,
        attempts: u32,
        detail: Option<String>,
    ) {
        if outcome != AuditOutcome::Delivered {
            tracing::warn!(
                lead_id = %lead.id,
                target = %target.label(),
                outcome = outcome.as_str(),
                attempts,
                reason = detail.as_deref().unwrap_or("-"),
                "lead notice not delivered"
            );
        }
        self.audit.record(
            Some(&lead.id),
            AuditStage::Notified,
            outcome,
            json!({
                "target": target,
                "attempts": attempts,
                "reason": detail,
            }),
        );
    }
}
