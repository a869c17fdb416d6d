use serde::Serialize;

use crate::types::NotificationStatus;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeadState {
    Received,
    Validated,
    Rejected,
    Persisted,
    Matched,
    Notifying,
    Notified,
    PartiallyNotified,
    Unnotified,
}

impl LeadState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::Rejected => "rejected",
            Self::Persisted => "persisted",
            Self::Matched => "matched",
            Self::Notifying => "notifying",
            Self::Notified => "notified",
            Self::PartiallyNotified => "partially_notified",
            Self::Unnotified => "unnotified",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Notified | Self::PartiallyNotified | Self::Unnotified
        )
    }

    #[must_use]
    pub fn can_transition_to(&self, next: LeadState) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::Validated)
                | (Self::Received, Self::Rejected)
                | (Self::Validated, Self::Persisted)
                | (Self::Validated, Self::Rejected)
                | (Self::Persisted, Self::Matched)
                | (Self::Matched, Self::Notifying)
                | (Self::Notifying, Self::Notified)
                | (Self::Notifying, Self::PartiallyNotified)
                | (Self::Notifying, Self::Unnotified)
        )
    }
}

impl From<NotificationStatus> for LeadState {
    fn from(status: NotificationStatus) -> Self {
        match status {
            NotificationStatus::Notified => Self::Notified,
            NotificationStatus::PartiallyNotified => Self::PartiallyNotified,
            NotificationStatus::Unnotified => Self::Unnotified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid lead transition {from} -> {to}")]
pub struct LifecycleError {
    pub from: &'static str,
    pub to: &'static str,
}

/// Tracks one lead through the pipeline.
#[derive(Clone, Debug)]
pub struct LeadLifecycle {
    lead_id: Option<String>,
    state: LeadState,
}

impl Default for LeadLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl LeadLifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lead_id: None,
            state: LeadState::Received,
        }
    }

    #[must_use]
    pub fn state(&self) -> LeadState {
        self.state
    }

    pub fn assign_id(&mut self, lead_id: &str) {
        self.lead_id = Some(lead_id.to_string());
    }

    pub fn advance(&mut self, next: LeadState) -> Result<(), LifecycleError> {
        if !self.state.can_transition_to(next) {
            return Err(LifecycleError {
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Like `advance`, but an illegal step is logged and the state left unchanged.
    pub fn advance_or_log(&mut self, next: LeadState) {
        if let Err(error) = self.advance(next) {
            tracing::error!(
                lead_id = self.lead_id.as_deref().unwrap_or("-"),
                reason = %error,
                "lead lifecycle violation"
            );
        }
    }
}
