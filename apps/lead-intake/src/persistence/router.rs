use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use super::store::{LeadStore, LeadStoreError};
use crate::types::{LEAD_ID_PREFIX, LeadRequest, StorageTier, StoredLead};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("both storage tiers failed for {lead_id} (primary: {primary}; fallback: {fallback})")]
    BothTiersFailed {
        lead_id: String,
        primary: LeadStoreError,
        fallback: LeadStoreError,
    },
    #[error("lookup failed: {0}")]
    Lookup(LeadStoreError),
}

impl PersistenceError {
    /// Id allocated for the lead that could not be stored, if any.
    #[must_use]
    pub fn lead_id(&self) -> Option<&str> {
        match self {
            Self::BothTiersFailed { lead_id, .. } => Some(lead_id),
            Self::Lookup(_) => None,
        }
    }
}

/// Writes each lead to the primary tier, dropping to the local fallback when the
/// primary fails or does not answer within `primary_timeout`.
#[derive(Clone)]
pub struct PersistenceRouter {
    primary: Arc<dyn LeadStore>,
    fallback: Arc<dyn LeadStore>,
    primary_timeout: Duration,
}

impl PersistenceRouter {
    pub fn new(
        primary: Arc<dyn LeadStore>,
        fallback: Arc<dyn LeadStore>,
        primary_timeout: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            primary_timeout,
        }
    }

    #[must_use]
    pub fn next_lead_id() -> String {
        format!("{LEAD_ID_PREFIX}{}", Uuid::now_v7().simple())
    }

    pub async fn store(&self, request: LeadRequest) -> Result<StoredLead, PersistenceError> {
        let mut lead = StoredLead {
            id: Self::next_lead_id(),
            created_at: Utc::now(),
            storage_tier: StorageTier::Primary,
            request,
        };

        let primary_error = match self.put_primary(&lead).await {
            Ok(()) => return Ok(lead),
            Err(error) => error,
        };
        tracing::warn!(
            lead_id = %lead.id,
            backend = self.primary.backend_name(),
            reason = %primary_error,
            "primary lead write failed, using fallback tier"
        );

        lead.storage_tier = StorageTier::Fallback;
        match self.fallback.put(&lead).await {
            Ok(_) => Ok(lead),
            Err(fallback_error) => {
                tracing::error!(
                    lead_id = %lead.id,
                    primary_reason = %primary_error,
                    fallback_reason = %fallback_error,
                    "lead could not be persisted to any tier"
                );
                Err(PersistenceError::BothTiersFailed {
                    lead_id: lead.id,
                    primary: primary_error,
                    fallback: fallback_error,
                })
            }
        }
    }

    /// Reads the primary tier first. A primary read error is logged and the
    /// fallback tier is consulted before giving up.
    pub async fn get(&self, lead_id: &str) -> Result<Option<StoredLead>, PersistenceError> {
        match self.primary.get(lead_id).await {
            Ok(Some(lead)) => return Ok(Some(lead)),
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(lead_id, reason = %error, "primary lead read failed");
            }
        }
        self.fallback
            .get(lead_id)
            .await
            .map_err(PersistenceError::Lookup)
    }

    async fn put_primary(&self, lead: &StoredLead) -> Result<(), LeadStoreError> {
        match tokio::time::timeout(self.primary_timeout, self.primary.put(lead)).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(LeadStoreError::Timeout(
                u64::try_from(self.primary_timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }
}
