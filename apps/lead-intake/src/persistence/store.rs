use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::db::LeadsDb;
use crate::types::{LeadOrigin, LeadRequest, StorageTier, StoredLead};

#[derive(Debug, thiserror::Error)]
pub enum LeadStoreError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("write timed out after {0}ms")]
    Timeout(u64),
    #[error("io error: {0}")]
    Io(String),
    #[error("db error: {0}")]
    Db(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage capability shared by the primary and fallback tiers.
#[async_trait]
pub trait LeadStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Persists the lead and returns its id. Re-putting an identical record is a no-op.
    async fn put(&self, lead: &StoredLead) -> Result<String, LeadStoreError>;

    async fn get(&self, lead_id: &str) -> Result<Option<StoredLead>, LeadStoreError>;
}

pub fn memory() -> Arc<dyn LeadStore> {
    Arc::new(MemoryLeadStore::default())
}

pub fn postgres(db: Arc<LeadsDb>) -> Arc<dyn LeadStore> {
    Arc::new(PostgresLeadStore { db })
}

#[derive(Default)]
struct MemoryLeadStore {
    leads: Mutex<HashMap<String, StoredLead>>,
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, lead: &StoredLead) -> Result<String, LeadStoreError> {
        let mut leads = self.leads.lock().await;
        if let Some(existing) = leads.get(&lead.id) {
            if !existing.is_equivalent(lead) {
                return Err(LeadStoreError::Conflict(
                    "lead_id reused with different lead content".to_string(),
                ));
            }
            return Ok(lead.id.clone());
        }
        leads.insert(lead.id.clone(), lead.clone());
        Ok(lead.id.clone())
    }

    async fn get(&self, lead_id: &str) -> Result<Option<StoredLead>, LeadStoreError> {
        let leads = self.leads.lock().await;
        Ok(leads.get(lead_id).cloned())
    }
}

struct PostgresLeadStore {
    db: Arc<LeadsDb>,
}

#[async_trait]
impl LeadStore for PostgresLeadStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn put(&self, lead: &StoredLead) -> Result<String, LeadStoreError> {
        let attachment_refs = serde_json::to_value(&lead.request.attachment_refs)
            .map_err(|error| LeadStoreError::Db(error.to_string()))?;
        let client = self.db.client();
        let client = client.lock().await;
        let inserted = client
            .execute(
                r#"
                INSERT INTO leads.leads (
                    lead_id, created_at, storage_tier, name, phone, email, service_name,
                    message, explicit_target_id, origin, attachment_refs
                ) VALUES (
                    $1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11
                )
                ON CONFLICT (lead_id) DO NOTHING
                "#,
                &[
                    &lead.id,
                    &lead.created_at,
                    &lead.storage_tier.as_str(),
                    &lead.request.name,
                    &lead.request.phone,
                    &lead.request.email,
                    &lead.request.service_name,
                    &lead.request.message,
                    &lead.request.explicit_target_id,
                    &lead.request.origin.as_str(),
                    &attachment_refs,
                ],
            )
            .await
            .map_err(map_pg_error)?;

        if inserted == 0 {
            return Err(LeadStoreError::Conflict(format!(
                "lead_id {} already stored",
                lead.id
            )));
        }
        Ok(lead.id.clone())
    }

    async fn get(&self, lead_id: &str) -> Result<Option<StoredLead>, LeadStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let row = client
            .query_opt(
                r#"
                SELECT lead_id, created_at, storage_tier, name, phone, email, service_name,
                       message, explicit_target_id, origin, attachment_refs
                  FROM leads.leads
                 WHERE lead_id = $1
                "#,
                &[&lead_id],
            )
            .await
            .map_err(map_pg_error)?;
        row.as_ref()
            .map(map_lead_row)
            .transpose()
            .map_err(LeadStoreError::Db)
    }
}

fn map_pg_error(error: tokio_postgres::Error) -> LeadStoreError {
    if error.is_closed() {
        LeadStoreError::Unavailable(error.to_string())
    } else {
        LeadStoreError::Db(error.to_string())
    }
}

fn map_lead_row(row: &tokio_postgres::Row) -> Result<StoredLead, String> {
    let storage_tier: String = row.try_get("storage_tier").map_err(|e| e.to_string())?;
    let origin: String = row.try_get("origin").map_err(|e| e.to_string())?;
    let attachment_refs: serde_json::Value =
        row.try_get("attachment_refs").map_err(|e| e.to_string())?;
    Ok(StoredLead {
        id: row.try_get("lead_id").map_err(|e| e.to_string())?,
        created_at: row.try_get("created_at").map_err(|e| e.to_string())?,
        storage_tier: StorageTier::parse(&storage_tier)
            .ok_or_else(|| format!("unknown storage tier: {storage_tier}"))?,
        request: LeadRequest {
            name: row.try_get("name").map_err(|e| e.to_string())?,
            phone: row.try_get("phone").map_err(|e| e.to_string())?,
            email: row.try_get("email").map_err(|e| e.to_string())?,
            service_name: row.try_get("service_name").map_err(|e| e.to_string())?,
            message: row.try_get("message").map_err(|e| e.to_string())?,
            explicit_target_id: row
                .try_get("explicit_target_id")
                .map_err(|e| e.to_string())?,
            origin: LeadOrigin::from_tag(&origin),
            attachment_refs: serde_json::from_value(attachment_refs)
                .map_err(|e| e.to_string())?,
        },
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{LeadStoreError, memory};
    use crate::types::{LeadOrigin, LeadRequest, StorageTier, StoredLead};

    fn lead(id: &str, name: &str) -> StoredLead {
        StoredLead {
            id: id.to_string(),
            created_at: Utc::now(),
            storage_tier: StorageTier::Primary,
            request: LeadRequest {
                name: name.to_string(),
                phone: "0821234567".to_string(),
                email: None,
                service_name: "Cleaning".to_string(),
                message: None,
                explicit_target_id: None,
                origin: LeadOrigin::WebForm,
                attachment_refs: Vec::new(),
            },
        }
    }

    #[tokio::test]
    async fn memory_store_round_trips_and_rejects_divergent_reuse() -> anyhow::Result<()> {
        let store = memory();
        let stored = lead("lead_a", "Thandi");
        assert_eq!(store.put(&stored).await?, "lead_a");
        assert_eq!(store.put(&stored).await?, "lead_a");
        assert_eq!(store.get("lead_a").await?, Some(stored.clone()));
        assert_eq!(store.get("lead_missing").await?, None);

        let mut divergent = stored;
        divergent.request.name = "Someone Else".to_string();
        let error = store.put(&divergent).await.expect_err("divergent put must fail");
        assert!(matches!(error, LeadStoreError::Conflict(_)));
        Ok(())
    }
}
