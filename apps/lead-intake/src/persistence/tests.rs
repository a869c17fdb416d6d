use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::store::{self, LeadStore, LeadStoreError};
use super::{JsonlFallbackStore, PersistenceError, PersistenceRouter};
use crate::types::{LEAD_ID_PREFIX, LeadOrigin, LeadRequest, StorageTier, StoredLead};

enum Broken {
    Refuses,
    Hangs,
}

struct BrokenStore(Broken);

#[async_trait]
impl LeadStore for BrokenStore {
    fn backend_name(&self) -> &'static str {
        "broken"
    }

    async fn put(&self, _lead: &StoredLead) -> Result<String, LeadStoreError> {
        match self.0 {
            Broken::Refuses => Err(LeadStoreError::Unavailable("connection refused".to_string())),
            Broken::Hangs => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(LeadStoreError::Unavailable("never answered".to_string()))
            }
        }
    }

    async fn get(&self, _lead_id: &str) -> Result<Option<StoredLead>, LeadStoreError> {
        Err(LeadStoreError::Unavailable("connection refused".to_string()))
    }
}

fn request(name: &str) -> LeadRequest {
    LeadRequest {
        name: name.to_string(),
        phone: "0821234567".to_string(),
        email: None,
        service_name: "Plumbing".to_string(),
        message: Some("Leaking geyser".to_string()),
        explicit_target_id: None,
        origin: LeadOrigin::WebForm,
        attachment_refs: Vec::new(),
    }
}

#[tokio::test]
async fn healthy_primary_tags_primary_and_reads_back() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let router = PersistenceRouter::new(
        store::memory(),
        Arc::new(JsonlFallbackStore::new(dir.path().join("leads.jsonl"))),
        Duration::from_secs(1),
    );

    let stored = router.store(request("Thandi")).await?;
    assert_eq!(stored.storage_tier, StorageTier::Primary);
    assert!(stored.id.starts_with(LEAD_ID_PREFIX));

    let loaded = router.get(&stored.id).await?.expect("lead should be readable");
    assert!(loaded.is_equivalent(&stored));
    assert_eq!(loaded.request, request("Thandi"));
    Ok(())
}

#[tokio::test]
async fn refused_primary_falls_back_and_reads_back() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let router = PersistenceRouter::new(
        Arc::new(BrokenStore(Broken::Refuses)),
        Arc::new(JsonlFallbackStore::new(dir.path().join("leads.jsonl"))),
        Duration::from_secs(1),
    );

    let stored = router.store(request("Thandi")).await?;
    assert_eq!(stored.storage_tier, StorageTier::Fallback);

    let loaded = router.get(&stored.id).await?.expect("lead should be readable");
    assert!(loaded.is_equivalent(&stored));
    assert_eq!(loaded.storage_tier, StorageTier::Fallback);
    Ok(())
}

#[tokio::test]
async fn slow_primary_times_out_into_fallback() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let router = PersistenceRouter::new(
        Arc::new(BrokenStore(Broken::Hangs)),
        Arc::new(JsonlFallbackStore::new(dir.path().join("leads.jsonl"))),
        Duration::from_millis(20),
    );

    let stored = router.store(request("Thandi")).await?;
    assert_eq!(stored.storage_tier, StorageTier::Fallback);
    Ok(())
}

#[tokio::test]
async fn both_tiers_failing_is_reported() -> Result<()> {
    let router = PersistenceRouter::new(
        Arc::new(BrokenStore(Broken::Refuses)),
        Arc::new(BrokenStore(Broken::Refuses)),
        Duration::from_secs(1),
    );

    let error = router
        .store(request("Thandi"))
        .await
        .expect_err("both tiers down must fail");
    assert!(matches!(error, PersistenceError::BothTiersFailed { .. }));
    let lead_id = error.lead_id().expect("failed write keeps its allocated id");
    assert!(lead_id.starts_with(LEAD_ID_PREFIX));
    assert!(error.to_string().contains(lead_id));
    Ok(())
}

#[tokio::test]
async fn concurrent_submissions_all_land_in_fallback_with_unique_ids() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fallback = Arc::new(JsonlFallbackStore::new(dir.path().join("leads.jsonl")));
    let router = PersistenceRouter::new(
        Arc::new(BrokenStore(Broken::Refuses)),
        fallback.clone(),
        Duration::from_secs(1),
    );

    let submissions = 50;
    let mut handles = Vec::new();
    for index in 0..submissions {
        let router = router.clone();
        handles.push(tokio::spawn(async move {
            router.store(request(&format!("Visitor {index}"))).await
        }));
    }
    let mut ids = HashSet::new();
    for handle in handles {
        let stored = handle.await??;
        assert_eq!(stored.storage_tier, StorageTier::Fallback);
        ids.insert(stored.id);
    }
    assert_eq!(ids.len(), submissions);

    let on_disk = fallback.load_all().await?;
    assert_eq!(on_disk.len(), submissions);
    let disk_ids = on_disk.into_iter().map(|lead| lead.id).collect::<HashSet<_>>();
    assert_eq!(disk_ids, ids);
    Ok(())
}
