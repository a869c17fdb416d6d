use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::types::StorageTier;

#[derive(Default)]
pub struct LeadCounter {
    inner: Mutex<LeadCounterInner>,
}

#[derive(Default)]
struct LeadCounterInner {
    total_accepted: u64,
    total_rejected: u64,
    primary_tier: u64,
    fallback_tier: u64,
    persistence_failures: u64,
    months: BTreeMap<String, MonthCounts>,
}

#[derive(Clone, Default)]
struct MonthCounts {
    accepted: u64,
    contractors: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LeadCounterSnapshot {
    pub total_accepted: u64,
    pub total_rejected: u64,
    pub primary_tier: u64,
    pub fallback_tier: u64,
    pub persistence_failures: u64,
    pub month: String,
    pub leads_this_month: u64,
    pub contractor_leads_this_month: BTreeMap<String, u64>,
}

fn month_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

impl LeadCounter {
    pub async fn record_accepted(&self, tier: StorageTier, at: DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        inner.total_accepted = inner.total_accepted.saturating_add(1);
        match tier {
            StorageTier::Primary => inner.primary_tier = inner.primary_tier.saturating_add(1),
            StorageTier::Fallback => inner.fallback_tier = inner.fallback_tier.saturating_add(1),
        }
        let month = inner.months.entry(month_key(at)).or_default();
        month.accepted = month.accepted.saturating_add(1);
    }

    pub async fn record_rejected(&self) {
        let mut inner = self.inner.lock().await;
        inner.total_rejected = inner.total_rejected.saturating_add(1);
    }

    pub async fn record_persistence_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.persistence_failures = inner.persistence_failures.saturating_add(1);
    }

    /// Counts against the month the lead was created in.
    pub async fn record_routed(&self, contractor_id: &str, lead_created_at: DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        let month = inner.months.entry(month_key(lead_created_at)).or_default();
        let entry = month
            .contractors
            .entry(contractor_id.to_string())
            .or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub async fn snapshot(&self, now: DateTime<Utc>) -> LeadCounterSnapshot {
        let inner = self.inner.lock().await;
        let month = month_key(now);
        let current = inner.months.get(&month).cloned().unwrap_or_default();
        LeadCounterSnapshot {
            total_accepted: inner.total_accepted,
            total_rejected: inner.total_rejected,
            primary_tier: inner.primary_tier,
            fallback_tier: inner.fallback_tier,
            persistence_failures: inner.persistence_failures,
            month,
            leads_this_month: current.accepted,
            contractor_leads_this_month: current.contractors,
        }
    }
}
