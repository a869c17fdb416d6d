use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::store::{LeadStore, LeadStoreError};
use crate::types::StoredLead;

/// Local append-only JSON-lines tier. All file access goes through one lock so
/// concurrent writers never interleave partial lines.
pub struct JsonlFallbackStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl JsonlFallbackStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    /// Every readable record in file order. Malformed lines are skipped.
    pub async fn load_all(&self) -> Result<Vec<StoredLead>, LeadStoreError> {
        let _guard = self.writer.lock().await;
        self.read_unlocked().await
    }

    async fn read_unlocked(&self) -> Result<Vec<StoredLead>, LeadStoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(LeadStoreError::Io(error.to_string())),
        };

        let mut leads = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredLead>(line) {
                Ok(lead) => leads.push(lead),
                Err(error) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = index + 1,
                        reason = %error,
                        "skipping malformed fallback lead record"
                    );
                }
            }
        }
        Ok(leads)
    }
}

#[async_trait]
impl LeadStore for JsonlFallbackStore {
    fn backend_name(&self) -> &'static str {
        "jsonl"
    }

    async fn put(&self, lead: &StoredLead) -> Result<String, LeadStoreError> {
        let mut line =
            serde_json::to_string(lead).map_err(|error| LeadStoreError::Io(error.to_string()))?;
        line.push('\n');

        let _guard = self.writer.lock().await;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| LeadStoreError::Io(error.to_string()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|error| LeadStoreError::Io(error.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|error| LeadStoreError::Io(error.to_string()))?;
        file.flush()
            .await
            .map_err(|error| LeadStoreError::Io(error.to_string()))?;
        file.sync_data()
            .await
            .map_err(|error| LeadStoreError::Io(error.to_string()))?;
        Ok(lead.id.clone())
    }

    async fn get(&self, lead_id: &str) -> Result<Option<StoredLead>, LeadStoreError> {
        let _guard = self.writer.lock().await;
        let leads = self.read_unlocked().await?;
        Ok(leads.into_iter().find(|lead| lead.id == lead_id))
    }
}
