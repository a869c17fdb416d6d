use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::shutdown::Shutdown;
use crate::types::Contractor;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("read directory file {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("parse directory file {path}: {reason}")]
    Parse { path: String, reason: String },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DirectoryFile {
    List(Vec<Contractor>),
    Wrapped { contractors: Vec<Contractor> },
}

/// Read-only contractor snapshot. Refreshes replace the whole slice, so a reader
/// holding a snapshot never sees a partially updated list.
#[derive(Clone, Default)]
pub struct ContractorDirectory {
    snapshot: Arc<RwLock<Arc<[Contractor]>>>,
}

impl ContractorDirectory {
    #[must_use]
    pub fn new(contractors: Vec<Contractor>) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(contractors.into())),
        }
    }

    #[must_use]
    pub fn current_snapshot(&self) -> Arc<[Contractor]> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, contractors: Vec<Contractor>) {
        let next: Arc<[Contractor]> = contractors.into();
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = next;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.current_snapshot().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn load_file(path: &Path) -> Result<Vec<Contractor>, DirectoryError> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|error| DirectoryError::Read {
                path: path.display().to_string(),
                reason: error.to_string(),
            })?;
        let parsed: DirectoryFile =
            serde_json::from_slice(&raw).map_err(|error| DirectoryError::Parse {
                path: path.display().to_string(),
                reason: error.to_string(),
            })?;
        Ok(match parsed {
            DirectoryFile::List(contractors) => contractors,
            DirectoryFile::Wrapped { contractors } => contractors,
        })
    }

    /// On failure the previous snapshot stays in place.
    pub async fn refresh_from_file(&self, path: &Path) -> Result<usize, DirectoryError> {
        let contractors = Self::load_file(path).await?;
        let count = contractors.len();
        self.replace(contractors);
        Ok(count)
    }

    pub fn spawn_file_refresh(
        &self,
        path: PathBuf,
        interval: Duration,
        shutdown: Shutdown,
    ) -> JoinHandle<()> {
        let directory = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately and the caller has already loaded once.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = ticker.tick() => {
                        match directory.refresh_from_file(&path).await {
                            Ok(count) => tracing::debug!(contractors = count, "contractor directory refreshed"),
                            Err(error) => tracing::warn!(reason = %error, "contractor directory refresh failed"),
                        }
                    }
                }
            }
        })
    }
}
