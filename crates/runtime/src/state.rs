//! Persistent install-state store.
//!
//! Maps a session key to the bundle digest last installed into that key's
//! VM, so a freshly started host process can decide whether to re-upload.
//! Writes are last-writer-wins; there is no cross-process locking.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::BoxError;

/// Directory for the filesystem store, under the project build output.
pub const STATE_DIR: &str = ".sandbox-state";

#[async_trait]
pub trait InstallStateStore: Send + Sync {
    async fn installed_hash(&self, key: &str) -> Result<Option<String>, BoxError>;
    async fn set_installed_hash(&self, key: &str, hash: &str) -> Result<(), BoxError>;
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstallState {
    bundle_hash: String,
    updated_at: DateTime<Utc>,
}

/// Development default: one JSON file per session key under
/// `<out>/.sandbox-state/`. Production deployments may substitute an
/// external key-value store through the trait.
pub struct FsInstallStateStore {
    dir: PathBuf,
}

impl FsInstallStateStore {
    /// `out_dir` is the project build output.
    #[must_use]
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: out_dir.into().join(STATE_DIR),
        }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl InstallStateStore for FsInstallStateStore {
    async fn installed_hash(&self, key: &str) -> Result<Option<String>, BoxError> {
        match tokio::fs::read_to_string(self.key_path(key)).await {
            Ok(content) => {
                let state: InstallState = serde_json::from_str(&content)?;
                Ok(Some(state.bundle_hash))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set_installed_hash(&self, key: &str, hash: &str) -> Result<(), BoxError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let state = InstallState {
            bundle_hash: hash.to_owned(),
            updated_at: Utc::now(),
        };
        tokio::fs::write(self.key_path(key), serde_json::to_string_pretty(&state)?).await?;
        Ok(())
    }
}
