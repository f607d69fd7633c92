//! Bundle manifest and published-bundle access.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::{BundleConfig, PUBLISH_DIR};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Description of the currently published bundle.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub hash: String,
    pub bundle_file: String,
    pub generated_at: DateTime<Utc>,
    pub sandbox_files: Vec<String>,
}

impl Manifest {
    /// Read the manifest beside the bundle, if one has been published.
    pub fn load(publish_dir: &Path) -> Result<Option<Self>> {
        let path = publish_dir.join(MANIFEST_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn write(&self, publish_dir: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(publish_dir.join(MANIFEST_FILE), content)?;
        Ok(())
    }
}

/// The published bundle as the orchestrator consumes it: digest plus the
/// bytes to install into a VM.
#[derive(Clone, Debug)]
pub struct PublishedBundle {
    pub hash: String,
    pub file_name: String,
    pub content: Vec<u8>,
}

impl PublishedBundle {
    /// Load the current bundle from a project build output.
    ///
    /// # Errors
    /// Returns [`Error::NotPublished`] when no manifest exists — the usual
    /// cause is a missing build-integration hook, and the error says so.
    pub fn load(out_dir: &Path) -> Result<Self> {
        let publish_dir = out_dir.join(PUBLISH_DIR);
        let manifest = Manifest::load(&publish_dir)?.ok_or_else(|| Error::NotPublished {
            dir: publish_dir.clone(),
        })?;
        let content = std::fs::read(publish_dir.join(&manifest.bundle_file))?;
        Ok(Self {
            hash: manifest.hash,
            file_name: manifest.bundle_file,
            content,
        })
    }

    /// Load via a bundler config (same build output).
    pub fn load_from(config: &BundleConfig) -> Result<Self> {
        Self::load(config.out_dir())
    }
}
