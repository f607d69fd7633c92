//! Project-level sandbox bundler.
//!
//! Generated sandbox modules are written to a durable staging directory as
//! files are transformed (transformations may run in separate worker
//! processes, so an in-memory registry would miss contributions). Bundling
//! rescans the staging directory, computes a content digest over the sorted
//! module set, and — only when the digest changed — drives an external
//! ES-module bundler over a synthesised entry module, publishing
//! `bundle-<digest>.js` plus a manifest.

mod error;
mod esbuild;
mod manifest;
mod staging;

use std::path::{Path, PathBuf};

pub use error::{Error, Result};
pub use manifest::{Manifest, PublishedBundle};
pub use staging::{StagedModule, register, scan};

/// Staging directory for generated modules, under the project build output.
pub const STAGING_DIR: &str = ".sandbox-temp";
/// Publish directory for bundle artefacts, under the project build output.
pub const PUBLISH_DIR: &str = "static/sandbox";
/// Entry module re-exporting every staged module.
pub const ENTRY_FILE: &str = "_sandbox_entry.ts";

/// Modules never folded into the bundle: node built-ins and the host
/// framework packages a project source may import. The shell helper subpath
/// is deliberately absent so the VM can resolve `$` from the bundle itself.
const DEFAULT_EXTERNALS: &[&str] = &[
    "node:*",
    "assert",
    "buffer",
    "child_process",
    "crypto",
    "dns",
    "events",
    "fs",
    "http",
    "https",
    "net",
    "os",
    "path",
    "querystring",
    "readline",
    "stream",
    "tls",
    "tty",
    "url",
    "util",
    "worker_threads",
    "zlib",
    "next",
    "react",
    "react-dom",
];

/// Bundler configuration for one project build output.
#[derive(Clone, Debug)]
pub struct BundleConfig {
    out_dir: PathBuf,
    esbuild: PathBuf,
    externals: Vec<String>,
}

impl BundleConfig {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            esbuild: PathBuf::from("esbuild"),
            externals: DEFAULT_EXTERNALS.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    /// Path or name of the external bundler executable.
    #[must_use]
    pub fn esbuild(mut self, program: impl Into<PathBuf>) -> Self {
        self.esbuild = program.into();
        self
    }

    /// Add packages to the external list.
    #[must_use]
    pub fn extra_externals<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.externals.extend(packages.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.out_dir.join(STAGING_DIR)
    }

    #[must_use]
    pub fn publish_dir(&self) -> PathBuf {
        self.out_dir.join(PUBLISH_DIR)
    }
}

/// Result of a bundling pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Staging held no modules; nothing to publish.
    NoModules,
    /// The digest matches the published manifest; nothing rewritten.
    Unchanged { hash: String },
    /// A new bundle and manifest were written.
    Published { hash: String, bundle_file: String },
}

/// Rescan staging and (re)publish the bundle if its content digest changed.
///
/// # Errors
/// Fails on staging I/O errors and on bundler invocation failures. An
/// unchanged digest short-circuits before the external tool runs, which is
/// what makes repeated builds of an unchanged tree idempotent.
pub async fn build(config: &BundleConfig) -> Result<BuildOutcome> {
    let modules = staging::scan(config)?;
    if modules.is_empty() {
        return Ok(BuildOutcome::NoModules);
    }

    let hash = staging::content_digest(&modules);
    let publish_dir = config.publish_dir();

    if let Some(existing) = Manifest::load(&publish_dir)?
        && existing.hash == hash
        && publish_dir.join(&existing.bundle_file).exists()
    {
        tracing::debug!(%hash, "sandbox bundle unchanged");
        return Ok(BuildOutcome::Unchanged { hash });
    }

    let entry = staging::write_entry(config, &modules)?;
    let bundle_file = format!("bundle-{hash}.js");
    std::fs::create_dir_all(&publish_dir)?;
    esbuild::bundle(config, &entry, &publish_dir.join(&bundle_file)).await?;
    remove_stale_bundles(&publish_dir, &bundle_file)?;

    let manifest = Manifest {
        hash: hash.clone(),
        bundle_file: bundle_file.clone(),
        generated_at: chrono::Utc::now(),
        sandbox_files: modules.iter().map(|m| m.file_name.clone()).collect(),
    };
    manifest.write(&publish_dir)?;

    tracing::info!(%hash, modules = modules.len(), "published sandbox bundle");
    Ok(BuildOutcome::Published { hash, bundle_file })
}

fn remove_stale_bundles(publish_dir: &Path, keep: &str) -> Result<()> {
    for entry in std::fs::read_dir(publish_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("bundle-") && name.ends_with(".js") && name != keep {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
