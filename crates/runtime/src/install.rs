//! Per-call ready check: runner and bundle installation.

use std::sync::atomic::Ordering;

use exclave_bundle::PublishedBundle;

use crate::error::{Error, Result};
use crate::pool::Session;
use crate::provider::VmFile;
use crate::runner::{BUNDLE_PATH, RUNNER_PATH, RUNNER_SOURCE};
use crate::state::InstallStateStore;

/// Bring a session's VM up to date before a command is issued.
///
/// The runner flag lives in process memory (losing it across restarts only
/// costs one redundant write of a fixed blob); the bundle digest is read
/// from the persistent store for keyed sessions. Both queued writes go out
/// as one batch, and state is updated strictly after the batch succeeds so
/// a crash in between over-installs on recovery rather than skipping a
/// needed install.
pub(crate) async fn ensure_ready(
    session: &Session,
    bundle: &PublishedBundle,
    store: &dyn InstallStateStore,
) -> Result<()> {
    let _guard = session.install_lock.lock().await;

    let mut files = Vec::with_capacity(2);
    let runner_missing = !session.runner_installed.load(Ordering::Acquire);
    if runner_missing {
        files.push(VmFile::new(RUNNER_PATH, RUNNER_SOURCE));
    }

    let installed = match &session.key {
        Some(key) => store.installed_hash(key).await.map_err(Error::State)?,
        None => session.installed_hash.lock().clone(),
    };
    let bundle_stale = installed.as_deref() != Some(bundle.hash.as_str());
    if bundle_stale {
        files.push(VmFile::new(BUNDLE_PATH, bundle.content.clone()));
    }

    if files.is_empty() {
        return Ok(());
    }

    session.vm.write_files(&files).await.map_err(Error::Vm)?;

    if runner_missing {
        session.runner_installed.store(true, Ordering::Release);
    }
    if bundle_stale {
        *session.installed_hash.lock() = Some(bundle.hash.clone());
        if let Some(key) = &session.key {
            store
                .set_installed_hash(key, &bundle.hash)
                .await
                .map_err(Error::State)?;
        }
        tracing::info!(vm = session.vm.id(), hash = %bundle.hash, "installed sandbox bundle");
    }

    Ok(())
}
