//! Sandbox runtime orchestrator.
//!
//! This crate exposes the host-side half of the sandbox-function system:
//! - [`Sandbox`]: the pooled definition with `run` / `run_fn` / `invoke` /
//!   `stop` / `stop_all` and an observable [`Sandbox::size`].
//! - [`SandboxProvider`] / [`SandboxVm`]: traits over the external
//!   provisioner (`create`, `write_files`, `run_command`, `stop`).
//! - [`InstallStateStore`]: persistent session-key → installed-bundle-hash
//!   mapping, filesystem-backed by default.
//! - [`RUNNER_SOURCE`]: the fixed script installed into every VM.
//!
//! Typical flow: build a [`Sandbox`] over a provisioner and a project build
//! output that the bundler has published into, then `run` work under a
//! session key. Sandbox functions called inside the `run` callback reuse the
//! same VM through a task-local call context; calls outside any `run` get a
//! throwaway VM for the duration of the call.

mod context;
mod error;
mod install;
mod pool;
mod protocol;
mod provider;
mod runner;
mod state;

pub use error::{Error, Result};
pub use pool::{RunOptions, Sandbox, SandboxBuilder};
pub use protocol::SandboxFnCall;
pub use provider::{
    BoxError, CommandOptions, CommandOutput, CreateOptions, SandboxProvider, SandboxVm, VmFile,
};
pub use runner::{BUNDLE_PATH, RUNNER_PATH, RUNNER_SOURCE};
pub use state::{FsInstallStateStore, InstallStateStore, STATE_DIR};
