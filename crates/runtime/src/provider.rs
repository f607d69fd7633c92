//! Provisioner traits.
//!
//! The upstream sandbox API is an external collaborator; the orchestrator
//! only assumes it can create (or reattach) a VM, write files into it, run a
//! command, and stop it. Implementations are expected to be remote clients;
//! every method is an awaitable boundary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Type-erased error for provisioner implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Resource sizing and timeout options forwarded to the provisioner.
#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    pub cpus: Option<u32>,
    pub memory_mb: Option<u32>,
    /// Overall VM lifetime cap, provisioner-interpreted.
    pub timeout: Option<Duration>,
}

/// A file to install into a VM, absolute guest path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmFile {
    pub path: String,
    pub content: Vec<u8>,
}

impl VmFile {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Per-command options.
#[derive(Clone, Debug, Default)]
pub struct CommandOptions {
    pub sudo: bool,
    pub timeout: Option<Duration>,
}

/// Captured output of one command run inside a VM.
#[derive(Clone, Debug)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Live VM handle. Owned exclusively by the orchestrator's session
/// bindings; nothing outside the pool may stop one.
#[async_trait]
pub trait SandboxVm: Send + Sync {
    /// Provisioner-assigned identifier, for logging.
    fn id(&self) -> &str;

    /// Batch-write files into the VM filesystem.
    async fn write_files(&self, files: &[VmFile]) -> Result<(), BoxError>;

    /// Run a command to completion and capture its output.
    async fn run_command(
        &self,
        program: &str,
        args: &[String],
        options: &CommandOptions,
    ) -> Result<CommandOutput, BoxError>;

    /// Tear the VM down. Idempotent.
    async fn stop(&self) -> Result<(), BoxError>;
}

/// Factory for VMs.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Create a VM, or reattach to the surviving VM for `key` when the
    /// provisioner supports it (session keys outlive host processes).
    async fn create(
        &self,
        key: Option<&str>,
        options: &CreateOptions,
    ) -> Result<Arc<dyn SandboxVm>, BoxError>;
}
