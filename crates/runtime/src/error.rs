use thiserror::Error;

use crate::provider::BoxError;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// VM provisioning failed; no session binding was created.
    #[error("sandbox provisioning failed: {0}")]
    Provision(#[source] BoxError),

    /// A file transfer or command against a live VM failed.
    #[error("sandbox vm error: {0}")]
    Vm(#[source] BoxError),

    /// The sandboxed function threw; message and stack come from the VM.
    #[error("{message}")]
    Script {
        message: String,
        stack: Option<String>,
    },

    /// The runner reply could not be parsed; both streams are carried
    /// verbatim for diagnosis.
    #[error("unparseable sandbox reply\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}")]
    Protocol { stdout: String, stderr: String },

    /// Bundle lookup or read failure, including "nothing published yet".
    #[error(transparent)]
    Bundle(#[from] exclave_bundle::Error),

    /// Persistent install-state store failure.
    #[error("install-state store error: {0}")]
    State(#[source] BoxError),

    /// Arguments or payload were not JSON-representable.
    #[error("sandbox payload serialisation failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Error {
    /// Stack text reported by the VM, when the call failed remotely.
    #[must_use]
    pub fn remote_stack(&self) -> Option<&str> {
        match self {
            Self::Script { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }
}
