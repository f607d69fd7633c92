use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// Staging or publish directory I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Manifest (de)serialisation failure.
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    /// The external bundler executable could not be started.
    #[error("failed to spawn bundler `{program}`: {source}")]
    BundlerSpawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external bundler ran and failed.
    #[error("bundler exited with {status}: {stderr}")]
    Bundler { status: String, stderr: String },

    /// No bundle has been published into this build output yet.
    #[error(
        "no sandbox bundle published under {dir}; verify the build integration hook is installed"
    )]
    NotPublished { dir: PathBuf },
}
