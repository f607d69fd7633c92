//! External bundler invocation.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{Error, Result};
use crate::BundleConfig;

/// Run the external bundler over the entry module, producing a single
/// minified, tree-shaken ES module targeting a modern server runtime.
pub(crate) async fn bundle(config: &BundleConfig, entry: &Path, outfile: &Path) -> Result<()> {
    let mut cmd = Command::new(&config.esbuild);
    cmd.arg(entry)
        .arg("--bundle")
        .arg("--format=esm")
        .arg("--platform=node")
        .arg("--target=node20")
        .arg("--tree-shaking=true")
        .arg("--minify")
        .arg(format!("--outfile={}", outfile.display()));
    for external in &config.externals {
        cmd.arg(format!("--external:{external}"));
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    tracing::debug!(entry = %entry.display(), outfile = %outfile.display(), "invoking bundler");

    let output = cmd.output().await.map_err(|source| Error::BundlerSpawn {
        program: config.esbuild.clone(),
        source,
    })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(Error::Bundler {
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
