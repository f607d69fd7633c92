//! Build-integration driver.
//!
//! Stands in for the hosting framework's loader and build hooks: `transform`
//! applies the directive transformer to files and stages their generated
//! modules, `bundle` publishes the sandbox bundle, `status` inspects the
//! published artefacts and install state.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use exclave_bundle::{BuildOutcome, BundleConfig, Manifest};
use exclave_transform::TransformOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "exclave", about = "Sandbox-function build driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Transform sources and stage their generated sandbox modules.
    Transform {
        /// Source files to transform.
        files: Vec<PathBuf>,
        /// Project root; function ids are derived from paths relative to it.
        #[arg(long, default_value = ".")]
        project_root: PathBuf,
        /// Project build output directory.
        #[arg(long, default_value = ".next")]
        out_dir: PathBuf,
        /// Rewrite inputs in place instead of printing to stdout.
        #[arg(long)]
        write: bool,
        /// Runtime package name referenced by emitted stubs.
        #[arg(long, default_value = exclave_transform::DEFAULT_RUNTIME_PACKAGE)]
        runtime_package: String,
    },
    /// Bundle every staged sandbox module into the publish directory.
    Bundle {
        #[arg(long, default_value = ".next")]
        out_dir: PathBuf,
        /// External bundler executable.
        #[arg(long, default_value = "esbuild")]
        esbuild: PathBuf,
    },
    /// Show the published bundle manifest and per-session install state.
    Status {
        #[arg(long, default_value = ".next")]
        out_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Transform {
            files,
            project_root,
            out_dir,
            write,
            runtime_package,
        } => transform(files, &project_root, &out_dir, write, &runtime_package),
        Command::Bundle { out_dir, esbuild } => bundle(&out_dir, esbuild).await,
        Command::Status { out_dir } => status(&out_dir),
    }
}

fn transform(
    files: Vec<PathBuf>,
    project_root: &Path,
    out_dir: &Path,
    write: bool,
    runtime_package: &str,
) -> Result<()> {
    let config = BundleConfig::new(out_dir);
    for file in files {
        let source = std::fs::read_to_string(&file)
            .with_context(|| format!("reading {}", file.display()))?;
        let options = TransformOptions::new(file.clone(), project_root.to_path_buf())
            .runtime_package(runtime_package);
        let output = exclave_transform::transform_or_original(&source, &options);

        if let Some(module) = &output.module {
            exclave_bundle::register(&config, &module.file_name, &module.content)?;
            info!(
                file = %file.display(),
                functions = output.functions.len(),
                staged = module.file_name,
                "transformed"
            );
        }

        if write {
            if output.code != source {
                std::fs::write(&file, &output.code)
                    .with_context(|| format!("writing {}", file.display()))?;
            }
        } else {
            print!("{}", output.code);
        }
    }
    Ok(())
}

async fn bundle(out_dir: &Path, esbuild: PathBuf) -> Result<()> {
    let config = BundleConfig::new(out_dir).esbuild(esbuild);
    match exclave_bundle::build(&config).await? {
        BuildOutcome::NoModules => println!("no sandbox modules staged under {}", out_dir.display()),
        BuildOutcome::Unchanged { hash } => println!("bundle {hash} unchanged"),
        BuildOutcome::Published { hash, bundle_file } => {
            println!("published {bundle_file} (hash {hash})");
        }
    }
    Ok(())
}

fn status(out_dir: &Path) -> Result<()> {
    let publish_dir = out_dir.join(exclave_bundle::PUBLISH_DIR);
    match Manifest::load(&publish_dir)? {
        Some(manifest) => {
            println!("bundle:    {}", manifest.bundle_file);
            println!("hash:      {}", manifest.hash);
            println!("generated: {}", manifest.generated_at);
            println!("modules:   {}", manifest.sandbox_files.join(", "));
        }
        None => println!("no bundle published under {}", publish_dir.display()),
    }

    let state_dir = out_dir.join(exclave_runtime::STATE_DIR);
    if state_dir.exists() {
        println!("sessions:");
        for entry in std::fs::read_dir(&state_dir)? {
            let entry = entry?;
            let content = std::fs::read_to_string(entry.path())?;
            let state: serde_json::Value = serde_json::from_str(&content)?;
            let hash = state
                .get("bundleHash")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("?");
            let path = entry.path();
            let session = path
                .file_stem()
                .map_or_else(|| "?".to_owned(), |s| s.to_string_lossy().into_owned());
            println!("  {session} -> {hash}");
        }
    }
    Ok(())
}
