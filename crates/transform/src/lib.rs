//! Directive-aware source transformer.
//!
//! Rewrites JavaScript/TypeScript sources in which an async function opens
//! with the `"use sandbox"` directive: the function body is extracted into a
//! generated sandbox module (one per source file), and the original
//! declaration is replaced by a stub that forwards its arguments to the
//! runtime orchestrator under a stable function identifier.
//!
//! Typical flow:
//! 1. Build [`TransformOptions`] for the file being compiled.
//! 2. Call [`transform`] (or [`transform_or_original`] from a build loader,
//!    which never fails the build).
//! 3. Register the returned [`GeneratedModule`] with the project bundler.

mod collect;
mod emit;
mod error;
mod globals;
mod idgen;
mod imports;
mod parse;
mod scope;

use std::path::{Path, PathBuf};

pub use collect::SandboxFn;
pub use error::{Error, Result};
pub use idgen::fn_id;

/// Default name of the runtime package referenced by emitted stubs.
pub const DEFAULT_RUNTIME_PACKAGE: &str = "exclave";

/// The directive literal that marks an async function as sandboxed.
pub const DIRECTIVE: &str = "use sandbox";

/// Per-file transformation options.
#[derive(Clone, Debug)]
pub struct TransformOptions {
    pub(crate) source_path: PathBuf,
    pub(crate) project_root: PathBuf,
    pub(crate) runtime_package: String,
}

impl TransformOptions {
    pub fn new(source_path: impl Into<PathBuf>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            project_root: project_root.into(),
            runtime_package: DEFAULT_RUNTIME_PACKAGE.to_owned(),
        }
    }

    /// Override the runtime package name used in emitted imports.
    #[must_use]
    pub fn runtime_package(mut self, package: impl Into<String>) -> Self {
        self.runtime_package = package.into();
        self
    }

    /// Project-relative source path with forward-slash separators.
    ///
    /// This is the path that feeds the function-id digest, so it must be
    /// stable across machines and checkouts.
    #[must_use]
    pub fn relative_path(&self) -> String {
        let rel = self
            .source_path
            .strip_prefix(&self.project_root)
            .unwrap_or(&self.source_path);
        normalize_separators(rel)
    }
}

fn normalize_separators(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// One generated sandbox module, ready for bundler staging.
#[derive(Clone, Debug)]
pub struct GeneratedModule {
    /// Project-relative path of the source file that produced this module.
    pub source_path: String,
    /// Deterministic staging file name (separators flattened).
    pub file_name: String,
    /// Printable module source.
    pub content: String,
}

/// Result of transforming one source file.
#[derive(Clone, Debug)]
pub struct TransformOutput {
    /// The stubbed source, or the input verbatim when nothing applied.
    pub code: String,
    /// Generated sandbox module, present iff at least one function matched.
    pub module: Option<GeneratedModule>,
    /// The sandbox function records collected from this file.
    pub functions: Vec<SandboxFn>,
}

impl TransformOutput {
    fn passthrough(source: &str) -> Self {
        Self {
            code: source.to_owned(),
            module: None,
            functions: Vec::new(),
        }
    }
}

/// Transform a single source file.
///
/// Sources without the directive substring, and sources that already import
/// the orchestrator entry point, are returned byte-identical.
///
/// # Errors
/// Fails on parse errors and on constructs the generator refuses to guess
/// about (anonymous default-exported sandbox functions, computed keys in
/// destructured sandbox-function parameters).
pub fn transform(source: &str, options: &TransformOptions) -> Result<TransformOutput> {
    if !source.contains(DIRECTIVE) || already_transformed(source, &options.runtime_package) {
        return Ok(TransformOutput::passthrough(source));
    }

    let rel_path = options.relative_path();
    let allocator = oxc_allocator::Allocator::default();
    let program = parse::parse(&allocator, source, &options.source_path)?;
    let records = collect::collect(&program, source, &rel_path)?;
    if records.is_empty() {
        return Ok(TransformOutput::passthrough(source));
    }

    let code = emit::emit_stubbed_source(source, &records, &options.runtime_package)?;
    let import_lines = imports::sandbox_imports(&program, source, &options.runtime_package);
    let content = emit::emit_sandbox_module(source, &rel_path, &records, &import_lines)?;

    tracing::debug!(
        path = %rel_path,
        functions = records.len(),
        "extracted sandbox functions"
    );

    Ok(TransformOutput {
        code,
        module: Some(GeneratedModule {
            file_name: staging_file_name(&rel_path),
            source_path: rel_path,
            content,
        }),
        functions: records,
    })
}

/// Loader-facing wrapper: on any transform failure the original source is
/// returned unmodified and a diagnostic is logged. No partial transforms.
pub fn transform_or_original(source: &str, options: &TransformOptions) -> TransformOutput {
    match transform(source, options) {
        Ok(output) => output,
        Err(err) => {
            tracing::warn!(
                path = %options.relative_path(),
                error = %err,
                "sandbox transform skipped"
            );
            TransformOutput::passthrough(source)
        }
    }
}

/// Deterministic staging name for a generated module: the project-relative
/// source path with separators flattened to `_`.
#[must_use]
pub fn staging_file_name(rel_path: &str) -> String {
    rel_path.replace(['/', '\\'], "_")
}

fn already_transformed(source: &str, runtime_package: &str) -> bool {
    let double = format!("from \"{runtime_package}/internal\"");
    let single = format!("from '{runtime_package}/internal'");
    source.contains(&double) || source.contains(&single)
}
