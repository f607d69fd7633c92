//! Staging-directory choreography.

use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::{BundleConfig, ENTRY_FILE};

const DIGEST_LEN: usize = 16;

/// One generated module as found in staging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedModule {
    pub file_name: String,
    pub content: String,
}

/// Write one generated module into staging, immediately and durably, so
/// sibling worker processes observe it at bundle time.
pub fn register(config: &BundleConfig, file_name: &str, content: &str) -> Result<PathBuf> {
    let dir = config.staging_dir();
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(file_name);
    std::fs::write(&path, content)?;
    tracing::debug!(file = file_name, "staged sandbox module");
    Ok(path)
}

/// Re-read every staged module, sorted by file name for determinism.
pub fn scan(config: &BundleConfig) -> Result<Vec<StagedModule>> {
    let dir = config.staging_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut modules = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == ENTRY_FILE || !name.ends_with(".ts") {
            continue;
        }
        let content = std::fs::read_to_string(entry.path())?;
        modules.push(StagedModule {
            file_name: name,
            content,
        });
    }
    modules.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(modules)
}

/// Digest over the concatenated module contents in canonical order.
#[must_use]
pub(crate) fn content_digest(modules: &[StagedModule]) -> String {
    let mut hasher = Sha256::new();
    for module in modules {
        hasher.update(module.content.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    digest[..DIGEST_LEN].to_owned()
}

/// Write the entry module re-exporting every staged module.
pub(crate) fn write_entry(config: &BundleConfig, modules: &[StagedModule]) -> Result<PathBuf> {
    let mut content = String::new();
    for module in modules {
        content.push_str(&format!("export * from \"./{}\";\n", module.file_name));
    }
    let path = config.staging_dir().join(ENTRY_FILE);
    std::fs::write(&path, content)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> (tempfile::TempDir, BundleConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = BundleConfig::new(dir.path());
        (dir, config)
    }

    #[test]
    fn scan_returns_sorted_modules() {
        let (_dir, config) = config();
        register(&config, "b.ts", "export const b_1 = 1;\n").unwrap();
        register(&config, "a.ts", "export const a_1 = 1;\n").unwrap();

        let modules = scan(&config).unwrap();
        let names: Vec<_> = modules.iter().map(|m| m.file_name.as_str()).collect();
        assert_eq!(names, ["a.ts", "b.ts"]);
    }

    #[test]
    fn scan_skips_the_entry_module() {
        let (_dir, config) = config();
        register(&config, "a.ts", "export const a_1 = 1;\n").unwrap();
        write_entry(&config, &scan(&config).unwrap()).unwrap();

        let modules = scan(&config).unwrap();
        assert_eq!(modules.len(), 1);
    }

    #[test]
    fn digest_is_stable_and_content_sensitive() {
        let modules = vec![
            StagedModule {
                file_name: "a.ts".into(),
                content: "one".into(),
            },
            StagedModule {
                file_name: "b.ts".into(),
                content: "two".into(),
            },
        ];
        let first = content_digest(&modules);
        assert_eq!(first, content_digest(&modules));
        assert_eq!(first.len(), DIGEST_LEN);

        let mut edited = modules;
        edited[1].content = "three".into();
        assert_ne!(first, content_digest(&edited));
    }

    #[test]
    fn entry_reexports_every_module() {
        let (_dir, config) = config();
        register(&config, "x.ts", "export const x_1 = 1;\n").unwrap();
        register(&config, "y.ts", "export const y_1 = 1;\n").unwrap();

        let entry = write_entry(&config, &scan(&config).unwrap()).unwrap();
        let content = std::fs::read_to_string(entry).unwrap();
        assert_eq!(
            content,
            "export * from \"./x.ts\";\nexport * from \"./y.ts\";\n"
        );
    }

    #[test]
    fn register_overwrites_on_rebuild() {
        let (_dir, config) = config();
        register(&config, "a.ts", "old\n").unwrap();
        register(&config, "a.ts", "new\n").unwrap();
        assert_eq!(scan(&config).unwrap()[0].content, "new\n");
    }
}
