//! The fixed runner installed into every VM.
//!
//! The runner is invariant across builds — only the bundle beside it
//! changes — so it is installed once per VM and relied on thereafter.

/// Runner script source, embedded at compile time.
pub const RUNNER_SOURCE: &str = include_str!("../assets/runner.mjs");

/// Guest path of the runner script.
pub const RUNNER_PATH: &str = "/opt/exclave/runner.mjs";

/// Guest path the runner imports the bundle from.
pub const BUNDLE_PATH: &str = "/opt/exclave/bundle.mjs";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_imports_the_fixed_bundle_path() {
        assert!(RUNNER_SOURCE.contains(BUNDLE_PATH));
    }

    #[test]
    fn runner_speaks_the_reply_protocol() {
        assert!(RUNNER_SOURCE.contains("__result"));
        assert!(RUNNER_SOURCE.contains("__error"));
        assert!(RUNNER_SOURCE.contains("__stack"));
        assert!(RUNNER_SOURCE.contains("closureVars"));
    }
}
