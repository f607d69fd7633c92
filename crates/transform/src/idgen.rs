//! Stable function identifiers.
//!
//! Ids are a pure function of the project-relative source path and the scope
//! path, never of the body: editing a function must not churn its id, or
//! hot-reload would invalidate every downstream manifest. Two builds of the
//! same tree therefore always agree on ids.

use sha2::{Digest, Sha256};

const ID_DIGEST_LEN: usize = 8;

/// `scopePath.join("$") + "_" + hex8(sha256(relPath + ":" + scopePath))`.
#[must_use]
pub fn fn_id(rel_path: &str, scope_path: &[String]) -> String {
    let joined = scope_path.join("$");
    let mut hasher = Sha256::new();
    hasher.update(rel_path.as_bytes());
    hasher.update(b":");
    hasher.update(joined.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{joined}_{}", &digest[..ID_DIGEST_LEN])
}
