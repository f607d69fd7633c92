use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// Source failed to parse; the caller falls back to the original text.
    #[error("parse error in {path}: {message}")]
    Parse { path: String, message: String },

    /// A default-exported sandbox function without a name. Ids are derived
    /// from names, so this is refused rather than guessed at.
    #[error("anonymous default-exported sandbox function in {path}; give it a name")]
    AnonymousDefaultExport { path: String },

    /// A destructured parameter of a sandbox function uses a computed key;
    /// no argument-forwarding expression can be synthesised for it.
    #[error("unsupported parameter pattern for sandbox function `{name}`: {reason}")]
    UnsupportedPattern { name: String, reason: String },

    /// Internal invariant failure while splicing replacements.
    #[error("conflicting source edits at byte {offset}")]
    OverlappingEdits { offset: u32 },
}
