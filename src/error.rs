use thiserror::Error;

/// Typed failure modes surfaced at the CLI boundary (spec section 7).
///
/// Most internal code propagates `anyhow::Error` with context; these
/// variants exist so the CLI and agent can match on *kind* (e.g. to print
/// "not running" instead of a generic error) without string-matching
/// messages.
#[derive(Debug, Error)]
pub enum FractylError {
    #[error("not a fractyl repository (or any parent up to /)")]
    NotARepo,

    #[error("repository is locked by running process {0}")]
    Busy(i32),

    #[error("corrupt: {0}")]
    Corrupt(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("ambiguous snapshot id prefix '{0}'")]
    Ambiguous(String),

    #[error("invalid argument: {0}")]
    BadArgument(String),
}
