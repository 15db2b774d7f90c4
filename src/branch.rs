//! Branch-scoped snapshot namespace (component C8): maps a branch name to
//! its snapshot directory.

use anyhow::{bail, Result};

use crate::error::FractylError;

/// Used when there is no source-control integration (spec section 4.8).
pub const DEFAULT_BRANCH: &str = "default";

/// Replace path separators with `_`; reject empty names or `.`/`..`.
pub fn sanitize_branch(name: &str) -> Result<String> {
    if name.is_empty() {
        bail!(FractylError::BadArgument("branch name must not be empty".into()));
    }
    if name == "." || name == ".." {
        bail!(FractylError::BadArgument(format!("invalid branch name '{}'", name)));
    }
    let sanitized: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_separators() {
        assert_eq!(sanitize_branch("feature/foo").unwrap(), "feature_foo");
    }

    #[test]
    fn rejects_empty_and_dots() {
        assert!(sanitize_branch("").is_err());
        assert!(sanitize_branch(".").is_err());
        assert!(sanitize_branch("..").is_err());
    }

    #[test]
    fn passes_through_plain_names() {
        assert_eq!(sanitize_branch("main").unwrap(), "main");
        assert_eq!(sanitize_branch(DEFAULT_BRANCH).unwrap(), DEFAULT_BRANCH);
    }
}
