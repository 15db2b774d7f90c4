//! Literal and glob-based path filter for the tree walker (component C10).
//!
//! Built on the `ignore` crate's gitignore-style matcher: literal path
//! prefixes and `*`/`?`/`**` globs, case-sensitive, with a match at any
//! ancestor pruning the whole subtree -- exactly spec section 4.10's rules.
//! The teacher's analogous filtering lives in its `pxar` archiver
//! (src/pxar/encoder.rs), which excludes paths while streaming an archive;
//! here the same philosophy governs which working-tree files ever reach the
//! indexer.

use std::path::Path;

use anyhow::{Context, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};

const DEFAULT_RULES: &[&str] = &[".fractyl/", ".git/"];
const IGNORE_FILE_NAME: &str = ".fractylignore";

pub struct IgnoreMatcher {
    inner: Gitignore,
}

impl IgnoreMatcher {
    /// Loads the default rules plus an optional `.fractylignore` file at the
    /// tree root. Pure and deterministic once built: no further I/O happens
    /// per match.
    pub fn load(root: &Path) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(root);
        for rule in DEFAULT_RULES {
            builder
                .add_line(None, rule)
                .context("invalid built-in ignore rule")?;
        }

        let ignore_file = root.join(IGNORE_FILE_NAME);
        if ignore_file.is_file() {
            if let Some(err) = builder.add(&ignore_file) {
                return Err(err).context("reading .fractylignore");
            }
        }

        let inner = builder.build().context("compiling ignore rules")?;
        Ok(IgnoreMatcher { inner })
    }

    /// `rel_path` is the forward-slash-normalized path relative to the tree
    /// root. A match at this path or any ancestor prunes it.
    pub fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
        if rel_path.is_empty() {
            return false;
        }
        self.inner.matched(rel_path, is_dir).is_ignore()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn default_rules_prune_dot_fractyl() {
        let dir = tempdir().unwrap();
        let matcher = IgnoreMatcher::load(dir.path()).unwrap();
        assert!(matcher.is_ignored(".fractyl", true));
        assert!(matcher.is_ignored(".git", true));
        assert!(!matcher.is_ignored("src/main.rs", false));
    }

    #[test]
    fn custom_ignore_file_globs() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".fractylignore"), "*.log\nbuild/\n").unwrap();

        let matcher = IgnoreMatcher::load(dir.path()).unwrap();
        assert!(matcher.is_ignored("debug.log", false));
        assert!(matcher.is_ignored("build", true));
        assert!(!matcher.is_ignored("src/lib.rs", false));
    }
}
