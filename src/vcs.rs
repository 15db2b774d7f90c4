//! The source-control branch detector. Spec section 1 lists this as an
//! external collaborator ("a function `current_branch() -> string`", out of
//! scope); we give it the minimal implementation that lets the rest of the
//! engine be exercised end-to-end: read `.git/HEAD` directly rather than
//! shelling out to `git`.

use std::path::Path;

/// Returns `None` when there is no `.git` directory, `HEAD` is detached, or
/// its contents are unparseable -- callers fall back to
/// [`crate::branch::DEFAULT_BRANCH`].
///
/// Keeps the full ref name under `refs/heads/` rather than just its last
/// path segment: `refs/heads/feature/foo` and `refs/heads/bar/foo` are
/// distinct branches and must map to distinct namespaces (spec invariant
/// 8); `branch::sanitize_branch` replaces the remaining `/` with `_`.
pub fn current_branch(repo_root: &Path) -> Option<String> {
    let head_path = repo_root.join(".git").join("HEAD");
    let contents = std::fs::read_to_string(head_path).ok()?;
    let line = contents.trim();
    line.strip_prefix("ref: refs/heads/").map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn reads_branch_from_head() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git").join("HEAD"), "ref: refs/heads/feature-x\n").unwrap();

        assert_eq!(current_branch(dir.path()), Some("feature-x".to_string()));
    }

    #[test]
    fn keeps_nested_ref_segments_distinct() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git").join("HEAD"), "ref: refs/heads/feature/foo\n").unwrap();

        assert_eq!(current_branch(dir.path()), Some("feature/foo".to_string()));
        assert_ne!(current_branch(dir.path()), Some("foo".to_string()));
    }

    #[test]
    fn none_without_git_dir() {
        let dir = tempdir().unwrap();
        assert_eq!(current_branch(dir.path()), None);
    }

    #[test]
    fn none_when_detached() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git").join("HEAD"), "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef\n").unwrap();

        assert_eq!(current_branch(dir.path()), None);
    }
}
