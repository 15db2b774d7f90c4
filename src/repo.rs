//! Path resolver (component C2): locates the repository root and derives
//! canonical sub-paths. None of these accessors perform I/O beyond
//! `find`/`init` themselves.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::error::FractylError;

pub const DOT_DIR: &str = ".fractyl";

#[derive(Debug, Clone)]
pub struct Repo {
    root: PathBuf,
}

impl Repo {
    /// Walk upward from `start` until a directory containing `.fractyl/` is
    /// found.
    pub fn find(start: &Path) -> Result<Repo> {
        let mut cur = start
            .canonicalize()
            .unwrap_or_else(|_| start.to_path_buf());
        loop {
            if cur.join(DOT_DIR).is_dir() {
                return Ok(Repo { root: cur });
            }
            if !cur.pop() {
                return Err(FractylError::NotARepo.into());
            }
        }
    }

    /// Create `.fractyl/` with empty subdirectories under `start`. Idempotent.
    pub fn init(start: &Path) -> Result<Repo> {
        let root = start
            .canonicalize()
            .unwrap_or_else(|_| start.to_path_buf());
        let repo = Repo { root };
        std::fs::create_dir_all(repo.objects_dir())?;
        std::fs::create_dir_all(repo.snapshots_dir())?;
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dot_dir(&self) -> PathBuf {
        self.root.join(DOT_DIR)
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.dot_dir().join("objects")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.dot_dir().join("snapshots")
    }

    pub fn branch_dir(&self, branch: &str) -> PathBuf {
        self.snapshots_dir().join(branch)
    }

    pub fn index_path(&self) -> PathBuf {
        self.dot_dir().join("index")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dot_dir().join("lock")
    }

    pub fn agent_pid_path(&self) -> PathBuf {
        self.dot_dir().join("agent.pid")
    }

    pub fn agent_log_path(&self) -> PathBuf {
        self.dot_dir().join("agent.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_then_find_from_subdir() {
        let dir = tempdir().unwrap();
        Repo::init(dir.path()).unwrap();

        let sub = dir.path().join("a").join("b");
        std::fs::create_dir_all(&sub).unwrap();

        let found = Repo::find(&sub).unwrap();
        assert_eq!(found.root(), dir.path().canonicalize().unwrap());
    }

    #[test]
    fn find_outside_repo_fails() {
        let dir = tempdir().unwrap();
        let err = Repo::find(dir.path()).unwrap_err();
        assert!(err.downcast_ref::<FractylError>().is_some());
    }

    #[test]
    fn init_is_idempotent() {
        let dir = tempdir().unwrap();
        Repo::init(dir.path()).unwrap();
        Repo::init(dir.path()).unwrap();
        assert!(dir.path().join(DOT_DIR).join("objects").is_dir());
    }
}
