//! Snapshot engine (component C7): composes the object store, index, tree
//! walker and branch namespace into `snapshot`, `list`, `restore`, `delete`
//! and `diff`. Grounded in the teacher's orchestration style in
//! `src/backup/prune.rs` (sweeping a list of backups against a retention
//! policy) and the `ReadChunk` trait in `src/backup/read_chunk.rs`.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::{info, warn};

use crate::atomic::write_atomic;
use crate::branch::{self, DEFAULT_BRANCH};
use crate::digest::Digest;
use crate::error::FractylError;
use crate::ignore::IgnoreMatcher;
use crate::index::{Entry, Index, IndexDiff};
use crate::repo::Repo;
use crate::snapshot::SnapshotRecord;
use crate::store::ObjectStore;
use crate::vcs;
use crate::walk;

#[derive(Debug)]
pub enum SnapshotOutcome {
    Created { id: String, diff: IndexDiff },
    NoChanges,
}

#[derive(Debug, Default)]
pub struct RestoreStats {
    pub restored: usize,
    pub removed: usize,
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct DeleteStats {
    pub objects_removed: usize,
}

pub struct Engine {
    repo: Repo,
    store: ObjectStore,
}

impl Engine {
    pub fn open(repo: Repo) -> Self {
        let store = ObjectStore::new(repo.objects_dir());
        Engine { repo, store }
    }

    pub fn repo(&self) -> &Repo {
        &self.repo
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    fn resolved_branch(&self) -> Result<String> {
        let name = vcs::current_branch(self.repo.root()).unwrap_or_else(|| DEFAULT_BRANCH.to_string());
        branch::sanitize_branch(&name)
    }

    fn head_path(&self, branch: &str) -> PathBuf {
        self.repo.branch_dir(branch).join("HEAD")
    }

    fn read_head(&self, branch: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.head_path(branch)) {
            Ok(s) => Ok(Some(s.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_head(&self, branch: &str, id: &str) -> Result<()> {
        write_atomic(&self.head_path(branch), format!("{}\n", id).as_bytes(), 0o644)
    }

    fn load_current_index(&self) -> Result<Index> {
        match fs::File::open(self.repo.index_path()) {
            Ok(f) => Index::load(io::BufReader::new(f)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Index::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn load_index(&self, digest: &Digest) -> Result<Index> {
        let bytes = self.store.get(digest)?;
        Index::load(&bytes[..])
    }

    /// `snapshot(description) -> SnapshotId` (spec section 4.7 steps 1-10).
    pub fn snapshot(&self, description: &str) -> Result<SnapshotOutcome> {
        let branch = self.resolved_branch()?;
        fs::create_dir_all(self.repo.branch_dir(&branch))?;

        let parent_id = self.read_head(&branch)?;
        let parent_index = self.load_current_index()?;

        let ignore = IgnoreMatcher::load(self.repo.root())?;
        let walked = walk::walk(self.repo.root(), &ignore)?;

        let mut new_index = Index::new();
        for entry in &walked {
            let idx_entry = Index::stat_entry(
                &parent_index,
                &entry.rel_path,
                &entry.abs_path,
                &entry.metadata,
                &self.store,
            )
            .with_context(|| format!("hashing {}", entry.rel_path))?;
            new_index.upsert(idx_entry);
        }

        let diff = new_index.diff(&parent_index);
        if diff.is_empty() {
            return Ok(SnapshotOutcome::NoChanges);
        }

        let index_bytes = new_index.to_bytes()?;
        let index_digest = self.store.put(&index_bytes)?;

        let record = SnapshotRecord::new(
            parent_id,
            Some(branch.clone()),
            Utc::now(),
            description.to_string(),
            index_digest,
            None,
        )?;

        let record_path = self.repo.branch_dir(&branch).join(format!("{}.json", record.id));
        write_atomic(&record_path, record.to_json()?.as_bytes(), 0o644)
            .context("writing snapshot record")?;

        // The record is durable before HEAD advances; HEAD advances before
        // the mutable index mirror is overwritten (spec section 5).
        self.write_head(&branch, &record.id)?;
        write_atomic(&self.repo.index_path(), &index_bytes, 0o644)
            .context("updating mutable index")?;

        info!(
            "created snapshot {} on branch {} ({} added, {} modified, {} removed)",
            record.short_id(),
            branch,
            diff.added.len(),
            diff.modified.len(),
            diff.removed.len()
        );

        Ok(SnapshotOutcome::Created { id: record.id, diff })
    }

    /// `list() -> sequence<SnapshotRecord>`, sorted by `created_at`
    /// ascending. A missing or corrupt record mid-scan is elided, not
    /// reported (spec section 5).
    pub fn list(&self, branch: Option<&str>) -> Result<Vec<SnapshotRecord>> {
        let branch = match branch {
            Some(b) => branch::sanitize_branch(b)?,
            None => self.resolved_branch()?,
        };
        let dir = self.repo.branch_dir(&branch);

        let read_dir = match fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(data) => match SnapshotRecord::from_json(&data) {
                    Ok(record) => records.push(record),
                    Err(err) => warn!("skipping corrupt snapshot record {:?}: {}", path, err),
                },
                Err(err) => warn!("skipping unreadable snapshot record {:?}: {}", path, err),
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    fn resolve_id(&self, branch: &str, prefix: &str) -> Result<SnapshotRecord> {
        let records = self.list(Some(branch))?;
        let matches: Vec<&SnapshotRecord> = records.iter().filter(|r| r.id.starts_with(prefix)).collect();
        match matches.len() {
            0 => bail!(FractylError::NotFound(format!("no snapshot matches '{}'", prefix))),
            1 => Ok(matches[0].clone()),
            _ => bail!(FractylError::Ambiguous(prefix.to_string())),
        }
    }

    /// Load `(record, index)` for a snapshot on the current branch by id
    /// prefix. Used by `restore`, `delete`, `diff`, and by CLI reporting.
    pub fn index_for(&self, id_prefix: &str) -> Result<(SnapshotRecord, Index)> {
        let branch = self.resolved_branch()?;
        let record = self.resolve_id(&branch, id_prefix)?;
        let index = self.load_index(&record.index_digest()?)?;
        Ok((record, index))
    }

    pub fn blob_for(&self, index: &Index, path: &str) -> Result<Option<Vec<u8>>> {
        match index.lookup(path) {
            Some(entry) => Ok(Some(self.store.get(&entry.digest)?)),
            None => Ok(None),
        }
    }

    /// `restore(id_prefix)` (spec section 4.7). Attempts every file even
    /// after a failure; the caller inspects `RestoreStats::failed`.
    pub fn restore(&self, id_prefix: &str, preserve_owner: bool) -> Result<RestoreStats> {
        let branch = self.resolved_branch()?;
        let target = self.resolve_id(&branch, id_prefix)?;
        let target_index = self.load_index(&target.index_digest()?)?;

        let ignore = IgnoreMatcher::load(self.repo.root())?;
        let current = walk::walk(self.repo.root(), &ignore)?;

        let mut stats = RestoreStats::default();

        for entry in &current {
            if target_index.lookup(&entry.rel_path).is_none() {
                match fs::remove_file(&entry.abs_path) {
                    Ok(()) => stats.removed += 1,
                    Err(err) => stats.failed.push((entry.rel_path.clone(), err.to_string())),
                }
            }
        }
        prune_empty_dirs(self.repo.root());

        for entry in target_index.iter() {
            let abs_path = self.repo.root().join(&entry.path);
            match self.restore_one(&abs_path, entry, preserve_owner) {
                Ok(()) => stats.restored += 1,
                Err(err) => stats.failed.push((entry.path.clone(), err.to_string())),
            }
        }

        if stats.failed.is_empty() {
            let mirror = target_index.to_bytes()?;
            write_atomic(&self.repo.index_path(), &mirror, 0o644)?;
            self.write_head(&branch, &target.id)?;
        }

        Ok(stats)
    }

    fn restore_one(&self, abs_path: &Path, entry: &Entry, preserve_owner: bool) -> Result<()> {
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = self
            .store
            .get(&entry.digest)
            .with_context(|| format!("loading object for {}", entry.path))?;
        write_atomic(abs_path, &data, entry.mode & 0o7777)?;

        if preserve_owner {
            let uid = nix::unistd::Uid::from_raw(entry.uid);
            let gid = nix::unistd::Gid::from_raw(entry.gid);
            nix::unistd::chown(abs_path, Some(uid), Some(gid))
                .with_context(|| format!("chown {:?}", abs_path))?;
        }
        Ok(())
    }

    /// `delete(id_prefix)` (spec section 4.7). Dangling parent pointers on
    /// surviving descendants are preserved rather than rewritten (spec
    /// section 9 Open Questions, resolved in DESIGN.md).
    pub fn delete(&self, id_prefix: &str) -> Result<DeleteStats> {
        let branch = self.resolved_branch()?;
        let target = self.resolve_id(&branch, id_prefix)?;

        let head = self.read_head(&branch)?;
        let record_path = self.repo.branch_dir(&branch).join(format!("{}.json", target.id));
        fs::remove_file(&record_path).context("removing snapshot record")?;

        if head.as_deref() == Some(target.id.as_str()) {
            match &target.parent {
                Some(parent_id) => {
                    self.write_head(&branch, parent_id)?;
                    // The mutable index mirrors HEAD's index (spec section
                    // 3); since HEAD just moved to the parent, the mirror
                    // must move with it or it would keep referencing the
                    // snapshot we just deleted (and objects the sweep below
                    // may collect).
                    let parent_record = self.resolve_id(&branch, parent_id)?;
                    let parent_index_bytes = self.store.get(&parent_record.index_digest()?)?;
                    write_atomic(&self.repo.index_path(), &parent_index_bytes, 0o644)
                        .context("updating mutable index to parent")?;
                }
                None => {
                    let _ = fs::remove_file(self.head_path(&branch));
                    let _ = fs::remove_file(self.repo.index_path());
                }
            }
        }

        let reachable = self.reachable_digests()?;
        let objects_removed = self.sweep_unreachable(&reachable)?;
        Ok(DeleteStats { objects_removed })
    }

    fn reachable_digests(&self) -> Result<HashSet<Digest>> {
        let mut set = HashSet::new();
        let snapshots_root = self.repo.snapshots_dir();
        if !snapshots_root.is_dir() {
            return Ok(set);
        }

        for branch_entry in fs::read_dir(&snapshots_root)? {
            let branch_dir = branch_entry?.path();
            if !branch_dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&branch_dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let data = match fs::read_to_string(&path) {
                    Ok(d) => d,
                    Err(_) => continue,
                };
                let record = match SnapshotRecord::from_json(&data) {
                    Ok(r) => r,
                    Err(_) => continue,
                };
                let index_digest = match record.index_digest() {
                    Ok(d) => d,
                    Err(_) => continue,
                };
                set.insert(index_digest);
                if let Ok(index) = self.load_index(&index_digest) {
                    for entry in index.iter() {
                        set.insert(entry.digest);
                    }
                }
            }
        }
        Ok(set)
    }

    fn sweep_unreachable(&self, reachable: &HashSet<Digest>) -> Result<usize> {
        let mut removed = 0usize;
        let objects_root = self.repo.objects_dir();
        if !objects_root.is_dir() {
            return Ok(removed);
        }
        for fanout in fs::read_dir(&objects_root)? {
            let fanout_dir = fanout?.path();
            if !fanout_dir.is_dir() {
                continue;
            }
            let prefix = match fanout_dir.file_name().and_then(|n| n.to_str()) {
                Some(p) => p.to_string(),
                None => continue,
            };
            for obj in fs::read_dir(&fanout_dir)? {
                let obj = obj?;
                let path = obj.path();
                let suffix = match path.file_name().and_then(|n| n.to_str()) {
                    Some(s) => s,
                    None => continue,
                };
                // ignore staging temp files from in-flight put_stream writers
                if suffix.starts_with('.') {
                    continue;
                }
                let hex = format!("{}{}", prefix, suffix);
                let digest = match Digest::from_hex(&hex) {
                    Ok(d) => d,
                    Err(_) => continue,
                };
                if !reachable.contains(&digest) && fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// `diff(a_prefix, b_prefix)`: `a` is treated as "before", `b` as
    /// "after".
    pub fn diff(&self, a_prefix: &str, b_prefix: &str) -> Result<IndexDiff> {
        let (_, a_index) = self.index_for(a_prefix)?;
        let (_, b_index) = self.index_for(b_prefix)?;
        Ok(b_index.diff(&a_index))
    }
}

fn prune_empty_dirs(root: &Path) {
    let _ = visit(root, root);

    fn visit(dir: &Path, root: &Path) -> io::Result<bool> {
        let mut empty = true;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if dir == root {
                    let name = entry.file_name();
                    if name == crate::repo::DOT_DIR || name == ".git" {
                        empty = false;
                        continue;
                    }
                }
                if visit(&path, root)? {
                    fs::remove_dir(&path)?;
                } else {
                    empty = false;
                }
            } else {
                empty = false;
            }
        }
        Ok(empty)
    }
}
