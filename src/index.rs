//! In-memory working-tree manifest and its binary on-disk form
//! (component C5).

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::digest::{Digest, DIGEST_BYTES};
use crate::error::FractylError;
use crate::store::ObjectStore;

const MAGIC: &[u8; 4] = b"FIDX";
const VERSION: u32 = 1;
const MAX_PLAUSIBLE_PATH_LEN: u32 = 64 * 1024;

/// One record per working-tree file. Every field but `path` makes up the
/// stat fingerprint used for cheap change detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: String,
    pub digest: Digest,
    pub size: u64,
    pub mtime_sec: i64,
    pub mtime_nsec: u32,
    pub ctime_sec: i64,
    pub ctime_nsec: u32,
    pub inode: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl Entry {
    /// True if every stat-fingerprint field but `path` and `digest` matches.
    pub fn fingerprint_eq(&self, other: &Entry) -> bool {
        self.size == other.size
            && self.mtime_sec == other.mtime_sec
            && self.mtime_nsec == other.mtime_nsec
            && self.ctime_sec == other.ctime_sec
            && self.ctime_nsec == other.ctime_nsec
            && self.inode == other.inode
            && self.mode == other.mode
            && self.uid == other.uid
            && self.gid == other.gid
    }
}

#[derive(Debug, Default)]
pub struct IndexDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl IndexDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Ordered (by path) collection of entries. BTreeMap gives deterministic
/// lexicographic serialization order for free.
#[derive(Debug, Default, Clone)]
pub struct Index {
    entries: BTreeMap<String, Entry>,
}

impl Index {
    pub fn new() -> Self {
        Index { entries: BTreeMap::new() }
    }

    pub fn lookup(&self, path: &str) -> Option<&Entry> {
        self.entries.get(path)
    }

    pub fn upsert(&mut self, entry: Entry) {
        self.entries.insert(entry.path.clone(), entry);
    }

    pub fn remove(&mut self, path: &str) -> Option<Entry> {
        self.entries.remove(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `self` is "new", `other` is "old": added/removed/modified describe
    /// the transition from `other` to `self`.
    pub fn diff(&self, other: &Index) -> IndexDiff {
        let mut diff = IndexDiff::default();
        for (path, entry) in &self.entries {
            match other.entries.get(path) {
                None => diff.added.push(path.clone()),
                Some(old) if old.digest != entry.digest => diff.modified.push(path.clone()),
                Some(_) => {}
            }
        }
        for path in other.entries.keys() {
            if !self.entries.contains_key(path) {
                diff.removed.push(path.clone());
            }
        }
        diff.added.sort();
        diff.removed.sort();
        diff.modified.sort();
        diff
    }

    /// Produce the up-to-date entry for a walked file, reusing the parent
    /// snapshot's digest when the stat fingerprint is unchanged -- the only
    /// place file content is read during a clean snapshot (spec section
    /// 4.5).
    pub fn stat_entry(
        parent: &Index,
        rel_path: &str,
        abs_path: &Path,
        meta: &std::fs::Metadata,
        store: &ObjectStore,
    ) -> Result<Entry> {
        use std::os::unix::fs::MetadataExt;

        let mut candidate = Entry {
            path: rel_path.to_string(),
            digest: Digest::from_bytes([0u8; DIGEST_BYTES]),
            size: meta.size(),
            mtime_sec: meta.mtime(),
            mtime_nsec: meta.mtime_nsec() as u32,
            ctime_sec: meta.ctime(),
            ctime_nsec: meta.ctime_nsec() as u32,
            inode: meta.ino(),
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
        };

        if let Some(old) = parent.lookup(rel_path) {
            if old.fingerprint_eq(&candidate) {
                candidate.digest = old.digest;
                return Ok(candidate);
            }
        }

        candidate.digest = store.put_path(abs_path, meta.size())?;
        Ok(candidate)
    }

    pub fn save<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_all(MAGIC)?;
        w.write_all(&VERSION.to_le_bytes())?;
        w.write_all(&(self.entries.len() as u32).to_le_bytes())?;
        for entry in self.entries.values() {
            let path_bytes = entry.path.as_bytes();
            w.write_all(&(path_bytes.len() as u32).to_le_bytes())?;
            w.write_all(path_bytes)?;
            w.write_all(entry.digest.as_bytes())?;
            w.write_all(&entry.size.to_le_bytes())?;
            w.write_all(&entry.mtime_sec.to_le_bytes())?;
            w.write_all(&entry.mtime_nsec.to_le_bytes())?;
            w.write_all(&entry.ctime_sec.to_le_bytes())?;
            w.write_all(&entry.ctime_nsec.to_le_bytes())?;
            w.write_all(&entry.inode.to_le_bytes())?;
            w.write_all(&entry.mode.to_le_bytes())?;
            w.write_all(&entry.uid.to_le_bytes())?;
            w.write_all(&entry.gid.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.save(&mut buf)?;
        Ok(buf)
    }

    pub fn load<R: Read>(mut r: R) -> Result<Index> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)
            .context("truncated index: missing header")?;
        if &magic != MAGIC {
            bail!(FractylError::Corrupt("bad index magic".into()));
        }

        let version = read_u32(&mut r)?;
        if version != VERSION {
            bail!(FractylError::Corrupt(format!("unsupported index version {}", version)));
        }

        let count = read_u32(&mut r)?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let path_len = read_u32(&mut r)?;
            if path_len > MAX_PLAUSIBLE_PATH_LEN {
                bail!(FractylError::Corrupt(format!("implausible path length {}", path_len)));
            }
            let mut path_bytes = vec![0u8; path_len as usize];
            r.read_exact(&mut path_bytes)
                .context("truncated index: path runs past end of buffer")?;
            let path = String::from_utf8(path_bytes)
                .map_err(|_| FractylError::Corrupt("non-utf8 path in index".into()))?;

            let mut digest_bytes = [0u8; DIGEST_BYTES];
            r.read_exact(&mut digest_bytes)
                .context("truncated index: digest")?;

            let entry = Entry {
                path: path.clone(),
                digest: Digest::from_bytes(digest_bytes),
                size: read_u64(&mut r)?,
                mtime_sec: read_i64(&mut r)?,
                mtime_nsec: read_u32(&mut r)?,
                ctime_sec: read_i64(&mut r)?,
                ctime_nsec: read_u32(&mut r)?,
                inode: read_u64(&mut r)?,
                mode: read_u32(&mut r)?,
                uid: read_u32(&mut r)?,
                gid: read_u32(&mut r)?,
            };
            entries.insert(path, entry);
        }

        Ok(Index { entries })
    }
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).context("truncated index: u32 field")?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).context("truncated index: u64 field")?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i64<R: Read>(r: &mut R) -> Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).context("truncated index: i64 field")?;
    Ok(i64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(path: &str, digest_seed: &[u8]) -> Entry {
        Entry {
            path: path.to_string(),
            digest: Digest::hash(digest_seed),
            size: 10,
            mtime_sec: 1,
            mtime_nsec: 0,
            ctime_sec: 1,
            ctime_nsec: 0,
            inode: 42,
            mode: 0o100644,
            uid: 0,
            gid: 0,
        }
    }

    #[test]
    fn save_load_round_trip() {
        let mut index = Index::new();
        index.upsert(sample_entry("a.txt", b"a"));
        index.upsert(sample_entry("dir/b.txt", b"b"));

        let bytes = index.to_bytes().unwrap();
        let loaded = Index::load(&bytes[..]).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.lookup("a.txt").unwrap().digest, Digest::hash(b"a"));
    }

    #[test]
    fn rejects_bad_magic() {
        let err = Index::load(&b"NOPE"[..]).unwrap_err();
        assert!(err.downcast_ref::<FractylError>().is_some());
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&99u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        let err = Index::load(&bytes[..]).unwrap_err();
        assert!(err.downcast_ref::<FractylError>().is_some());
    }

    #[test]
    fn truncated_path_length_is_corrupt_not_panic() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        // a path length far larger than any remaining bytes
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        let err = Index::load(&bytes[..]);
        assert!(err.is_err());
    }

    #[test]
    fn diff_detects_added_removed_modified() {
        let mut old = Index::new();
        old.upsert(sample_entry("keep.txt", b"keep"));
        old.upsert(sample_entry("gone.txt", b"gone"));
        old.upsert(sample_entry("changed.txt", b"before"));

        let mut new = Index::new();
        new.upsert(sample_entry("keep.txt", b"keep"));
        new.upsert(sample_entry("changed.txt", b"after"));
        new.upsert(sample_entry("new.txt", b"new"));

        let diff = new.diff(&old);
        assert_eq!(diff.added, vec!["new.txt"]);
        assert_eq!(diff.removed, vec!["gone.txt"]);
        assert_eq!(diff.modified, vec!["changed.txt"]);
    }

    #[test]
    fn unchanged_tree_has_empty_diff() {
        let mut a = Index::new();
        a.upsert(sample_entry("x.txt", b"x"));
        let b = a.clone();
        assert!(a.diff(&b).is_empty());
    }
}
