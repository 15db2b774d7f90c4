//! Content-addressed object store (component C4).
//!
//! Objects are raw bytes keyed by their digest, fanned out two levels deep
//! (`objects/<aa>/<rest>`) exactly as the teacher's datastore lays out
//! chunks. Unlike the teacher's `DataBlob` (src/backup/data_blob.rs), which
//! wraps content in a magic/CRC header, spec section 3 defines objects as
//! unframed raw bytes -- the content digest is itself the integrity check.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::os::unix::io::FromRawFd;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::sys::stat;
use nix::unistd;

use crate::atomic::write_atomic;
use crate::digest::{Digest, Hasher};
use crate::error::FractylError;

/// Files at or above this size must stream through the hasher rather than
/// be buffered fully in memory (spec section 4.4 / 9).
pub const STREAM_THRESHOLD: u64 = 1024 * 1024;

const OBJECT_MODE: u32 = 0o444;

pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: PathBuf) -> Self {
        ObjectStore { root }
    }

    fn path_for(&self, digest: &Digest) -> PathBuf {
        let hex = digest.to_hex();
        self.root.join(&hex[0..2]).join(&hex[2..])
    }

    pub fn exists(&self, digest: &Digest) -> bool {
        self.path_for(digest).is_file()
    }

    /// Buffer `data` fully in memory, compute its digest, and write it if
    /// not already present.
    pub fn put(&self, data: &[u8]) -> Result<Digest> {
        let digest = Digest::hash(data);
        let path = self.path_for(&digest);
        if path.is_file() {
            return Ok(digest);
        }
        write_atomic(&path, data, OBJECT_MODE)?;
        Ok(digest)
    }

    /// Stream `reader` through the hasher into a uniquely-named staging
    /// file, then rename it to its digest path once the digest is known.
    /// Required for content at or above [`STREAM_THRESHOLD`].
    pub fn put_stream<R: Read>(&self, mut reader: R) -> Result<Digest> {
        fs::create_dir_all(&self.root)?;
        let template = self.root.join(".put_XXXXXX");
        let (fd, tmp_path) = unistd::mkstemp(&template).context("mkstemp for streamed object failed")?;

        let mut file = unsafe { File::from_raw_fd(fd) };
        let mut hasher = Hasher::new();
        let mut buf = [0u8; 64 * 1024];

        let result = (|| -> Result<Digest> {
            loop {
                let n = file_read(&mut reader, &mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                file.write_all(&buf[..n])?;
            }
            file.sync_all().ok();
            Ok(hasher.finish())
        })();

        let digest = match result {
            Ok(d) => d,
            Err(e) => {
                drop(file);
                let _ = unistd::unlink(tmp_path.as_path());
                return Err(e);
            }
        };

        let final_path = self.path_for(&digest);
        if final_path.is_file() {
            drop(file);
            let _ = fs::remove_file(&tmp_path);
            return Ok(digest);
        }

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        stat::fchmod(file.as_raw_fd_compat(), stat::Mode::from_bits_truncate(OBJECT_MODE))
            .context("fchmod on streamed object failed")?;
        drop(file);
        fs::rename(&tmp_path, &final_path)
            .with_context(|| format!("renaming staged object to {:?}", final_path))?;
        Ok(digest)
    }

    /// Choose the buffered or streaming strategy based on `size`, per spec
    /// section 9.
    pub fn put_path(&self, path: &Path, size: u64) -> Result<Digest> {
        if size < STREAM_THRESHOLD {
            let data = fs::read(path).with_context(|| format!("reading {:?}", path))?;
            self.put(&data)
        } else {
            let f = File::open(path).with_context(|| format!("opening {:?}", path))?;
            self.put_stream(f)
        }
    }

    pub fn get(&self, digest: &Digest) -> Result<Vec<u8>> {
        let path = self.path_for(digest);
        fs::read(&path).map_err(|e| map_not_found(e, digest))
    }

    pub fn open(&self, digest: &Digest) -> Result<BufReader<File>> {
        let path = self.path_for(digest);
        let f = File::open(&path).map_err(|e| map_not_found(e, digest))?;
        Ok(BufReader::new(f))
    }

    /// Unlink an object. The caller must have already proved it is
    /// unreachable from every surviving snapshot.
    pub fn delete(&self, digest: &Digest) -> Result<()> {
        let path = self.path_for(digest);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn file_read<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    Ok(reader.read(buf)?)
}

fn map_not_found(e: io::Error, digest: &Digest) -> anyhow::Error {
    if e.kind() == io::ErrorKind::NotFound {
        FractylError::NotFound(format!("object {}", digest)).into()
    } else {
        e.into()
    }
}

/// Small shim so `fchmod` (which wants a raw fd) can be called right before
/// we drop the `File` that owns it.
trait AsRawFdCompat {
    fn as_raw_fd_compat(&self) -> std::os::unix::io::RawFd;
}

impl AsRawFdCompat for File {
    fn as_raw_fd_compat(&self) -> std::os::unix::io::RawFd {
        use std::os::unix::io::AsRawFd;
        self.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_get_roundtrip() {
        let dir = tempdir().unwrap();
        let store = ObjectStore::new(dir.path().to_path_buf());

        let digest = store.put(b"hello").unwrap();
        assert!(store.exists(&digest));
        assert_eq!(store.get(&digest).unwrap(), b"hello");
    }

    #[test]
    fn put_is_idempotent_for_same_content() {
        let dir = tempdir().unwrap();
        let store = ObjectStore::new(dir.path().to_path_buf());

        let a = store.put(b"same").unwrap();
        let b = store.put(b"same").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn put_stream_matches_put() {
        let dir = tempdir().unwrap();
        let store = ObjectStore::new(dir.path().to_path_buf());

        let data = vec![7u8; 3 * 1024 * 1024];
        let streamed = store.put_stream(&data[..]).unwrap();
        let buffered = Digest::hash(&data);
        assert_eq!(streamed, buffered);
        assert_eq!(store.get(&streamed).unwrap(), data);
    }

    #[test]
    fn get_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = ObjectStore::new(dir.path().to_path_buf());
        let digest = Digest::hash(b"never written");
        let err = store.get(&digest).unwrap_err();
        assert!(err.downcast_ref::<FractylError>().is_some());
    }

    #[test]
    fn delete_is_tolerant_of_missing() {
        let dir = tempdir().unwrap();
        let store = ObjectStore::new(dir.path().to_path_buf());
        let digest = Digest::hash(b"nothing");
        store.delete(&digest).unwrap();
    }
}
