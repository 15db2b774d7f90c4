//! Atomic file writes: stage in a sibling temp file, then rename into place.
//!
//! Generalizes the teacher's `file_set_contents` (src/tools.rs): mkstemp a
//! sibling of the target, fchmod it, write, fsync, rename. The temp file is
//! unlinked on any failure path so a crash mid-write never leaves a partial
//! file at the final path.

use std::fs::{self, File};
use std::io::Write;
use std::os::unix::io::FromRawFd;
use std::path::Path;

use anyhow::{Context, Result};
use nix::sys::stat;
use nix::unistd;

pub fn write_atomic(path: &Path, data: &[u8], mode: u32) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("creating directory {:?}", parent))?;

    let file_stem = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("fractyl");
    let template = parent.join(format!(".{}.tmp_XXXXXX", file_stem));

    let (fd, tmp_path) = unistd::mkstemp(&template)
        .with_context(|| format!("mkstemp for {:?} failed", path))?;

    let result = (|| -> Result<()> {
        stat::fchmod(fd, stat::Mode::from_bits_truncate(mode)).context("fchmod failed")?;
        // File takes ownership of the fd from here on.
        let mut file = unsafe { File::from_raw_fd(fd) };
        file.write_all(data).context("write failed")?;
        file.sync_all().ok();
        fs::rename(&tmp_path, path)
            .with_context(|| format!("atomic rename to {:?} failed", path))?;
        Ok(())
    })();

    if result.is_err() {
        let _ = unistd::unlink(tmp_path.as_path());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_and_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("file.txt");

        write_atomic(&path, b"first", 0o644).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"first");

        write_atomic(&path, b"second", 0o644).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");

        // no leftover temp files in the directory
        let remaining: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(remaining, vec![path.file_name().unwrap().to_owned()]);
    }
}
