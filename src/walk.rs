//! Tree walker (component C6): enumerate working-tree files, skipping
//! ignored paths. Symbolic links are not followed; unreadable entries are
//! logged and skipped rather than aborting the walk.

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::warn;
use walkdir::WalkDir;

use crate::ignore::IgnoreMatcher;

pub struct WalkEntry {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub metadata: Metadata,
}

pub fn walk(root: &Path, ignore: &IgnoreMatcher) -> Result<Vec<WalkEntry>> {
    let mut out = Vec::new();

    let walker = WalkDir::new(root).follow_links(false).into_iter().filter_entry(|e| {
        if e.depth() == 0 {
            return true;
        }
        let rel = normalize(e.path().strip_prefix(root).unwrap_or(e.path()));
        !ignore.is_ignored(&rel, e.file_type().is_dir())
    });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                warn!("skipping unreadable entry: {}", err);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let abs_path = entry.path().to_path_buf();
        let rel_path = normalize(abs_path.strip_prefix(root).unwrap_or(&abs_path));

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                warn!("skipping {:?}: {}", abs_path, err);
                continue;
            }
        };

        out.push(WalkEntry { rel_path, abs_path, metadata });
    }

    Ok(out)
}

fn normalize(p: &Path) -> String {
    p.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn walks_files_skipping_dot_fractyl() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join(".fractyl").join("objects")).unwrap();
        fs::write(root.join(".fractyl").join("index"), b"x").unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src").join("main.rs"), b"fn main() {}").unwrap();
        fs::write(root.join("a.txt"), b"hi").unwrap();

        let ignore = IgnoreMatcher::load(root).unwrap();
        let mut entries = walk(root, &ignore).unwrap();
        entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

        let rel_paths: Vec<&str> = entries.iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(rel_paths, vec!["a.txt", "src/main.rs"]);
    }

    #[test]
    fn respects_fractylignore() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join(".fractylignore"), "*.log\n").unwrap();
        fs::write(root.join("keep.txt"), b"keep").unwrap();
        fs::write(root.join("debug.log"), b"noise").unwrap();

        let ignore = IgnoreMatcher::load(root).unwrap();
        let entries = walk(root, &ignore).unwrap();
        let rel_paths: Vec<&str> = entries.iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(rel_paths, vec!["keep.txt"]);
    }
}
