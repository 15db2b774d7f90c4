//! Human-readable output formatting (out of scope per spec section 1):
//! translates engine results into the one-line-per-item reports the CLI
//! table in spec section 6 describes.

use similar::{ChangeTag, TextDiff};

use crate::engine::{DeleteStats, RestoreStats};
use crate::index::IndexDiff;
use crate::snapshot::SnapshotRecord;

pub fn print_snapshot_created(id: &str, diff: &IndexDiff) {
    println!("Created snapshot {}", &id[..8.min(id.len())]);
    print_change_lines(diff);
}

pub fn print_no_changes() {
    println!("No changes detected");
}

pub fn print_change_lines(diff: &IndexDiff) {
    for path in &diff.added {
        println!("A {}", path);
    }
    for path in &diff.modified {
        println!("M {}", path);
    }
    for path in &diff.removed {
        println!("D {}", path);
    }
}

pub fn print_snapshot_list(records: &[SnapshotRecord]) {
    for record in records {
        println!(
            "{}  {}  {}",
            record.short_id(),
            record.created_at.to_rfc3339(),
            record.description
        );
    }
}

pub fn print_restore_stats(stats: &RestoreStats) {
    println!("restored {} files, removed {} files", stats.restored, stats.removed);
    for (path, err) in &stats.failed {
        eprintln!("failed: {}: {}", path, err);
    }
}

pub fn print_delete_stats(stats: &DeleteStats) {
    println!("removed {} unreachable objects", stats.objects_removed);
}

/// Renders a unified text diff between two versions of a file's content,
/// skipped silently for binary content (a lossy UTF-8 conversion would
/// otherwise corrupt the rendering).
pub fn print_text_diff(path: &str, before: &[u8], after: &[u8]) {
    let (before_str, after_str) = match (std::str::from_utf8(before), std::str::from_utf8(after)) {
        (Ok(b), Ok(a)) => (b, a),
        _ => {
            println!("M {} (binary content differs)", path);
            return;
        }
    };

    println!("--- a/{}", path);
    println!("+++ b/{}", path);
    let text_diff = TextDiff::from_lines(before_str, after_str);
    for change in text_diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => " ",
        };
        print!("{}{}", sign, change);
    }
}
