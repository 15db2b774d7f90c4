//! Snapshot record: the immutable document naming an index and a parent,
//! identified by the digest of its own canonicalized content (spec section
//! 3 / 6).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::Digest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: String,
    pub parent: Option<String>,
    pub branch: Option<String>,
    pub created_at: DateTime<Utc>,
    pub description: String,
    pub index_digest: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_vcs_commit: Option<String>,
}

/// The fields that feed the id computation, deliberately excluding `id`
/// itself.
#[derive(Serialize)]
struct SnapshotRecordDraft<'a> {
    parent: &'a Option<String>,
    branch: &'a Option<String>,
    created_at: DateTime<Utc>,
    description: &'a str,
    index_digest: &'a str,
    source_vcs_commit: &'a Option<String>,
}

impl SnapshotRecord {
    pub fn new(
        parent: Option<String>,
        branch: Option<String>,
        created_at: DateTime<Utc>,
        description: String,
        index_digest: Digest,
        source_vcs_commit: Option<String>,
    ) -> Result<Self> {
        let index_digest_hex = index_digest.to_hex();
        let draft = SnapshotRecordDraft {
            parent: &parent,
            branch: &branch,
            created_at,
            description: &description,
            index_digest: &index_digest_hex,
            source_vcs_commit: &source_vcs_commit,
        };
        let canonical = canonical_json(&draft)?;
        let id = Digest::hash(canonical.as_bytes()).to_hex();

        Ok(SnapshotRecord {
            id,
            parent,
            branch,
            created_at,
            description,
            index_digest: index_digest_hex,
            source_vcs_commit,
        })
    }

    pub fn short_id(&self) -> &str {
        &self.id[..8.min(self.id.len())]
    }

    pub fn index_digest(&self) -> Result<Digest> {
        Digest::from_hex(&self.index_digest)
    }

    pub fn to_json(&self) -> Result<String> {
        canonical_json(self)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data).context("parsing snapshot record")
    }
}

/// Routes through `serde_json::Value` rather than serializing `value`
/// directly: a `#[derive(Serialize)]` struct serializes fields in their
/// declared order, not sorted order. `Value::Object` is backed by a
/// `BTreeMap` (no `preserve_order` feature on `serde_json` here), so once
/// converted its keys serialize lexicographically, satisfying spec section
/// 6's canonicalization requirement for id computation.
fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value).context("canonicalizing json")?;
    serde_json::to_string(&value).context("serializing canonical json")
}
