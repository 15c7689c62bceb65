//! File fingerprints and the change-detection diff.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::indexer::imports::ImportRef;
use crate::indexer::languages::Language;

/// What the index knows about one source file as of its last indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub filepath: String,
    pub content_hash: String,
    pub language: Language,
    pub chunk_ids: BTreeSet<String>,
    /// Raw imports, kept so edges can be re-resolved when other files
    /// appear or disappear.
    pub imports: Vec<ImportRef>,
    pub exports: Vec<String>,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    /// Walk the whole tree; fingerprinted files absent from it are deleted.
    #[default]
    Full,
    /// Only the given files; never deletes.
    Incremental,
}

impl fmt::Display for IndexMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        })
    }
}

impl FromStr for IndexMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            other => Err(format!("unknown index mode: {other} (expected full|incremental)")),
        }
    }
}

/// A file offered for indexing together with its current content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub filepath: String,
    pub content_hash: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub to_index: Vec<String>,
    pub unchanged: Vec<String>,
    pub to_delete: Vec<String>,
}

/// Classify `candidates` against the stored fingerprints.
///
/// New or changed files go to `to_index`, hash matches to `unchanged`.
/// Only a full pass turns absence into `to_delete`.
pub fn diff(
    stored: &BTreeMap<String, FileFingerprint>,
    candidates: &[Candidate],
    mode: IndexMode,
) -> FileDiff {
    let mut out = FileDiff::default();
    let mut seen = BTreeSet::new();

    for c in candidates {
        if !seen.insert(c.filepath.as_str()) {
            continue;
        }
        match stored.get(&c.filepath) {
            Some(fp) if fp.content_hash == c.content_hash => out.unchanged.push(c.filepath.clone()),
            _ => out.to_index.push(c.filepath.clone()),
        }
    }

    if mode == IndexMode::Full {
        out.to_delete = stored
            .keys()
            .filter(|path| !seen.contains(path.as_str()))
            .cloned()
            .collect();
    }

    out.to_index.sort();
    out.unchanged.sort();
    out
}
