//! Incremental per-file change tracking.
//!
//! Keeps enough bookkeeping to answer "what changed since the last scan"
//! without re-diffing whole documents: a modified-line set, a map of
//! line-shift deltas for re-projecting stale line references, the last-seen
//! document version, and a version-keyed content hash cache.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One discrete edit inside a change event. Lines are 1-based and inclusive.
#[derive(Debug, Clone)]
pub struct DocumentEdit {
    pub start_line: usize,
    pub end_line: usize,
    pub lines_added: usize,
    pub lines_removed: usize,
}

/// A document mutation event as reported by the editor host.
#[derive(Debug, Clone)]
pub struct DocumentChange {
    pub path: PathBuf,
    pub language_id: String,
    pub version: i64,
    pub edits: Vec<DocumentEdit>,
}

/// Point-in-time view of a live document.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    pub path: PathBuf,
    pub language_id: String,
    pub version: i64,
    pub text: String,
}

#[derive(Debug, Default)]
struct FileTracking {
    modified_lines: BTreeSet<usize>,
    /// Keyed at the first line after an edit; value is the signed line-count
    /// delta every original line at or past that point has shifted by.
    shift_map: BTreeMap<usize, i64>,
}

#[derive(Debug)]
pub struct ChangeTracker {
    tracked_languages: HashSet<String>,
    files: HashMap<PathBuf, FileTracking>,
    versions: HashMap<PathBuf, i64>,
    hash_cache: HashMap<PathBuf, (i64, String)>,
}

impl ChangeTracker {
    pub fn new(tracked_languages: impl IntoIterator<Item = String>) -> Self {
        Self {
            tracked_languages: tracked_languages.into_iter().collect(),
            files: HashMap::new(),
            versions: HashMap::new(),
            hash_cache: HashMap::new(),
        }
    }

    pub fn is_tracked_language(&self, language_id: &str) -> bool {
        self.tracked_languages.contains(language_id)
    }

    /// Record an edit batch. Non-tracked languages are ignored at this
    /// boundary so every downstream map only ever sees scanned files.
    pub fn on_document_changed(&mut self, change: &DocumentChange) {
        if !self.is_tracked_language(&change.language_id) {
            return;
        }

        let tracking = self.files.entry(change.path.clone()).or_default();
        for edit in &change.edits {
            for line in edit.start_line..=edit.end_line.max(edit.start_line) {
                tracking.modified_lines.insert(line);
            }

            let delta = edit.lines_added as i64 - edit.lines_removed as i64;
            if delta != 0 {
                *tracking.shift_map.entry(edit.end_line + 1).or_insert(0) += delta;
            }
        }

        self.versions.insert(change.path.clone(), change.version);
    }

    /// Content hash for equality checks, cached per document version.
    /// Recomputed only when the version has moved past the cached one.
    pub fn content_hash(&mut self, doc: &DocumentSnapshot) -> String {
        if let Some((version, hash)) = self.hash_cache.get(&doc.path) {
            if *version == doc.version {
                return hash.clone();
            }
        }

        let mut hasher = Sha256::new();
        hasher.update(doc.text.as_bytes());
        let hash = format!("{:x}", hasher.finalize());

        self.hash_cache
            .insert(doc.path.clone(), (doc.version, hash.clone()));
        hash
    }

    /// Re-project a line recorded before recent edits onto the current text.
    pub fn apply_line_shift(&self, path: &Path, original_line: usize) -> usize {
        let Some(tracking) = self.files.get(path) else {
            return original_line;
        };

        let shift: i64 = tracking
            .shift_map
            .range(..=original_line)
            .map(|(_, delta)| delta)
            .sum();

        (original_line as i64 + shift).max(1) as usize
    }

    pub fn is_line_modified(&self, path: &Path, line: usize) -> bool {
        self.files
            .get(path)
            .is_some_and(|t| t.modified_lines.contains(&line))
    }

    pub fn is_range_modified(&self, path: &Path, start_line: usize, end_line: usize) -> bool {
        self.files
            .get(path)
            .is_some_and(|t| t.modified_lines.range(start_line..=end_line).next().is_some())
    }

    pub fn modified_lines(&self, path: &Path) -> Option<&BTreeSet<usize>> {
        self.files.get(path).map(|t| &t.modified_lines)
    }

    pub fn version(&self, path: &Path) -> Option<i64> {
        self.versions.get(path).copied()
    }

    /// Drop the modified-line set and shift map once a scan has consumed
    /// them. The hash cache stays valid until the next version bump.
    pub fn clear_file(&mut self, path: &Path) {
        self.files.remove(path);
    }

    pub fn handle_file_rename(&mut self, old: &Path, new: &Path) {
        debug!(old = %old.display(), new = %new.display(), "carrying tracking across rename");
        if let Some(tracking) = self.files.remove(old) {
            self.files.insert(new.to_path_buf(), tracking);
        }
        if let Some(version) = self.versions.remove(old) {
            self.versions.insert(new.to_path_buf(), version);
        }
        if let Some(cached) = self.hash_cache.remove(old) {
            self.hash_cache.insert(new.to_path_buf(), cached);
        }
    }

    pub fn handle_file_delete(&mut self, path: &Path) {
        self.files.remove(path);
        self.versions.remove(path);
        self.hash_cache.remove(path);
    }
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new(["solidity".to_string(), "yul".to_string()])
    }
}
