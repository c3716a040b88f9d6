//! Crash-durable journal of pending submissions
//!
//! One JSON document holding the pending queue (plus the in-flight task,
//! prepended) so queued finds survive a crash or restart. Writes are
//! debounced by the manager and go through the atomic temp+rename helper.
//! Corrupt or unknown-version documents are logged and ignored; the journal
//! is an optimization, never a source of truth.

use std::path::Path;

use serde::{Deserialize, Serialize};

use seedhunt_core::persist;

use crate::queue::{SubmissionSource, SubmissionTask};

pub const JOURNAL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seed: u64,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SubmissionSource>,
    pub seq: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Journal {
    pub version: u32,
    pub updated_at: String,
    pub entries: Vec<JournalEntry>,
}

/// Serialize `tasks` (already in dispatch order) to `path`.
pub fn save(path: &Path, tasks: &[SubmissionTask]) -> anyhow::Result<()> {
    let journal = Journal {
        version: JOURNAL_VERSION,
        updated_at: persist::timestamp_now(),
        entries: tasks
            .iter()
            .map(|t| JournalEntry {
                seed: t.seed,
                score: t.score,
                source: Some(t.source),
                seq: t.seq,
            })
            .collect(),
    };
    persist::save_json(path, &journal)
}

/// Load journal entries. Missing, corrupt or unknown-version files all come
/// back as `None` after a log line; the caller starts with an empty queue.
pub fn load(path: &Path) -> Option<Vec<JournalEntry>> {
    match persist::load_json::<Journal>(path) {
        Ok(Some(journal)) if journal.version == JOURNAL_VERSION => Some(journal.entries),
        Ok(Some(journal)) => {
            log::warn!(
                "ignoring journal {} with unknown version {}",
                path.display(),
                journal.version
            );
            None
        }
        Ok(None) => None,
        Err(err) => {
            log::warn!("ignoring unreadable journal {}: {err:#}", path.display());
            None
        }
    }
}

/// Deduplicate reloaded entries by seed: keep the best score, breaking ties
/// by the earliest sequence number. Output is re-sorted in dispatch order.
pub fn dedup_entries(mut entries: Vec<JournalEntry>) -> Vec<JournalEntry> {
    entries.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.seq.cmp(&b.seq))
    });
    let mut seen = std::collections::HashSet::new();
    entries.retain(|e| seen.insert(e.seed));
    entries
}
