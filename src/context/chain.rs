//! Resolution of chained compaction records.
//!
//! A record's trigger id names either an entry or an earlier record. Following the
//! chain from the newest record yields the oldest entry that must still be replayed.
//! Any break in the chain degrades to replaying everything.

use crate::stores::{CompactionRecord, Entry};
use std::collections::{HashMap, HashSet};

/// Maximum number of record hops followed before giving up.
pub const MAX_CHAIN_DEPTH: usize = 10;

/// Summary to prepend and the entry to start replaying from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainResolution {
    pub summary: Option<String>,
    pub start_entry_id: Option<String>,
}

/// Resolve the active summary and replay start for a session.
#[must_use]
pub fn resolve_chain(entries: &[Entry], records: &[CompactionRecord]) -> ChainResolution {
    resolve_chain_with_depth(entries, records, MAX_CHAIN_DEPTH)
}

/// [`resolve_chain`] with an explicit hop limit.
#[must_use]
pub fn resolve_chain_with_depth(
    entries: &[Entry],
    records: &[CompactionRecord],
    max_depth: usize,
) -> ChainResolution {
    // max_by_key returns the last maximum, so equal timestamps favor later insertion.
    let Some(active) = records.iter().max_by_key(|r| r.created_at) else {
        return ChainResolution::default();
    };
    if active.summary.trim().is_empty() {
        return ChainResolution::default();
    }

    let summary = Some(active.summary.clone());
    let entry_ids: HashSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();
    let records_by_id: HashMap<&str, &CompactionRecord> =
        records.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut visited: HashSet<&str> = HashSet::from([active.id.as_str()]);
    let mut current = active.trigger_entry_id.as_str();
    let mut hops = 0usize;

    loop {
        if entry_ids.contains(current) {
            return ChainResolution {
                summary,
                start_entry_id: Some(current.to_string()),
            };
        }

        let Some(next) = records_by_id.get(current) else {
            log::warn!(
                "Compaction record {} points at unknown id {current}; replaying full history",
                active.id
            );
            return ChainResolution {
                summary,
                start_entry_id: None,
            };
        };

        if !visited.insert(current) {
            log::warn!(
                "Cycle in compaction chain at record {current}; replaying full history"
            );
            return ChainResolution {
                summary,
                start_entry_id: None,
            };
        }

        hops += 1;
        if hops > max_depth {
            log::warn!(
                "Compaction chain from record {} exceeds {max_depth} hops; replaying full history",
                active.id
            );
            return ChainResolution {
                summary,
                start_entry_id: None,
            };
        }

        current = next.trigger_entry_id.as_str();
    }
}
