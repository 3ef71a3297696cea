//! Change detection between the inventory and a fresh remote listing.
//!
//! Detection is a pure function over two snapshots: it mutates nothing, so it
//! can be tested in isolation and the caller decides when (and whether) to
//! commit the resulting sets. Comparison is by content hash, never by
//! modification time, so a touched-but-unchanged file is not reprocessed.

use std::collections::{HashMap, HashSet};

use anyhow::Result;

use crate::error::Error;
use crate::models::{ChangeSet, InventoryRecord, InventoryStatus, RemoteFile};

/// Diff a fresh listing against the known inventory.
///
/// - `added`: path not previously known (tombstoned paths that reappear count
///   as added — their record is revived by the commit).
/// - `updated`: path known and live, content hash differs; also files whose
///   last attempt failed or never completed, so they are retried from scratch
///   on every pass until they index.
/// - `deleted`: live inventory path absent from the listing.
/// - `unchanged`: everything else in the listing.
pub fn detect_changes(
    inventory: &HashMap<String, InventoryRecord>,
    listing: &[RemoteFile],
) -> ChangeSet {
    let mut set = ChangeSet::default();
    let mut seen: HashSet<&str> = HashSet::with_capacity(listing.len());

    for file in listing {
        seen.insert(file.path.as_str());
        match inventory.get(&file.path) {
            None => set.added.push(file.clone()),
            Some(rec) if rec.status == InventoryStatus::Deleted => set.added.push(file.clone()),
            // A pending/failed record with the same hash means the last
            // attempt did not finish; retry wholesale rather than resume.
            Some(rec)
                if rec.content_hash != file.content_hash
                    || rec.status != InventoryStatus::Processed =>
            {
                set.updated.push(file.clone())
            }
            Some(_) => set.unchanged.push(file.clone()),
        }
    }

    for (path, rec) in inventory {
        if rec.status != InventoryStatus::Deleted && !seen.contains(path.as_str()) {
            set.deleted.push(path.clone());
        }
    }
    set.deleted.sort();

    set
}

/// Reject malformed listings before any per-file work starts.
///
/// A listing entry with an empty path or hash, or a duplicated path, fails
/// the whole batch.
pub fn validate_listing(listing: &[RemoteFile]) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(listing.len());
    for file in listing {
        if file.path.is_empty() {
            return Err(Error::TransientIo("listing entry with empty path".to_string()).into());
        }
        if file.content_hash.is_empty() {
            return Err(Error::TransientIo(format!(
                "listing entry '{}' has empty content hash",
                file.path
            ))
            .into());
        }
        if !seen.insert(file.path.as_str()) {
            return Err(
                Error::TransientIo(format!("duplicate listing path '{}'", file.path)).into(),
            );
        }
    }
    Ok(())
}
