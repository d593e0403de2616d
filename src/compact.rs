//! Pairwise multi-threaded compaction. The sstable list is sorted oldest
//! first and split into contiguous slots, one worker thread per slot; each
//! worker merges adjacent pairs `(i, i+1)` into a single new table,
//! dropping tombstones and expired records and rebuilding the bloom
//! filter. A failed or empty merge leaves its pair in place for a later
//! run.

use crate::column_family::ColumnFamily;
use crate::error::Error;
use crate::kv::{unix_now, KeyValue};
use crate::skiplist::SkipList;
use crate::sstable::SSTable;
use crate::Result;
use log::{debug, error, warn};
use std::sync::Arc;
use std::thread;

pub fn compact_sstables(cf: &ColumnFamily, max_threads: usize) -> Result<()> {
    if max_threads < 1 {
        return Err(Error::ThreadsTooLow);
    }

    // excludes readers and flush publishes for the whole run
    let mut guard = cf.sstables.write().unwrap();
    let num_sstables = guard.len();
    if num_sstables < 2 {
        return Err(Error::NotEnoughSSTables);
    }

    guard.sort_by_key(|table| table.modified());

    let mut slots: Vec<Option<Arc<SSTable>>> = guard.drain(..).map(Some).collect();
    // cap the worker count so every slot spans at least one pair
    let threads = max_threads.min((num_sstables + 1) / 2);
    let per_thread = (num_sstables + threads - 1) / threads;

    thread::scope(|s| {
        for chunk in slots.chunks_mut(per_thread) {
            s.spawn(move || compact_slot(cf, chunk));
        }
    });

    // drop the merged-away slots, keeping relative order: within each pair
    // the new table takes the older input's position
    *guard = slots.into_iter().flatten().collect();
    Ok(())
}

fn compact_slot(cf: &ColumnFamily, slot: &mut [Option<Arc<SSTable>>]) {
    let mut i = 0;
    while i + 1 < slot.len() {
        let older = slot[i].as_ref().unwrap();
        let newer = slot[i + 1].as_ref().unwrap();
        match merge_pair(cf, older, newer) {
            Ok(Some(merged)) => {
                debug!(
                    "column family `{}`: merged {:?} + {:?} into {:?}",
                    cf.name(),
                    older.path(),
                    newer.path(),
                    merged.path()
                );
                // readers holding the old handles keep their open
                // descriptors; only the directory entries go away
                if let Err(e) = older.remove_file() {
                    warn!("failed to remove {:?}: {}", older.path(), e);
                }
                if let Err(e) = newer.remove_file() {
                    warn!("failed to remove {:?}: {}", newer.path(), e);
                }
                slot[i] = Some(Arc::new(merged));
                slot[i + 1] = None;
            }
            Ok(None) => {}
            Err(e) => {
                // keep the pair for a later retry
                error!(
                    "column family `{}`: failed to merge {:?} + {:?}: {}",
                    cf.name(),
                    older.path(),
                    newer.path(),
                    e
                );
            }
        }
        i += 2;
    }
}

/// Merge two sorted tables into one, newer input winning key ties,
/// tombstones and expired records filtered out. Returns `None` when
/// either input has no records or nothing survives the filters.
fn merge_pair(cf: &ColumnFamily, older: &SSTable, newer: &SSTable) -> Result<Option<SSTable>> {
    let compressed = cf.config.compressed;
    let pages_a = older.kv_pages()?;
    let pages_b = newer.kv_pages()?;
    if pages_a.is_empty() || pages_b.is_empty() {
        return Ok(None);
    }

    let now = unix_now();
    let mut merged = SkipList::new(cf.config.max_level as usize, cf.config.probability as f64);

    fn keep(merged: &mut SkipList, kv: KeyValue, now: i64) {
        if !kv.is_tombstone() && !kv.is_expired(now) {
            merged.put(kv.key, kv.value, kv.ttl);
        }
    }

    let mut ia = 0;
    let mut ib = 0;
    let mut head_a: Option<KeyValue> = None;
    let mut head_b: Option<KeyValue> = None;
    loop {
        if head_a.is_none() && ia < pages_a.len() {
            head_a = Some(older.read_kv(pages_a[ia], compressed)?);
            ia += 1;
        }
        if head_b.is_none() && ib < pages_b.len() {
            head_b = Some(newer.read_kv(pages_b[ib], compressed)?);
            ib += 1;
        }
        match (head_a.take(), head_b.take()) {
            (None, None) => break,
            (Some(a), None) => keep(&mut merged, a, now),
            (None, Some(b)) => keep(&mut merged, b, now),
            (Some(a), Some(b)) => {
                if a.key < b.key {
                    keep(&mut merged, a, now);
                    head_b = Some(b);
                } else if a.key > b.key {
                    keep(&mut merged, b, now);
                    head_a = Some(a);
                } else {
                    // same key in both inputs: the newer table wins
                    keep(&mut merged, b, now);
                }
            }
        }
    }

    if merged.is_empty() {
        return Ok(None);
    }
    SSTable::write(&cf.next_sstable_path(), &merged, compressed, now)
}
