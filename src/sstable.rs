//! Immutable on-disk sorted tables. Page 0 of an sstable holds the
//! serialized bloom filter for every key the table contains; each following
//! page holds one serialized kv record in ascending key order. Files are
//! written to a `.tmp` sibling and renamed into place once synced, so a
//! crash mid-write never leaves a half-table with the `.sst` name.

use crate::bloom::BloomFilter;
use crate::codec::{
    deserialize_bloomfilter, deserialize_kv, serialize_bloomfilter, serialize_kv,
};
use crate::kv::KeyValue;
use crate::pager::Pager;
use crate::skiplist::SkipList;
use crate::Result;
use log::warn;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const SSTABLE_EXT: &str = "sst";
const TMP_SUFFIX: &str = "tmp";

pub struct SSTable {
    path: PathBuf,
    pager: Pager,
    modified: SystemTime,
}

impl SSTable {
    pub fn open(path: impl AsRef<Path>) -> Result<SSTable> {
        let path = path.as_ref().to_path_buf();
        let modified = fs::metadata(&path)?.modified()?;
        let pager = Pager::open(&path)?;
        Ok(SSTable {
            path,
            pager,
            modified,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    /// Serialize `entries` into a new sstable at `path`. Entries are
    /// written in the skiplist's ascending key order; records already
    /// expired at `now` are dropped, tombstones are kept so they shadow
    /// older tables until compaction collects them. Returns `None` without
    /// creating a file when nothing is persistable.
    pub fn write(
        path: &Path,
        entries: &SkipList,
        compressed: bool,
        now: i64,
    ) -> Result<Option<SSTable>> {
        let live = |ttl: i64| ttl < 0 || ttl > now;

        let mut keys = 0usize;
        for node in entries.iter() {
            if live(node.ttl) {
                keys += 1;
            }
        }
        if keys == 0 {
            return Ok(None);
        }

        let mut filter = BloomFilter::create_filter(keys);
        for node in entries.iter() {
            if live(node.ttl) {
                filter.add(&node.key);
            }
        }

        let tmp_path = tmp_path(path);
        let result = (|| -> Result<()> {
            let mut pager = Pager::open(&tmp_path)?;
            pager.write(&serialize_bloomfilter(&filter, compressed)?)?;
            for node in entries.iter() {
                if !live(node.ttl) {
                    continue;
                }
                let kv = KeyValue {
                    key: node.key.clone(),
                    value: node.value.clone(),
                    ttl: node.ttl,
                };
                pager.write(&serialize_kv(&kv, compressed)?)?;
            }
            pager.sync()?;
            Ok(())
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        fs::rename(&tmp_path, path)?;

        Ok(Some(SSTable::open(path)?))
    }

    /// Bloom-gated point lookup. Returns the raw record on a key match;
    /// the caller decides what a tombstone or an expired ttl means.
    pub fn get(&self, key: &[u8], compressed: bool) -> Result<Option<KeyValue>> {
        let filter = deserialize_bloomfilter(&self.pager.read(0)?, compressed)?;
        if !filter.check(key) {
            return Ok(None);
        }

        // cursor starts on the bloom header page; every next() lands on a
        // kv record
        let mut cursor = self.pager.cursor()?;
        while cursor.next() {
            let page = match cursor.page() {
                Some(page) => page,
                None => break,
            };
            let kv = deserialize_kv(&self.pager.read(page)?, compressed)?;
            if kv.key == key {
                return Ok(Some(kv));
            }
        }
        Ok(None)
    }

    /// Page numbers of the kv records, skipping the bloom header page.
    pub fn kv_pages(&self) -> Result<Vec<u64>> {
        let mut pages = self.pager.record_pages()?;
        if !pages.is_empty() {
            pages.remove(0);
        }
        Ok(pages)
    }

    pub fn read_kv(&self, page: u64, compressed: bool) -> Result<KeyValue> {
        deserialize_kv(&self.pager.read(page)?, compressed)
    }

    /// Delete the backing file. The handle keeps its open descriptor, so
    /// concurrent readers holding the same table finish unharmed.
    pub fn remove_file(&self) -> Result<()> {
        fs::remove_file(&self.path)?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".");
    os.push(TMP_SUFFIX);
    PathBuf::from(os)
}

/// Open every `<dir>/*.sst` and return the tables sorted by file mtime,
/// oldest first. Stray `.tmp` leftovers from an interrupted flush are
/// removed on sight.
pub fn load_sstables(dir: &Path) -> Result<Vec<SSTable>> {
    let mut tables = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext == SSTABLE_EXT => tables.push(SSTable::open(&path)?),
            Some(ext) if ext == TMP_SUFFIX => {
                warn!("removing leftover temp file {:?}", path);
                let _ = fs::remove_file(&path);
            }
            _ => {}
        }
    }
    sort_by_mtime(&mut tables);
    Ok(tables)
}

/// Oldest first; equal mtimes keep their current relative order.
fn sort_by_mtime(tables: &mut [SSTable]) {
    tables.sort_by_key(SSTable::modified);
}
