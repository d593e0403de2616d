//! Bidirectional cursor over one column family. Traversal order is the
//! memtable (snapshotted at init, ascending key order) followed by the
//! sstables newest to oldest, each in page order. The cursor keeps its own
//! sstable handles, so tables merged away by compaction stay readable
//! through their open descriptors until the cursor is dropped.

use crate::column_family::ColumnFamily;
use crate::error::Error;
use crate::kv::{unix_now, KeyValue};
use crate::sstable::SSTable;
use crate::Result;
use std::sync::Arc;

enum Slot {
    /// Index into the memtable snapshot.
    Memtable(usize),
    /// Table index (newest first) and kv page number.
    SSTable(usize, u64),
}

pub struct Cursor {
    compressed: bool,
    mem_entries: Vec<KeyValue>,
    sstables: Vec<Arc<SSTable>>,
    slots: Vec<Slot>,
    pos: usize,
}

impl Cursor {
    pub(crate) fn new(cf: Arc<ColumnFamily>) -> Result<Cursor> {
        let snapshot = cf.memtable.snapshot();
        let mem_entries: Vec<KeyValue> = snapshot.iter().map(|node| node.entry()).collect();
        let sstables = cf.sstables_newest_first();

        let mut slots: Vec<Slot> = (0..mem_entries.len()).map(Slot::Memtable).collect();
        for (index, sst) in sstables.iter().enumerate() {
            for page in sst.kv_pages()? {
                slots.push(Slot::SSTable(index, page));
            }
        }

        Ok(Cursor {
            compressed: cf.config.compressed,
            mem_entries,
            sstables,
            slots,
            pos: 0,
        })
    }

    /// The record under the cursor. Sstable records surface their state:
    /// a tombstone fails with `KeyTombstoned`, an expired ttl with
    /// `KeyExpired`. Memtable entries are returned as stored.
    pub fn get(&self) -> Result<KeyValue> {
        match self.slots.get(self.pos) {
            None => Err(Error::KeyNotFound),
            Some(Slot::Memtable(i)) => Ok(self.mem_entries[*i].clone()),
            Some(Slot::SSTable(table, page)) => {
                let kv = self.sstables[*table].read_kv(*page, self.compressed)?;
                if kv.is_tombstone() {
                    return Err(Error::KeyTombstoned);
                }
                if kv.is_expired(unix_now()) {
                    return Err(Error::KeyExpired);
                }
                Ok(kv)
            }
        }
    }

    pub fn next(&mut self) -> Result<()> {
        if self.pos + 1 < self.slots.len() {
            self.pos += 1;
            Ok(())
        } else {
            Err(Error::AtEndOfCursor)
        }
    }

    pub fn prev(&mut self) -> Result<()> {
        if self.pos > 0 {
            self.pos -= 1;
            Ok(())
        } else {
            Err(Error::AtStartOfCursor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::db::Database;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Database {
        let db = Database::open(DbConfig::new(dir.path())).unwrap();
        db.create_column_family("cf1", 1 << 20, 12, 0.24, false)
            .unwrap();
        db
    }

    /// Flush, then give the next table a strictly newer mtime.
    fn force_flush(db: &Database) {
        db.flush("cf1").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
    }

    #[test]
    fn test_walks_memtable_in_key_order() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        for key in [b"b".as_ref(), b"a", b"c"] {
            db.put("cf1", key, b"v", -1).unwrap();
        }

        let mut cursor = db.cursor("cf1").unwrap();
        assert_eq!(cursor.get().unwrap().key, b"a");
        cursor.next().unwrap();
        assert_eq!(cursor.get().unwrap().key, b"b");
        cursor.next().unwrap();
        assert_eq!(cursor.get().unwrap().key, b"c");
        assert!(matches!(cursor.next(), Err(Error::AtEndOfCursor)));
    }

    #[test]
    fn test_crosses_into_sstables_newest_first() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        db.put("cf1", b"old", b"1", -1).unwrap();
        force_flush(&db);
        db.put("cf1", b"young", b"2", -1).unwrap();
        force_flush(&db);
        db.put("cf1", b"mem", b"3", -1).unwrap();

        let mut cursor = db.cursor("cf1").unwrap();
        assert_eq!(cursor.get().unwrap().key, b"mem");
        cursor.next().unwrap();
        assert_eq!(cursor.get().unwrap().key, b"young");
        cursor.next().unwrap();
        assert_eq!(cursor.get().unwrap().key, b"old");
        assert!(matches!(cursor.next(), Err(Error::AtEndOfCursor)));

        cursor.prev().unwrap();
        assert_eq!(cursor.get().unwrap().key, b"young");
        cursor.prev().unwrap();
        assert_eq!(cursor.get().unwrap().key, b"mem");
        assert!(matches!(cursor.prev(), Err(Error::AtStartOfCursor)));
    }

    #[test]
    fn test_reports_tombstoned_and_expired() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        let now = unix_now();
        db.put("cf1", b"dying", b"v", now + 1).unwrap();
        db.put("cf1", b"live", b"v", -1).unwrap();
        db.delete("cf1", b"gone").unwrap();
        force_flush(&db);
        std::thread::sleep(std::time::Duration::from_secs(2));

        let mut cursor = db.cursor("cf1").unwrap();
        // sstable order: dying, gone, live
        assert!(matches!(cursor.get(), Err(Error::KeyExpired)));
        cursor.next().unwrap();
        assert!(matches!(cursor.get(), Err(Error::KeyTombstoned)));
        cursor.next().unwrap();
        assert_eq!(cursor.get().unwrap().key, b"live");
    }

    #[test]
    fn test_empty_column_family() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        let mut cursor = db.cursor("cf1").unwrap();
        assert!(matches!(cursor.get(), Err(Error::KeyNotFound)));
        assert!(matches!(cursor.next(), Err(Error::AtEndOfCursor)));
        assert!(matches!(cursor.prev(), Err(Error::AtStartOfCursor)));
    }
}
