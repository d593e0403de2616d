//! Write-ahead log: one serialized operation per pager page, appended
//! before the memtable is touched. The flush worker truncates it at the
//! checkpoint captured when the memtable snapshot was taken.

use crate::codec::{deserialize_operation, serialize_operation};
use crate::kv::Operation;
use crate::pager::Pager;
use crate::Result;
use std::path::Path;
use std::sync::RwLock;

pub const WAL_FILE: &str = "wal";

pub struct Wal {
    pager: RwLock<Pager>,
    compressed: bool,
}

impl Wal {
    pub fn open(db_path: &Path, compressed: bool) -> Result<Wal> {
        let pager = Pager::open(db_path.join(WAL_FILE))?;
        Ok(Wal {
            pager: RwLock::new(pager),
            compressed,
        })
    }

    /// Append one operation as one page. Appends are serialized by the
    /// lock, so page order is the order mutations were acknowledged.
    pub fn append(&self, op: &Operation) -> Result<()> {
        let buf = serialize_operation(op, self.compressed)?;
        let mut pager = self.pager.write().unwrap();
        pager.write(&buf)?;
        Ok(())
    }

    /// Page count right now; captured as the flush checkpoint.
    pub fn checkpoint(&self) -> u64 {
        self.pager.read().unwrap().pages()
    }

    /// Drop every page below `checkpoint`, keeping records appended after
    /// the corresponding snapshot was taken. Called only by the flush
    /// worker once the sstable is durable.
    pub fn truncate(&self, checkpoint: u64) -> Result<()> {
        self.pager.write().unwrap().truncate(checkpoint)
    }

    /// Every logged operation, oldest first. Used once at open to rebuild
    /// the memtables.
    pub fn operations(&self) -> Result<Vec<Operation>> {
        let pager = self.pager.read().unwrap();
        let mut ops = Vec::new();
        for page in pager.record_pages()? {
            let buf = pager.read(page)?;
            ops.push(deserialize_operation(&buf, self.compressed)?);
        }
        Ok(ops)
    }

    pub fn sync(&self) -> Result<()> {
        self.pager.read().unwrap().sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KeyValue, OpCode, TTL_NONE};
    use tempfile::TempDir;

    #[test]
    fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path(), false).unwrap();

        wal.append(&Operation::put(
            "cf1",
            KeyValue::new(b"a".to_vec(), b"1".to_vec(), TTL_NONE),
        ))
        .unwrap();
        wal.append(&Operation::delete("cf1", b"b".to_vec())).unwrap();

        let ops = wal.operations().unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].op_code, OpCode::Put);
        assert_eq!(ops[0].kv.key, b"a");
        assert_eq!(ops[1].op_code, OpCode::Delete);
        assert!(ops[1].kv.is_tombstone());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let wal = Wal::open(dir.path(), false).unwrap();
            for i in 0..10u32 {
                wal.append(&Operation::put(
                    "cf1",
                    KeyValue::new(
                        format!("k{}", i).into_bytes(),
                        format!("v{}", i).into_bytes(),
                        TTL_NONE,
                    ),
                ))
                .unwrap();
            }
        }
        let wal = Wal::open(dir.path(), false).unwrap();
        let ops = wal.operations().unwrap();
        assert_eq!(ops.len(), 10);
        assert_eq!(ops[7].kv.value, b"v7");
    }

    #[test]
    fn test_truncate_at_checkpoint() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path(), false).unwrap();

        for i in 0..5u32 {
            wal.append(&Operation::put(
                "cf1",
                KeyValue::new(format!("old{}", i).into_bytes(), b"v".to_vec(), TTL_NONE),
            ))
            .unwrap();
        }
        let checkpoint = wal.checkpoint();
        wal.append(&Operation::put(
            "cf1",
            KeyValue::new(b"young".to_vec(), b"v".to_vec(), TTL_NONE),
        ))
        .unwrap();

        wal.truncate(checkpoint).unwrap();

        let ops = wal.operations().unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kv.key, b"young");
        assert!(wal.checkpoint() <= checkpoint);
    }

    #[test]
    fn test_compressed_round_trip() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path(), true).unwrap();
        wal.append(&Operation::put(
            "cf1",
            KeyValue::new(b"key".to_vec(), vec![0u8; 2048], TTL_NONE),
        ))
        .unwrap();

        let ops = wal.operations().unwrap();
        assert_eq!(ops[0].kv.value, vec![0u8; 2048]);
    }
}
