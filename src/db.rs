//! The database: owns the write-ahead log, the column family catalog and
//! the flush worker, and exposes the public CRUD surface.
//!
//! Writes append to the WAL first, then the column family's memtable; a
//! writer that observes the memtable over its flush threshold snapshots it
//! under the flush lock and queues the snapshot for the background worker.
//! Reads go memtable first, then sstables newest to oldest.

use crate::column_family::{load_column_families, ColumnFamily, ColumnFamilyConfig};
use crate::compact;
use crate::config::DbConfig;
use crate::cursor::Cursor;
use crate::error::Error;
use crate::flush::{FlushJob, FlushWorker};
use crate::kv::{unix_now, KeyValue, OpCode, Operation};
use crate::wal::Wal;
use crate::Result;
use log::{info, warn};
use std::fs;
use std::sync::{Arc, Mutex, RwLock};

pub struct Database {
    config: DbConfig,
    wal: Arc<Wal>,
    column_families: RwLock<Vec<Arc<ColumnFamily>>>,
    /// Serializes snapshot + checkpoint + clear so concurrent writers
    /// crossing the threshold cannot double-flush one memtable.
    flush_lock: Mutex<()>,
    flush: FlushWorker,
}

impl Database {
    /// Open a database directory, creating it if missing: open the WAL,
    /// rebuild the column family catalog and their sstable lists, start
    /// the flush worker and replay the WAL into the memtables.
    pub fn open(config: DbConfig) -> Result<Database> {
        fs::create_dir_all(&config.db_path)?;

        let wal = Arc::new(Wal::open(&config.db_path, config.compressed_wal)?);
        let column_families = load_column_families(&config.db_path)?;
        let flush = FlushWorker::start(wal.clone())?;

        let db = Database {
            config,
            wal,
            column_families: RwLock::new(column_families),
            flush_lock: Mutex::new(()),
            flush,
        };
        db.replay_wal();
        Ok(db)
    }

    /// Re-apply logged operations to the memtables, oldest first. A record
    /// naming an unknown column family aborts the remainder of the replay;
    /// the log itself is left untouched either way.
    fn replay_wal(&self) {
        let ops = match self.wal.operations() {
            Ok(ops) => ops,
            Err(e) => {
                warn!("wal replay aborted: {}", e);
                return;
            }
        };
        let mut replayed = 0usize;
        for op in ops {
            let cf = match self.column_family(&op.column_family) {
                Ok(cf) => cf,
                Err(_) => {
                    warn!(
                        "wal replay aborted: unknown column family `{}`",
                        op.column_family
                    );
                    return;
                }
            };
            match op.op_code {
                OpCode::Put => cf.memtable.put(op.kv.key, op.kv.value, op.kv.ttl),
                OpCode::Delete => cf.memtable.delete(op.kv.key),
            }
            replayed += 1;
        }
        if replayed > 0 {
            info!("replayed {} operation(s) from the wal", replayed);
        }
    }

    pub fn create_column_family(
        &self,
        name: &str,
        flush_threshold: i32,
        max_level: i32,
        probability: f32,
        compressed: bool,
    ) -> Result<()> {
        let config = ColumnFamilyConfig {
            name: name.to_string(),
            flush_threshold,
            max_level,
            probability,
            compressed,
        };
        config.validate()?;

        let mut cfs = self.column_families.write().unwrap();
        if cfs.iter().any(|cf| cf.name() == name) {
            return Err(Error::ColumnFamilyExists(name.to_string()));
        }
        let cf = ColumnFamily::create(&self.config.db_path, config)?;
        cfs.push(Arc::new(cf));
        Ok(())
    }

    /// Remove a column family and everything it stores. The directory is
    /// removed while the handle is still alive; readers holding sstable
    /// handles finish on their open descriptors.
    pub fn drop_column_family(&self, name: &str) -> Result<()> {
        let mut cfs = self.column_families.write().unwrap();
        let index = cfs
            .iter()
            .position(|cf| cf.name() == name)
            .ok_or_else(|| Error::ColumnFamilyNotFound(name.to_string()))?;
        let cf = cfs.remove(index);
        cf.sstables.write().unwrap().clear();
        cf.remove_dir()?;
        Ok(())
    }

    pub(crate) fn column_family(&self, name: &str) -> Result<Arc<ColumnFamily>> {
        let cfs = self.column_families.read().unwrap();
        cfs.iter()
            .find(|cf| cf.name() == name)
            .cloned()
            .ok_or_else(|| Error::ColumnFamilyNotFound(name.to_string()))
    }

    pub fn put(&self, cf_name: &str, key: &[u8], value: &[u8], ttl: i64) -> Result<()> {
        let cf = self.column_family(cf_name)?;
        let kv = KeyValue::new(key.to_vec(), value.to_vec(), ttl);
        self.wal.append(&Operation::put(cf_name, kv))?;
        cf.memtable.put(key.to_vec(), value.to_vec(), ttl);
        self.maybe_flush(&cf);
        Ok(())
    }

    pub fn get(&self, cf_name: &str, key: &[u8]) -> Result<Vec<u8>> {
        let cf = self.column_family(cf_name)?;
        let now = unix_now();

        if let Some(entry) = cf.memtable.get(key) {
            if entry.is_tombstone() || entry.is_expired(now) {
                return Err(Error::KeyNotFound);
            }
            return Ok(entry.value);
        }

        for sst in cf.sstables_newest_first() {
            if let Some(kv) = sst.get(key, cf.config.compressed)? {
                if kv.is_tombstone() || kv.is_expired(now) {
                    return Err(Error::KeyNotFound);
                }
                return Ok(kv.value);
            }
        }
        Err(Error::KeyNotFound)
    }

    pub fn delete(&self, cf_name: &str, key: &[u8]) -> Result<()> {
        let cf = self.column_family(cf_name)?;
        self.wal.append(&Operation::delete(cf_name, key.to_vec()))?;
        cf.memtable.delete(key.to_vec());
        Ok(())
    }

    /// Merge the column family's sstables pairwise across up to
    /// `max_threads` worker threads, collecting tombstones and expired
    /// records.
    pub fn compact_sstables(&self, cf_name: &str, max_threads: usize) -> Result<()> {
        let cf = self.column_family(cf_name)?;
        compact::compact_sstables(&cf, max_threads)
    }

    /// Bidirectional cursor over one column family: memtable entries
    /// first, then sstables newest to oldest.
    pub fn cursor(&self, cf_name: &str) -> Result<Cursor> {
        let cf = self.column_family(cf_name)?;
        Cursor::new(cf)
    }

    /// Queue a flush if the memtable crossed its threshold. Called after
    /// every put and transaction commit.
    pub(crate) fn maybe_flush(&self, cf: &Arc<ColumnFamily>) {
        let threshold = cf.config.flush_threshold as usize;
        if cf.memtable.total_size() < threshold {
            return;
        }

        let _guard = self.flush_lock.lock().unwrap();
        // another writer may have flushed while we waited for the lock
        if cf.memtable.total_size() < threshold {
            return;
        }
        // checkpoint first: records appended between here and the clear
        // stay above the checkpoint and survive truncation
        let checkpoint = self.wal.checkpoint();
        let snapshot = cf.memtable.snapshot_and_clear();
        if snapshot.is_empty() {
            return;
        }
        self.flush.enqueue(FlushJob {
            cf: cf.clone(),
            snapshot,
            checkpoint,
            done: None,
        });
    }

    /// Flush the column family's memtable regardless of the threshold and
    /// wait for the worker to finish the job, so the new sstable is
    /// visible on return. A no-op when the memtable is empty.
    pub fn flush(&self, cf_name: &str) -> Result<()> {
        let cf = self.column_family(cf_name)?;
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        {
            let _guard = self.flush_lock.lock().unwrap();
            let checkpoint = self.wal.checkpoint();
            let snapshot = cf.memtable.snapshot_and_clear();
            if snapshot.is_empty() {
                return Ok(());
            }
            self.flush.enqueue(FlushJob {
                cf,
                snapshot,
                checkpoint,
                done: Some(done_tx),
            });
        }
        // an Err here means the worker is already gone; nothing to wait on
        let _ = done_rx.recv();
        Ok(())
    }

    /// Stop the flush worker (draining queued snapshots) and sync the
    /// WAL. Unflushed memtable contents are not written out; they replay
    /// from the WAL on the next open.
    pub fn close(mut self) -> Result<()> {
        self.flush.shutdown();
        self.wal.sync()?;
        Ok(())
    }
}
