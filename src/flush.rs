//! Background flush pipeline. Writers that observe a memtable over its
//! threshold snapshot it, capture the WAL checkpoint and hand a job to the
//! single worker thread over an unbounded channel. The worker serializes
//! the snapshot into a new sstable, publishes it on the column family and
//! truncates the WAL at the checkpoint. Dropping the sender closes the
//! channel; the worker drains whatever is still queued and exits.

use crate::column_family::ColumnFamily;
use crate::kv::unix_now;
use crate::skiplist::SkipList;
use crate::sstable::SSTable;
use crate::wal::Wal;
use crate::Result;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

pub struct FlushJob {
    pub cf: Arc<ColumnFamily>,
    pub snapshot: SkipList,
    pub checkpoint: u64,
    /// Signalled once the job finished, for callers that flush
    /// synchronously.
    pub done: Option<Sender<()>>,
}

pub struct FlushWorker {
    sender: Option<Sender<FlushJob>>,
    handle: Option<JoinHandle<()>>,
}

impl FlushWorker {
    pub fn start(wal: Arc<Wal>) -> Result<FlushWorker> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name("memtable flush".to_owned())
            .spawn(move || run(wal, receiver))?;
        Ok(FlushWorker {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    pub fn enqueue(&self, job: FlushJob) {
        if let Some(sender) = &self.sender {
            if sender.send(job).is_err() {
                warn!("flush worker is gone, dropping flush job");
            }
        }
    }

    /// Close the channel and wait for the worker to drain the queue.
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("flush worker panicked");
            }
        }
    }
}

impl Drop for FlushWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(wal: Arc<Wal>, receiver: Receiver<FlushJob>) {
    info!("thread `{}` started", thread::current().name().unwrap_or(""));
    while let Ok(mut job) = receiver.recv() {
        let cf_name = job.cf.name().to_string();
        let done = job.done.take();
        if let Err(e) = flush_job(&wal, job) {
            // the WAL stays untruncated, so the data replays on next open
            error!("flush of column family `{}` failed: {}", cf_name, e);
        }
        if let Some(done) = done {
            let _ = done.send(());
        }
    }
    info!("thread `{}` exited", thread::current().name().unwrap_or(""));
}

fn flush_job(wal: &Wal, job: FlushJob) -> Result<()> {
    let FlushJob {
        cf,
        snapshot,
        checkpoint,
        done: _,
    } = job;

    let path = cf.next_sstable_path();
    let sst = match SSTable::write(&path, &snapshot, cf.config.compressed, unix_now())? {
        Some(sst) => sst,
        None => {
            debug!("column family `{}`: nothing to flush", cf.name());
            return Ok(());
        }
    };
    debug!(
        "column family `{}`: flushed {} entries to {:?}",
        cf.name(),
        snapshot.len(),
        path
    );

    cf.sstables.write().unwrap().push(Arc::new(sst));
    wal.truncate(checkpoint)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_family::{ColumnFamily, ColumnFamilyConfig};
    use crate::kv::{KeyValue, Operation, TTL_NONE};
    use std::time::Duration;
    use tempfile::TempDir;

    fn cf(dir: &TempDir) -> Arc<ColumnFamily> {
        Arc::new(
            ColumnFamily::create(
                dir.path(),
                ColumnFamilyConfig {
                    name: "cf1".to_string(),
                    flush_threshold: 1 << 20,
                    max_level: 12,
                    probability: 0.24,
                    compressed: false,
                },
            )
            .unwrap(),
        )
    }

    fn wait_for<F: Fn() -> bool>(pred: F) {
        for _ in 0..200 {
            if pred() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_worker_flushes_and_truncates() {
        let _ = env_logger::try_init();
        let dir = TempDir::new().unwrap();
        let wal = Arc::new(Wal::open(dir.path(), false).unwrap());
        let cf = cf(&dir);

        let mut snapshot = SkipList::new(12, 0.24);
        for i in 0..100u32 {
            let op = Operation::put(
                "cf1",
                KeyValue::new(format!("k{}", i).into_bytes(), b"v".to_vec(), TTL_NONE),
            );
            wal.append(&op).unwrap();
            snapshot.put(op.kv.key, op.kv.value, op.kv.ttl);
        }
        let checkpoint = wal.checkpoint();

        let mut worker = FlushWorker::start(wal.clone()).unwrap();
        worker.enqueue(FlushJob {
            cf: cf.clone(),
            snapshot,
            checkpoint,
            done: None,
        });

        wait_for(|| cf.sstables.read().unwrap().len() == 1);
        wait_for(|| wal.checkpoint() == 0);

        let tables = cf.sstables.read().unwrap();
        let kv = tables[0].get(b"k42", false).unwrap().unwrap();
        assert_eq!(kv.value, b"v");
        drop(tables);
        worker.shutdown();
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let dir = TempDir::new().unwrap();
        let wal = Arc::new(Wal::open(dir.path(), false).unwrap());
        let cf = cf(&dir);

        let mut worker = FlushWorker::start(wal.clone()).unwrap();
        for round in 0..3u32 {
            let mut snapshot = SkipList::new(12, 0.24);
            snapshot.put(
                format!("round{}", round).into_bytes(),
                b"v".to_vec(),
                TTL_NONE,
            );
            worker.enqueue(FlushJob {
                cf: cf.clone(),
                snapshot,
                checkpoint: 0,
                done: None,
            });
        }
        worker.shutdown();

        assert_eq!(cf.sstables.read().unwrap().len(), 3);
    }

    #[test]
    fn test_empty_snapshot_is_noop() {
        let dir = TempDir::new().unwrap();
        let wal = Arc::new(Wal::open(dir.path(), false).unwrap());
        wal.append(&Operation::put(
            "cf1",
            KeyValue::new(b"k".to_vec(), b"v".to_vec(), TTL_NONE),
        ))
        .unwrap();
        let cf = cf(&dir);

        let mut worker = FlushWorker::start(wal.clone()).unwrap();
        worker.enqueue(FlushJob {
            cf: cf.clone(),
            snapshot: SkipList::new(12, 0.24),
            checkpoint: wal.checkpoint(),
            done: None,
        });
        worker.shutdown();

        assert!(cf.sstables.read().unwrap().is_empty());
        // nothing was flushed, so the record must still be in the log
        assert_eq!(wal.operations().unwrap().len(), 1);
    }
}
