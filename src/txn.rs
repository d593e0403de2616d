//! Single-column-family transactions: an ordered buffer of operations
//! applied to the memtable in one critical section at commit, each with a
//! rollback record so a committed batch can be undone. Transactions do not
//! span column families and do not touch the write-ahead log.

use crate::db::Database;
use crate::kv::{tombstone_value, KeyValue, OpCode, Operation, TTL_NONE};
use crate::Result;

enum RollbackOp {
    /// Undo by removing the key's memtable node.
    Remove(Vec<u8>),
    /// Undo by restoring the exact prior memtable entry.
    Restore(KeyValue),
}

struct TxnOp {
    op: Operation,
    rollback: Option<RollbackOp>,
    committed: bool,
}

pub struct Transaction {
    column_family: String,
    ops: Vec<TxnOp>,
}

impl Transaction {
    pub fn begin(column_family: &str) -> Transaction {
        Transaction {
            column_family: column_family.to_string(),
            ops: Vec::new(),
        }
    }

    pub fn column_family(&self) -> &str {
        &self.column_family
    }

    pub fn put(&mut self, key: &[u8], value: &[u8], ttl: i64) {
        self.ops.push(TxnOp {
            op: Operation::put(
                &self.column_family,
                KeyValue::new(key.to_vec(), value.to_vec(), ttl),
            ),
            rollback: Some(RollbackOp::Remove(key.to_vec())),
            committed: false,
        });
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.ops.push(TxnOp {
            op: Operation::delete(&self.column_family, key.to_vec()),
            // resolved at commit, once the prior memtable state is known
            rollback: None,
            committed: false,
        });
    }

    /// Apply every uncommitted op to the column family's memtable under
    /// one write guard. Deletes record the memtable entry they replace so
    /// rollback can restore it exactly.
    pub fn commit(&mut self, db: &Database) -> Result<()> {
        let cf = db.column_family(&self.column_family)?;
        {
            let mut memtable = cf.memtable.lock_write();
            for txn_op in self.ops.iter_mut() {
                if txn_op.committed {
                    continue;
                }
                let kv = &txn_op.op.kv;
                match txn_op.op.op_code {
                    OpCode::Put => {
                        memtable.put(kv.key.clone(), kv.value.clone(), kv.ttl);
                    }
                    OpCode::Delete => {
                        txn_op.rollback = Some(match memtable.get(&kv.key) {
                            Some(prior) => RollbackOp::Restore(prior),
                            None => RollbackOp::Remove(kv.key.clone()),
                        });
                        memtable.put(kv.key.clone(), tombstone_value(), TTL_NONE);
                    }
                }
                txn_op.committed = true;
            }
        }
        db.maybe_flush(&cf);
        Ok(())
    }

    /// Undo every committed op in order: puts are removed, deletes get
    /// their prior entry back (or their tombstone removed when the key
    /// only ever lived in the sstable tier). Ops revert to uncommitted.
    pub fn rollback(&mut self, db: &Database) -> Result<()> {
        let cf = db.column_family(&self.column_family)?;
        let mut memtable = cf.memtable.lock_write();
        for txn_op in self.ops.iter_mut() {
            if !txn_op.committed {
                continue;
            }
            match &txn_op.rollback {
                Some(RollbackOp::Remove(key)) => {
                    memtable.remove(key);
                }
                Some(RollbackOp::Restore(prior)) => {
                    memtable.put(prior.key.clone(), prior.value.clone(), prior.ttl);
                }
                None => {}
            }
            txn_op.committed = false;
        }
        Ok(())
    }
}
