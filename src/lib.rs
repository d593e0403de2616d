//! An embedded, persistent key-value storage engine built on a
//! log-structured merge-tree.
//!
//! A [`Database`] manages one or more column families, each an independent
//! keyspace with its own skiplist memtable, bloom-filtered sstables and
//! flush threshold. Writes go to the write-ahead log first, then the
//! memtable; once the memtable crosses the column family's threshold it is
//! snapshotted and handed to a background worker that turns it into an
//! sstable and truncates the log. Reads consult the memtable, then the
//! sstables from newest to oldest.
//!
//! ```no_run
//! use coraldb::{Database, DbConfig};
//!
//! let db = Database::open(DbConfig::new("/tmp/coraldb")).unwrap();
//! db.create_column_family("default", 1 << 20, 12, 0.24, false).unwrap();
//! db.put("default", b"hello", b"world", -1).unwrap();
//! assert_eq!(db.get("default", b"hello").unwrap(), b"world");
//! ```

pub mod bloom;
pub mod codec;
mod column_family;
mod compact;
mod config;
mod cursor;
mod db;
mod error;
mod flush;
pub mod kv;
pub mod memtable;
pub mod pager;
pub mod skiplist;
mod sstable;
mod txn;
mod wal;

pub type Result<T> = std::result::Result<T, error::Error>;

pub use column_family::ColumnFamilyConfig;
pub use config::DbConfig;
pub use cursor::Cursor;
pub use db::Database;
pub use error::Error;
pub use kv::KeyValue;
pub use txn::Transaction;
