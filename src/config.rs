use std::path::{Path, PathBuf};

/// Database-level configuration passed to [`crate::Database::open`].
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Directory holding the write-ahead log and one subdirectory per
    /// column family. Created if it does not exist.
    pub db_path: PathBuf,
    /// Compress write-ahead log records with snappy.
    pub compressed_wal: bool,
}

impl DbConfig {
    pub fn new(db_path: impl AsRef<Path>) -> DbConfig {
        DbConfig {
            db_path: db_path.as_ref().to_path_buf(),
            compressed_wal: false,
        }
    }

    pub fn compressed_wal(mut self, compressed: bool) -> DbConfig {
        self.compressed_wal = compressed;
        self
    }
}
