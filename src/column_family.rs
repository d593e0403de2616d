//! Column families: independent keyspaces with their own config, memtable
//! and sstable list. Each lives in `<db>/<name>/` with the serialized
//! config at `<name>.cfc`; the catalog is rebuilt at open by scanning the
//! database directory.

use crate::codec::{deserialize_cf_config, serialize_cf_config};
use crate::error::Error;
use crate::kv::unix_now;
use crate::memtable::Memtable;
use crate::sstable::{load_sstables, SSTable, SSTABLE_EXT};
use crate::Result;
use log::info;
use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

pub const CF_CONFIG_EXT: &str = "cfc";

pub const MIN_NAME_LEN: usize = 2;
pub const MIN_FLUSH_THRESHOLD: i32 = 1 << 20;
pub const MIN_MAX_LEVEL: i32 = 5;
pub const MIN_PROBABILITY: f32 = 0.1;

/// Immutable per-keyspace configuration, persisted at create time.
#[derive(Debug, Clone)]
pub struct ColumnFamilyConfig {
    pub name: String,
    /// Memtable byte size that triggers a background flush.
    pub flush_threshold: i32,
    /// Skiplist height for this keyspace's memtables.
    pub max_level: i32,
    /// Skiplist level-promotion probability.
    pub probability: f32,
    /// Compress sstable and bloom filter pages with snappy.
    pub compressed: bool,
}

impl ColumnFamilyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.len() < MIN_NAME_LEN {
            return Err(Error::NameTooShort);
        }
        if self.flush_threshold < MIN_FLUSH_THRESHOLD {
            return Err(Error::ThresholdTooLow);
        }
        if self.max_level < MIN_MAX_LEVEL {
            return Err(Error::LevelTooLow);
        }
        if self.probability < MIN_PROBABILITY {
            return Err(Error::ProbabilityTooLow);
        }
        Ok(())
    }
}

/// Monotonic id source for sstable file names, seeded with the epoch so
/// ids stay unique across restarts.
pub struct IdGenerator(AtomicU64);

impl IdGenerator {
    pub fn new() -> IdGenerator {
        IdGenerator(AtomicU64::new(unix_now() as u64))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

pub struct ColumnFamily {
    pub config: ColumnFamilyConfig,
    path: PathBuf,
    pub memtable: Memtable,
    /// Oldest first; the last element is the newest table.
    pub sstables: RwLock<Vec<Arc<SSTable>>>,
    id_gen: IdGenerator,
}

impl ColumnFamily {
    /// Create the directory, persist the config and build the runtime
    /// state. The config must already be validated.
    pub fn create(db_path: &Path, config: ColumnFamilyConfig) -> Result<ColumnFamily> {
        let path = db_path.join(&config.name);
        if !path.exists() {
            fs::DirBuilder::new().mode(0o777).create(&path)?;
        }
        let config_path = path.join(format!("{}.{}", config.name, CF_CONFIG_EXT));
        fs::write(&config_path, serialize_cf_config(&config)?)?;

        Ok(Self::build(config, path, Vec::new()))
    }

    /// Rebuild a column family from its directory: deserialize the `.cfc`
    /// config, then open and mtime-sort its sstables.
    pub fn load(cf_dir: &Path) -> Result<Option<ColumnFamily>> {
        let name = match cf_dir.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => return Ok(None),
        };
        let config_path = cf_dir.join(format!("{}.{}", name, CF_CONFIG_EXT));
        if !config_path.is_file() {
            return Ok(None);
        }
        let config = deserialize_cf_config(&fs::read(&config_path)?)?;
        let sstables = load_sstables(cf_dir)?;
        info!(
            "loaded column family `{}` with {} sstable(s)",
            config.name,
            sstables.len()
        );
        Ok(Some(Self::build(config, cf_dir.to_path_buf(), sstables)))
    }

    fn build(config: ColumnFamilyConfig, path: PathBuf, sstables: Vec<SSTable>) -> ColumnFamily {
        let memtable = Memtable::new(config.max_level as usize, config.probability as f64);
        ColumnFamily {
            config,
            path,
            memtable,
            sstables: RwLock::new(sstables.into_iter().map(Arc::new).collect()),
            id_gen: IdGenerator::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn next_sstable_path(&self) -> PathBuf {
        self.path
            .join(format!("sstable_{}.{}", self.id_gen.next(), SSTABLE_EXT))
    }

    /// Newest-first snapshot of the sstable list for the read path.
    pub fn sstables_newest_first(&self) -> Vec<Arc<SSTable>> {
        let guard = self.sstables.read().unwrap();
        guard.iter().rev().cloned().collect()
    }

    /// Remove everything on disk. Open sstable handles stay readable
    /// until their owners drop them.
    pub fn remove_dir(&self) -> Result<()> {
        fs::remove_dir_all(&self.path)?;
        Ok(())
    }
}

/// Scan the database directory and rebuild every column family found.
pub fn load_column_families(db_path: &Path) -> Result<Vec<Arc<ColumnFamily>>> {
    let mut cfs = Vec::new();
    for entry in fs::read_dir(db_path)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(cf) = ColumnFamily::load(&path)? {
            cfs.push(Arc::new(cf));
        }
    }
    Ok(cfs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::TTL_NONE;
    use crate::skiplist::SkipList;
    use tempfile::TempDir;

    fn config(name: &str) -> ColumnFamilyConfig {
        ColumnFamilyConfig {
            name: name.to_string(),
            flush_threshold: 1 << 20,
            max_level: 12,
            probability: 0.24,
            compressed: false,
        }
    }

    #[test]
    fn test_validation() {
        assert!(config("cf1").validate().is_ok());

        let mut c = config("c");
        assert!(matches!(c.validate(), Err(Error::NameTooShort)));
        c = config("cf1");
        c.flush_threshold = 1024;
        assert!(matches!(c.validate(), Err(Error::ThresholdTooLow)));
        c = config("cf1");
        c.max_level = 3;
        assert!(matches!(c.validate(), Err(Error::LevelTooLow)));
        c = config("cf1");
        c.probability = 0.01;
        assert!(matches!(c.validate(), Err(Error::ProbabilityTooLow)));
    }

    #[test]
    fn test_create_then_load() {
        let dir = TempDir::new().unwrap();
        let cf = ColumnFamily::create(dir.path(), config("users")).unwrap();
        assert!(dir.path().join("users/users.cfc").is_file());
        cf.memtable.put(b"k".to_vec(), b"v".to_vec(), TTL_NONE);

        let loaded = ColumnFamily::load(&dir.path().join("users"))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.config.name, "users");
        assert_eq!(loaded.config.flush_threshold, 1 << 20);
        assert_eq!(loaded.config.max_level, 12);
        assert!(loaded.memtable.is_empty());
    }

    #[test]
    fn test_load_skips_plain_dirs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("not_a_cf")).unwrap();
        assert!(ColumnFamily::load(&dir.path().join("not_a_cf"))
            .unwrap()
            .is_none());
        assert!(load_column_families(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_load_picks_up_sstables() {
        let dir = TempDir::new().unwrap();
        let cf = ColumnFamily::create(dir.path(), config("users")).unwrap();

        let mut sl = SkipList::new(12, 0.25);
        sl.put(b"k".to_vec(), b"v".to_vec(), TTL_NONE);
        SSTable::write(&cf.next_sstable_path(), &sl, false, 0)
            .unwrap()
            .unwrap();

        let loaded = ColumnFamily::load(&dir.path().join("users"))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.sstables.read().unwrap().len(), 1);
    }

    #[test]
    fn test_id_generator_is_monotonic() {
        let id_gen = IdGenerator::new();
        let a = id_gen.next();
        let b = id_gen.next();
        let c = id_gen.next();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_sstable_paths_are_unique() {
        let dir = TempDir::new().unwrap();
        let cf = ColumnFamily::create(dir.path(), config("users")).unwrap();
        let p1 = cf.next_sstable_path();
        let p2 = cf.next_sstable_path();
        assert_ne!(p1, p2);
        assert!(p1.to_str().unwrap().ends_with(".sst"));
    }
}
