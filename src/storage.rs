use crate::error::Result;
use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const MAP_SIZE: usize = 1024 * 1024 * 1024; // 1GB

/// Durable key/value storage for the textual model record.
pub trait ModelStorage {
    /// `None` when nothing was ever stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&mut self, key: &str, value: &str) -> Result<()>;
    /// Returns whether a value was removed.
    fn remove(&mut self, key: &str) -> Result<bool>;
}

pub struct LmdbStorage {
    env: Env,
    db: Database<Str, Str>,
    path: PathBuf,
}

impl LmdbStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        debug!(path = %path.display(), "opening LMDB environment");
        let env = unsafe { EnvOpenOptions::new().map_size(MAP_SIZE).max_dbs(1).open(&path)? };

        let mut wtxn = env.write_txn()?;
        let db: Database<Str, Str> = env.create_database(&mut wtxn, None)?;
        wtxn.commit()?;

        Ok(Self { env, db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModelStorage for LmdbStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db.get(&rtxn, key)?.map(str::to_owned))
    }

    fn put(&mut self, key: &str, value: &str) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.db.put(&mut wtxn, key, value)?;
        wtxn.commit()?;
        debug!(key, bytes = value.len(), "model record written");
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool> {
        let mut wtxn = self.env.write_txn()?;
        let removed = self.db.delete(&mut wtxn, key)?;
        wtxn.commit()?;
        Ok(removed)
    }
}

/// Volatile storage; counts writes so callers can assert none happened.
#[derive(Default, Debug, Clone)]
pub struct MemoryStorage {
    records: HashMap<String, String>,
    writes: usize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl ModelStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.records.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &str) -> Result<()> {
        self.writes += 1;
        self.records.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool> {
        Ok(self.records.remove(key).is_some())
    }
}
