//! Fjall-based storage backend implementation.
//!
//! Uses fjall (an LSM-tree based embedded database) for local persistence.
//! Only suitable when a single bridge replica owns the data directory.

use std::path::Path;

use async_trait::async_trait;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};

use super::error::Result;
use super::KeyValueStore;

/// Fjall-based key-value store
pub struct FjallStore {
    keyspace: Keyspace,
    state: PartitionHandle,
}

impl FjallStore {
    /// Open a fjall store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let keyspace = Config::new(path).open()?;
        let state = keyspace.open_partition("state", PartitionCreateOptions::default())?;

        Ok(Self { keyspace, state })
    }
}

#[async_trait]
impl KeyValueStore for FjallStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.state.get(key)?.map(|bytes| bytes.to_vec()))
    }

    async fn save(&self, key: &str, value: &[u8]) -> Result<()> {
        self.state.insert(key, value)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.state.remove(key)?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}
