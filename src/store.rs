use crate::config::Config;
use crate::error::Result;
use bytes::Bytes;
use feoxdb::{FeoxError, FeoxStore};
use tracing::info;

/// Outcome of an insert-if-absent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    Created,
    Conflict,
}

/// Key-value persistence used by the chat handler
pub trait Store {
    fn contains(&self, key: &[u8]) -> bool;

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Insert or overwrite
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete `key`; an absent key is not an error
    fn remove(&self, key: &[u8]) -> Result<()>;

    /// Insert only if `key` is absent
    fn insert_unique(&self, key: &[u8], value: &[u8]) -> Result<Inserted> {
        if self.contains(key) {
            return Ok(Inserted::Conflict);
        }
        self.put(key, value)?;
        Ok(Inserted::Created)
    }
}

/// [`Store`] backed by FeOxDB
pub struct FeoxBackend {
    store: FeoxStore,
}

impl FeoxBackend {
    /// Open the store described by `config`; file-backed when `data_path`
    /// is set, memory-only otherwise.
    pub fn open(config: &Config) -> Result<Self> {
        let max_memory = config.max_memory.unwrap_or(256 * 1024 * 1024);

        let store = if let Some(ref data_path) = config.data_path {
            let mut builder = FeoxStore::builder()
                .device_path(data_path.clone())
                .max_memory(max_memory)
                .enable_ttl(false);

            if let Some(file_size) = config.file_size {
                builder = builder.file_size(file_size);
            }

            info!("Opening FeOxDB store at {}", data_path);
            builder.build()?
        } else {
            info!("Opening memory-only FeOxDB store");
            FeoxStore::builder()
                .max_memory(max_memory)
                .enable_ttl(false)
                .build()?
        };

        Ok(Self { store })
    }

    /// Memory-only store with default limits
    pub fn memory() -> Result<Self> {
        Self::open(&Config::default())
    }

    /// Release the store; pending writes are flushed on drop
    pub fn close(self) {
        drop(self.store);
        info!("FeOxDB store closed");
    }
}

impl Store for FeoxBackend {
    fn contains(&self, key: &[u8]) -> bool {
        self.store.contains_key(key)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        match self.store.get_bytes(key) {
            Ok(value) => Ok(Some(value)),
            Err(FeoxError::KeyNotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.store.insert_with_timestamp(key, value, None)?;
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        match self.store.delete(key) {
            Ok(_) | Err(FeoxError::KeyNotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
