use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use eyre::Result;
use tokio::sync::Mutex;

use super::{KVReader, KVStore};

/// Ephemeral store for tests and short-lived chains. `should_fail` lets
/// tests simulate a broken backend.
#[derive(Clone)]
pub struct MemoryStorage {
    pub db: Arc<Mutex<HashMap<String, Bytes>>>,
    pub should_fail: Arc<AtomicBool>,
    pub name: String,
}

impl MemoryStorage {
    pub fn new(name: impl Into<String>) -> MemoryStorage {
        MemoryStorage {
            db: Arc::new(Mutex::new(HashMap::default())),
            should_fail: Arc::new(AtomicBool::new(false)),
            name: name.into(),
        }
    }

    fn check_failure(&self) -> Result<()> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(eyre::eyre!("MemoryStorage simulated failure"));
        }
        Ok(())
    }
}

impl KVReader for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.check_failure()?;
        Ok(self.db.lock().await.get(key).map(ToOwned::to_owned))
    }
}

impl KVStore for MemoryStorage {
    async fn put(&self, key: impl AsRef<str>, data: Vec<u8>) -> Result<()> {
        self.check_failure()?;
        self.db
            .lock()
            .await
            .insert(key.as_ref().to_owned(), data.into());
        Ok(())
    }

    async fn delete(&self, key: impl AsRef<str>) -> Result<()> {
        self.check_failure()?;
        self.db.lock().await.remove(key.as_ref());
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.check_failure()?;
        Ok(self
            .db
            .lock()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
