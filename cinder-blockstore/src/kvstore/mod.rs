pub mod file;
pub mod memory;

use std::collections::HashMap;

use bytes::Bytes;
use eyre::Result;
use futures::future::try_join_all;

use self::{file::FileStorage, memory::MemoryStorage};

pub trait KVReader: Clone {
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    async fn bulk_get(&self, keys: &[String]) -> Result<HashMap<String, Bytes>> {
        let mut futs = Vec::with_capacity(keys.len());
        for key in keys {
            let reader = self.clone();
            futs.push(async move { reader.get(key).await });
        }
        let responses = try_join_all(futs).await?;

        let mut out = HashMap::with_capacity(responses.len());
        for (resp, key) in responses.into_iter().zip(keys) {
            if let Some(bytes) = resp {
                out.insert(key.clone(), bytes);
            }
        }
        Ok(out)
    }
}

pub trait KVStore: KVReader {
    async fn put(&self, key: impl AsRef<str>, data: Vec<u8>) -> Result<()>;
    async fn delete(&self, key: impl AsRef<str>) -> Result<()>;
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

#[derive(Clone)]
pub enum KVStoreErased {
    Memory(MemoryStorage),
    File(FileStorage),
}

impl From<MemoryStorage> for KVStoreErased {
    fn from(value: MemoryStorage) -> Self {
        KVStoreErased::Memory(value)
    }
}

impl From<FileStorage> for KVStoreErased {
    fn from(value: FileStorage) -> Self {
        KVStoreErased::File(value)
    }
}

impl KVReader for KVStoreErased {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        match self {
            KVStoreErased::Memory(s) => s.get(key).await,
            KVStoreErased::File(s) => s.get(key).await,
        }
    }
}

impl KVStore for KVStoreErased {
    async fn put(&self, key: impl AsRef<str>, data: Vec<u8>) -> Result<()> {
        match self {
            KVStoreErased::Memory(s) => s.put(key, data).await,
            KVStoreErased::File(s) => s.put(key, data).await,
        }
    }

    async fn delete(&self, key: impl AsRef<str>) -> Result<()> {
        match self {
            KVStoreErased::Memory(s) => s.delete(key).await,
            KVStoreErased::File(s) => s.delete(key).await,
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        match self {
            KVStoreErased::Memory(s) => s.scan_prefix(prefix).await,
            KVStoreErased::File(s) => s.scan_prefix(prefix).await,
        }
    }
}
