use std::path::PathBuf;

use bytes::Bytes;
use eyre::{Context, Result};

use super::{KVReader, KVStore};

/// Durable one-file-per-record store. Keys are `table/item` paths relative
/// to the base directory.
///
/// Writes are atomic per record (write to a temp file, then rename) but not
/// across records; multi-record batches get their atomicity from the block
/// store's write lock, not from this layer.
#[derive(Clone)]
pub struct FileStorage {
    base_dir: PathBuf,
}

impl FileStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.base_dir.clone();
        for part in key.split('/') {
            path.push(part);
        }
        path
    }
}

impl KVReader for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data.into())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).wrap_err_with(|| format!("failed to read {}", path.display())),
        }
    }
}

impl KVStore for FileStorage {
    async fn put(&self, key: impl AsRef<str>, data: Vec<u8>) -> Result<()> {
        let path = self.path_for(key.as_ref());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .wrap_err_with(|| format!("failed to create {}", parent.display()))?;
        }

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &data)
            .await
            .wrap_err_with(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .wrap_err_with(|| format!("failed to rename into {}", path.display()))?;
        Ok(())
    }

    async fn delete(&self, key: impl AsRef<str>) -> Result<()> {
        let path = self.path_for(key.as_ref());
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).wrap_err_with(|| format!("failed to delete {}", path.display())),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let (dir, item_prefix) = match prefix.rsplit_once('/') {
            Some((dir, item)) => (self.base_dir.join(dir), item.to_owned()),
            None => (self.base_dir.clone(), prefix.to_owned()),
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).wrap_err_with(|| format!("failed to list {}", dir.display())),
        };

        let table = prefix.rsplit_once('/').map(|(dir, _)| dir);
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !entry.file_type().await?.is_file() || !name.starts_with(&item_prefix) {
                continue;
            }
            keys.push(match table {
                Some(table) => format!("{table}/{name}"),
                None => name.to_owned(),
            });
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_and_delete() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = FileStorage::new(dir.path());

        storage.put("block/aa", b"data".to_vec()).await?;
        assert_eq!(storage.get("block/aa").await?.unwrap(), Bytes::from_static(b"data"));

        // overwrite
        storage.put("block/aa", b"data2".to_vec()).await?;
        assert_eq!(storage.get("block/aa").await?.unwrap(), Bytes::from_static(b"data2"));

        storage.delete("block/aa").await?;
        assert_eq!(storage.get("block/aa").await?, None);
        // deleting a missing key is fine
        storage.delete("block/aa").await?;

        Ok(())
    }

    #[tokio::test]
    async fn scan_prefix_lists_table_entries() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = FileStorage::new(dir.path());

        storage.put("num/000000000001", b"a".to_vec()).await?;
        storage.put("num/000000000002", b"b".to_vec()).await?;
        storage.put("td/000000000001", b"c".to_vec()).await?;

        let mut keys = storage.scan_prefix("num/").await?;
        keys.sort();
        assert_eq!(
            keys,
            vec!["num/000000000001".to_string(), "num/000000000002".to_string()]
        );
        assert!(storage.scan_prefix("missing/").await?.is_empty());

        Ok(())
    }
}
