//! Key-value persistence boundary.
//!
//! The pipeline only needs "load previously persisted value or default",
//! "write it back", and durable writes before the call returns. The default
//! implementation keeps one JSON document per key inside the app data dir.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;
    async fn set_raw(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Load a typed value, falling back when the key is missing or empty.
pub async fn load_or<T, F>(store: &dyn KvStore, key: &str, fallback: F) -> Result<T>
where
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    match store.get_raw(key).await? {
        Some(raw) if !raw.trim().is_empty() => {
            serde_json::from_str(&raw).with_context(|| format!("corrupt entry for key {}", key))
        }
        _ => Ok(fallback()),
    }
}

/// Serialize and durably persist a typed value.
pub async fn save<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set_raw(key, &raw).await
}

/// One JSON document per key inside a data directory.
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating store dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn in_data_dir() -> Result<Self> {
        let dir = directories::ProjectDirs::from("com.local", "QuickAsk", "QuickAsk")
            .map(|p| p.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./data"));
        Self::new(dir)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are simple identifiers ("actions", "models", "history").
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let mut file = tokio::fs::File::create(&path)
            .await
            .with_context(|| format!("creating {}", path.display()))?;
        file.write_all(value.as_bytes()).await?;
        // Durable before the caller continues.
        file.sync_all().await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
