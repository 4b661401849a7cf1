//! Key-value store backends used by the persistence gateway.
//!
//! Items are flat string maps addressed by a table name and a composite
//! (partition, sort) key, the shape the hosted document store exposes.

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

use crate::credentials::Credential;
use crate::error::StoreError;

pub type Item = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub partition: String,
    pub sort: String,
}

impl ItemKey {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }

    fn document_key(&self) -> String {
        format!("{}|{}", self.partition, self.sort)
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(
        &self,
        credential: &Credential,
        table: &str,
        key: &ItemKey,
    ) -> Result<Option<Item>, StoreError>;

    /// Inserts or replaces the whole item.
    async fn put_item(
        &self,
        credential: &Credential,
        table: &str,
        key: &ItemKey,
        item: Item,
    ) -> Result<(), StoreError>;
}

fn check_credential(credential: &Credential) -> Result<(), StoreError> {
    if credential.is_expired() {
        return Err(StoreError::ExpiredCredential);
    }
    Ok(())
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, HashMap<ItemKey, Item>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes an item directly, bypassing credentials. Used to seed worlds
    /// and by tests.
    pub async fn insert(&self, table: &str, key: ItemKey, item: Item) {
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .insert(key, item);
    }

    pub async fn item(&self, table: &str, key: &ItemKey) -> Option<Item> {
        self.tables
            .read()
            .await
            .get(table)
            .and_then(|items| items.get(key))
            .cloned()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_item(
        &self,
        credential: &Credential,
        table: &str,
        key: &ItemKey,
    ) -> Result<Option<Item>, StoreError> {
        check_credential(credential)?;
        Ok(self.item(table, key).await)
    }

    async fn put_item(
        &self,
        credential: &Credential,
        table: &str,
        key: &ItemKey,
        item: Item,
    ) -> Result<(), StoreError> {
        check_credential(credential)?;
        self.insert(table, key.clone(), item).await;
        Ok(())
    }
}

/// On-disk layout of one table.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TableDocument {
    items: BTreeMap<String, Item>,
}

/// Keeps each table as a JSON document `<dir>/<table>.json`, so local runs
/// keep player positions across restarts. Writes go through a temporary
/// file and a rename.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        debug!("Using file store at {}", dir.display());
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn table_path(&self, table: &str) -> Result<PathBuf, StoreError> {
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !table.starts_with('.');
        if !valid {
            return Err(StoreError::Unavailable(format!(
                "invalid table name {:?}",
                table
            )));
        }
        Ok(self.dir.join(format!("{}.json", table)))
    }

    async fn load(&self, path: &Path) -> Result<TableDocument, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(TableDocument::default()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get_item(
        &self,
        credential: &Credential,
        table: &str,
        key: &ItemKey,
    ) -> Result<Option<Item>, StoreError> {
        check_credential(credential)?;
        let path = self.table_path(table)?;
        let mut document = self.load(&path).await?;
        Ok(document.items.remove(&key.document_key()))
    }

    async fn put_item(
        &self,
        credential: &Credential,
        table: &str,
        key: &ItemKey,
        item: Item,
    ) -> Result<(), StoreError> {
        check_credential(credential)?;
        let path = self.table_path(table)?;

        let _guard = self.write_lock.lock().await;
        let mut document = self.load(&path).await?;
        document.items.insert(key.document_key(), item);

        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, serde_json::to_vec_pretty(&document)?).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }
}
