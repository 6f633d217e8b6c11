//! Write-behind persistence for the base layer.
//!
//! Store writes must not block on disk, so [`CacheManager`] writes are
//! fire-and-forget: [`DiskCache`] queues them on a channel that a background
//! task drains in order.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::connection::CacheDb;
use crate::Error;
use crate::record::{DataId, FieldValue, Record, RecordMap, RootCallKey, RootCallMap};

/// Everything a persistent cache holds.
#[derive(Debug, Clone, Default)]
pub struct CachedData {
    pub records: RecordMap,
    pub root_calls: RootCallMap,
}

/// Receives every base-layer write and can replay what it stored.
#[async_trait]
pub trait CacheManager: Send + Sync + std::fmt::Debug {
    /// Persist a whole record; `None` marks it deleted.
    fn cache_node(&self, id: &DataId, record: Option<&Record>);

    /// Persist one field; `None` removes it.
    fn cache_field(&self, id: &DataId, field: &str, value: Option<&FieldValue>);

    fn cache_root_call(&self, key: &RootCallKey, id: &DataId);

    /// Read back everything that was persisted.
    async fn read_all_data(&self) -> Result<CachedData, Error>;
}

#[derive(Debug)]
enum CacheWrite {
    Node { id: DataId, record: Option<Record> },
    Field { id: DataId, field: String, value: Option<FieldValue> },
    RootCall { key: RootCallKey, id: DataId },
    Flush(oneshot::Sender<()>),
}

/// SQLite-backed [`CacheManager`].
#[derive(Debug, Clone)]
pub struct DiskCache {
    db: CacheDb,
    writes: mpsc::UnboundedSender<CacheWrite>,
}

impl DiskCache {
    /// Open the cache at `path`. Must be called within a tokio runtime.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self::with_db(CacheDb::open(path).await?))
    }

    pub async fn open_in_memory() -> Result<Self, Error> {
        Ok(Self::with_db(CacheDb::open_in_memory().await?))
    }

    fn with_db(db: CacheDb) -> Self {
        let (writes, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain_writes(db.clone(), rx));
        Self { db, writes }
    }

    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    /// Wait until every write queued so far has reached the database.
    pub async fn flush(&self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.writes
            .send(CacheWrite::Flush(tx))
            .map_err(|_| Error::Database(tokio_rusqlite::Error::ConnectionClosed))?;
        rx.await
            .map_err(|_| Error::Database(tokio_rusqlite::Error::ConnectionClosed))
    }

    fn enqueue(&self, write: CacheWrite) {
        if self.writes.send(write).is_err() {
            tracing::warn!("record cache writer has stopped; dropping write");
        }
    }
}

async fn drain_writes(db: CacheDb, mut rx: mpsc::UnboundedReceiver<CacheWrite>) {
    while let Some(write) = rx.recv().await {
        let result = match write {
            CacheWrite::Node { id, record } => db.put_record(&id, record.as_ref()).await,
            CacheWrite::Field { id, field, value } => db.put_field(&id, &field, value.as_ref()).await,
            CacheWrite::RootCall { key, id } => db.put_root_call(&key, &id).await,
            CacheWrite::Flush(done) => {
                let _ = done.send(());
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to persist cache write");
        }
    }
    tracing::debug!("record cache writer stopped");
}

#[async_trait]
impl CacheManager for DiskCache {
    fn cache_node(&self, id: &DataId, record: Option<&Record>) {
        self.enqueue(CacheWrite::Node { id: id.clone(), record: record.cloned() });
    }

    fn cache_field(&self, id: &DataId, field: &str, value: Option<&FieldValue>) {
        self.enqueue(CacheWrite::Field { id: id.clone(), field: field.to_string(), value: value.cloned() });
    }

    fn cache_root_call(&self, key: &RootCallKey, id: &DataId) {
        self.enqueue(CacheWrite::RootCall { key: key.clone(), id: id.clone() });
    }

    async fn read_all_data(&self) -> Result<CachedData, Error> {
        self.flush().await?;
        let records = self.db.load_records().await?;
        let root_calls = self.db.load_root_calls().await?;
        tracing::debug!(records = records.len(), root_calls = root_calls.len(), "read record cache");
        Ok(CachedData { records, root_calls })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_writes_are_applied_in_order() {
        let cache = DiskCache::open_in_memory().await.unwrap();
        let id = DataId::from("1");
        let mut record = Record::new(id.clone());
        record.fields.insert("name".into(), FieldValue::Scalar(json!("Joe")));

        cache.cache_node(&id, Some(&record));
        cache.cache_field(&id, "name", Some(&FieldValue::Scalar(json!("Joseph"))));
        cache.cache_root_call(&RootCallKey::new("username", Some("joe")), &id);

        let data = cache.read_all_data().await.unwrap();
        let stored = data.records.get(&id).cloned().flatten().unwrap();
        assert_eq!(stored.fields.get("name"), Some(&FieldValue::Scalar(json!("Joseph"))));
        assert_eq!(data.root_calls.get(&RootCallKey::new("username", Some("joe"))), Some(&id));
    }

    #[tokio::test]
    async fn test_delete_after_write() {
        let cache = DiskCache::open_in_memory().await.unwrap();
        let id = DataId::from("1");
        cache.cache_node(&id, Some(&Record::new(id.clone())));
        cache.cache_node(&id, None);
        cache.flush().await.unwrap();

        let data = cache.read_all_data().await.unwrap();
        assert_eq!(data.records.get(&id), Some(&None));
    }
}
