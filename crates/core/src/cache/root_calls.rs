//! Persisted root call resolutions.

use tokio_rusqlite::params;

use super::connection::CacheDb;
use super::hash::compute_root_call_key;
use crate::Error;
use crate::record::{DataId, RootCallKey, RootCallMap};

impl CacheDb {
    /// Record that `key` resolves to `id`, replacing any earlier resolution.
    pub async fn put_root_call(&self, key: &RootCallKey, id: &DataId) -> Result<(), Error> {
        let key_hash = compute_root_call_key(&key.name, key.arg.as_deref());
        let name = key.name.clone();
        let arg = key.arg.clone();
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO root_calls (key_hash, name, arg, data_id, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(key_hash) DO UPDATE SET
                        data_id = excluded.data_id,
                        updated_at = excluded.updated_at",
                    params![key_hash, name, arg, id, chrono::Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Load every stored root call resolution.
    pub async fn load_root_calls(&self) -> Result<RootCallMap, Error> {
        self.conn
            .call(|conn| -> Result<RootCallMap, Error> {
                let mut stmt = conn.prepare("SELECT name, arg, data_id FROM root_calls")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?, row.get::<_, String>(2)?))
                })?;

                let mut root_calls = RootCallMap::new();
                for row in rows {
                    let (name, arg, id) = row?;
                    root_calls.insert(RootCallKey { name, arg }, DataId::new(id));
                }
                Ok(root_calls)
            })
            .await
            .map_err(Error::from)
    }
}
