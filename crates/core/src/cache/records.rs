//! Persisted records.
//!
//! Each row stores a whole [`Record`] as JSON. Field writes are applied with a
//! read-modify-write inside one transaction.

use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::connection::CacheDb;
use crate::Error;
use crate::record::{DataId, FieldValue, Record, RecordMap};

fn read_data(conn: &rusqlite::Connection, id: &str) -> Result<Option<Option<String>>, Error> {
    let result = conn.query_row("SELECT data FROM records WHERE id = ?1", params![id], |row| row.get(0));
    match result {
        Ok(data) => Ok(Some(data)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_data(conn: &rusqlite::Connection, id: &str, data: Option<&str>) -> Result<(), Error> {
    conn.execute(
        "INSERT INTO records (id, data, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        params![id, data, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

impl CacheDb {
    /// Store a whole record, or mark it deleted when `record` is `None`.
    pub async fn put_record(&self, id: &DataId, record: Option<&Record>) -> Result<(), Error> {
        let id = id.to_string();
        let data = record.map(serde_json::to_string).transpose()?;
        self.conn
            .call(move |conn| write_data(conn, &id, data.as_deref()))
            .await
            .map_err(Error::from)
    }

    /// Set one field of a stored record; `None` removes the field.
    ///
    /// A record that is missing or marked deleted is recreated holding only
    /// this field.
    pub async fn put_field(&self, id: &DataId, field: &str, value: Option<&FieldValue>) -> Result<(), Error> {
        let id = id.clone();
        let field = field.to_string();
        let value = value.cloned();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                let mut record = match read_data(&tx, id.as_str())?.flatten() {
                    Some(data) => serde_json::from_str::<Record>(&data)?,
                    None => Record::new(id.clone()),
                };
                match value {
                    Some(value) => {
                        record.fields.insert(field, value);
                    }
                    None => {
                        record.fields.remove(&field);
                    }
                }
                let data = serde_json::to_string(&record)?;
                write_data(&tx, id.as_str(), Some(&data))?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Fetch one stored record: `None` if never stored, `Some(None)` if deleted.
    pub async fn get_record(&self, id: &DataId) -> Result<Option<Option<Record>>, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<Option<Record>>, Error> {
                match read_data(conn, &id)? {
                    Some(Some(data)) => Ok(Some(Some(serde_json::from_str(&data)?))),
                    Some(None) => Ok(Some(None)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Load every stored record.
    pub async fn load_records(&self) -> Result<RecordMap, Error> {
        self.conn
            .call(|conn| -> Result<RecordMap, Error> {
                let mut stmt = conn.prepare("SELECT id, data FROM records")?;
                let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)))?;

                let mut records = RecordMap::new();
                for row in rows {
                    let (id, data) = row?;
                    let record = data.map(|data| serde_json::from_str::<Record>(&data)).transpose()?;
                    records.insert(DataId::new(id), record);
                }
                Ok(records)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(id: &str, name: &str) -> Record {
        let mut record = Record::new(DataId::from(id));
        record.fields.insert("id".into(), FieldValue::Scalar(json!(id)));
        record.fields.insert("name".into(), FieldValue::Scalar(json!(name)));
        record
    }

    #[tokio::test]
    async fn test_put_and_get_record() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let id = DataId::from("1055790163");
        db.put_record(&id, Some(&record("1055790163", "Yuzhi"))).await.unwrap();

        let stored = db.get_record(&id).await.unwrap().unwrap().unwrap();
        assert_eq!(stored, record("1055790163", "Yuzhi"));
        assert!(db.get_record(&DataId::from("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deleted_record_is_stored_as_null() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let id = DataId::from("1");
        db.put_record(&id, Some(&record("1", "Joe"))).await.unwrap();
        db.put_record(&id, None).await.unwrap();

        assert_eq!(db.get_record(&id).await.unwrap(), Some(None));
        let records = db.load_records().await.unwrap();
        assert_eq!(records.get(&id), Some(&None));
    }

    #[tokio::test]
    async fn test_put_field_updates_and_removes() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let id = DataId::from("1");
        db.put_record(&id, Some(&record("1", "Joe"))).await.unwrap();
        db.put_field(&id, "name", Some(&FieldValue::Scalar(json!("Joseph")))).await.unwrap();
        db.put_field(&id, "friend", Some(&FieldValue::Link(DataId::from("2")))).await.unwrap();
        db.put_field(&id, "id", None).await.unwrap();

        let stored = db.get_record(&id).await.unwrap().unwrap().unwrap();
        assert_eq!(stored.fields.get("name"), Some(&FieldValue::Scalar(json!("Joseph"))));
        assert_eq!(stored.fields.get("friend"), Some(&FieldValue::Link(DataId::from("2"))));
        assert!(!stored.fields.contains_key("id"));
    }

    #[tokio::test]
    async fn test_put_field_recreates_deleted_record() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let id = DataId::from("1");
        db.put_record(&id, None).await.unwrap();
        db.put_field(&id, "name", Some(&FieldValue::Scalar(json!("Joe")))).await.unwrap();

        let stored = db.get_record(&id).await.unwrap().unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.fields.len(), 1);
    }
}
