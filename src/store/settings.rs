// src/store/settings.rs
use super::error::Result;
use super::SqliteStore;
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use serde_json::{Map, Value};

/// Stored text is JSON when it parses, otherwise a plain string.
pub fn decode_value(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

pub fn encode_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn all_settings(&self) -> Result<Map<String, Value>>;

    async fn get_setting(&self, key: &str) -> Result<Option<Value>>;

    /// Upserts every entry in one transaction.
    async fn put_settings(&self, settings: Map<String, Value>) -> Result<()>;
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn all_settings(&self) -> Result<Map<String, Value>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(rows
                .into_iter()
                .map(|(key, value)| (key, decode_value(value)))
                .collect())
        })
        .await
    }

    async fn get_setting(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_owned();
        self.with_conn(move |conn| {
            let value: Option<String> = conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value.map(decode_value))
        })
        .await
    }

    async fn put_settings(&self, settings: Map<String, Value>) -> Result<()> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut upsert = tx.prepare(
                    "INSERT INTO settings (key, value, updated_at)
                     VALUES (?1, ?2, datetime('now'))
                     ON CONFLICT(key) DO UPDATE SET
                         value = excluded.value,
                         updated_at = datetime('now')",
                )?;
                for (key, value) in &settings {
                    upsert.execute(params![key, encode_value(value)])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_encoding() {
        assert_eq!(encode_value(&json!("Berlin")), "Berlin");
        assert_eq!(encode_value(&json!(true)), "true");
        assert_eq!(encode_value(&json!(30000)), "30000");
        assert_eq!(encode_value(&json!(null)), "null");
        assert_eq!(encode_value(&json!({"a": [1, 2]})), r#"{"a":[1,2]}"#);

        assert_eq!(decode_value("false".to_string()), json!(false));
        assert_eq!(decode_value("52.52".to_string()), json!(52.52));
        assert_eq!(decode_value("".to_string()), json!(""));
        assert_eq!(decode_value("fahrenheit".to_string()), json!("fahrenheit"));
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = SqliteStore::open_memory().unwrap();

        let mut update = Map::new();
        update.insert("weatherWidgetEnabled".to_string(), json!(true));
        update.insert("weatherLocation".to_string(), json!("Oslo"));
        update.insert("layout".to_string(), json!({"columns": 4}));
        store.put_settings(update).await.unwrap();

        assert_eq!(
            store.get_setting("weatherWidgetEnabled").await.unwrap(),
            Some(json!(true))
        );
        assert_eq!(store.get_setting("weatherLocation").await.unwrap(), Some(json!("Oslo")));
        assert_eq!(
            store.get_setting("layout").await.unwrap(),
            Some(json!({"columns": 4}))
        );
        assert_eq!(store.get_setting("missing").await.unwrap(), None);

        let all = store.all_settings().await.unwrap();
        assert_eq!(all["timeWidgetEnabled"], json!(false));
        assert_eq!(all["layout"]["columns"], json!(4));
    }
}
