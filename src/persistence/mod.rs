//! SQLite persistence for strategy instance settings.
//!
//! Only the settings of running instances are stored, sealed with
//! AES-256-GCM, so a restarted server can resume them. Run state is never
//! persisted: resumed instances reconcile against live positions instead.

mod crypto;

pub use crypto::ConfigCipher;

use crate::config::StrategyConfig;
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Stored settings of one instance.
#[derive(Debug, Clone)]
pub struct StoredState {
    pub id: String,
    pub user_id: String,
    pub config: StrategyConfig,
}

/// SQLite-backed store of sealed instance settings.
pub struct StateStore {
    conn: Connection,
    cipher: ConfigCipher,
}

impl StateStore {
    /// Open (or create) the store at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P, secret: &str) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
        }

        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let store = Self {
            conn,
            cipher: ConfigCipher::new(secret)?,
        };
        store.init_schema()?;

        info!("State store initialized at {:?}", db_path.as_ref());
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS states (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                value TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_states_user ON states(user_id);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Seal and insert settings under a fresh id.
    pub fn create_state(&self, user_id: &str, config: &StrategyConfig) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.insert_state(&id, user_id, config)?;
        Ok(id)
    }

    fn insert_state(&self, id: &str, user_id: &str, config: &StrategyConfig) -> Result<()> {
        let json = serde_json::to_string(config).context("Failed to encode settings")?;
        let sealed = self.cipher.encrypt(&json)?;

        self.conn
            .execute(
                "INSERT INTO states (id, user_id, value) VALUES (?1, ?2, ?3)",
                params![id, user_id, sealed],
            )
            .with_context(|| format!("Failed to store state {}", id))?;

        debug!(%id, %user_id, symbol = %config.symbol, "State stored");
        Ok(())
    }

    /// Every stored state. Rows that fail to open are skipped.
    pub fn states(&self) -> Result<Vec<StoredState>> {
        self.query("SELECT id, user_id, value FROM states ORDER BY rowid", [])
    }

    pub fn user_states(&self, user_id: &str) -> Result<Vec<StoredState>> {
        self.query(
            "SELECT id, user_id, value FROM states WHERE user_id = ?1 ORDER BY rowid",
            [user_id],
        )
    }

    /// Delete by id regardless of owner.
    pub fn drop_state(&self, id: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM states WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    pub fn drop_user_state(&self, user_id: &str, id: &str) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM states WHERE user_id = ?1 AND id = ?2",
            params![user_id, id],
        )?;
        Ok(deleted > 0)
    }

    pub fn drop_user_states(&self, user_id: &str) -> Result<usize> {
        let deleted = self
            .conn
            .execute("DELETE FROM states WHERE user_id = ?1", params![user_id])?;
        Ok(deleted)
    }

    fn query<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<StoredState>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut states = Vec::new();
        for row in rows {
            let (id, user_id, sealed) = row?;
            match self.open(&sealed) {
                Ok(config) => states.push(StoredState {
                    id,
                    user_id,
                    config,
                }),
                Err(e) => warn!(%id, "Skipping unreadable state: {:#}", e),
            }
        }
        Ok(states)
    }

    fn open(&self, sealed: &str) -> Result<StrategyConfig> {
        let json = self.cipher.decrypt(sealed)?;
        serde_json::from_str(&json).context("Failed to parse stored settings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config(symbol: &str) -> StrategyConfig {
        let mut config = StrategyConfig::new(symbol, dec!(0.01), dec!(0.1));
        config.api_key = "key".to_string();
        config.api_secret = "secret".to_string();
        config
    }

    #[test]
    fn test_create_and_list_states() {
        let store = StateStore::new(":memory:", "pass").unwrap();
        let a = store.create_state("alice", &config("BTC")).unwrap();
        let b = store.create_state("bob", &config("ETH")).unwrap();

        let all = store.states().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, a);
        assert_eq!(all[0].config, config("BTC"));
        assert_eq!(all[1].user_id, "bob");

        let bobs = store.user_states("bob").unwrap();
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].id, b);
    }

    #[test]
    fn test_value_is_sealed() {
        let store = StateStore::new(":memory:", "pass").unwrap();
        store.create_state("alice", &config("BTC")).unwrap();

        let raw: String = store
            .conn
            .query_row("SELECT value FROM states", [], |row| row.get(0))
            .unwrap();
        assert!(!raw.contains("secret"));
        assert!(!raw.contains("BTC"));
    }

    #[test]
    fn test_drop_respects_owner() {
        let store = StateStore::new(":memory:", "pass").unwrap();
        let id = store.create_state("alice", &config("BTC")).unwrap();
        store.create_state("alice", &config("ETH")).unwrap();
        store.create_state("bob", &config("BTC")).unwrap();

        assert!(!store.drop_user_state("bob", &id).unwrap());
        assert!(store.drop_user_state("alice", &id).unwrap());
        assert_eq!(store.drop_user_states("alice").unwrap(), 1);
        assert_eq!(store.states().unwrap().len(), 1);

        let bobs = store.user_states("bob").unwrap();
        assert!(store.drop_state(&bobs[0].id).unwrap());
        assert!(store.states().unwrap().is_empty());
    }

    #[test]
    fn test_insert_with_chosen_id() {
        let store = StateStore::new(":memory:", "pass").unwrap();
        store.insert_state("fixed", "alice", &config("BTC")).unwrap();

        assert_eq!(store.user_states("alice").unwrap()[0].id, "fixed");
        assert!(store.insert_state("fixed", "bob", &config("ETH")).is_err());
    }

    #[test]
    fn test_unreadable_rows_are_skipped() {
        let store = StateStore::new(":memory:", "pass").unwrap();
        store.create_state("alice", &config("BTC")).unwrap();
        store
            .conn
            .execute(
                "INSERT INTO states (id, user_id, value) VALUES ('x', 'alice', 'garbage')",
                [],
            )
            .unwrap();

        assert_eq!(store.states().unwrap().len(), 1);
    }
}
