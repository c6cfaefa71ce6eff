//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `KeyValueStore` port from the `core` crate. It keeps the rate-limit
//! ledger slots in a PostgreSQL table using `sqlx`.

use async_trait::async_trait;
use quiz_core::ports::{KeyValueStore, PortError, PortResult};
use sqlx::{FromRow, PgPool};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `KeyValueStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct SlotRecord {
    value: String,
}

//=========================================================================================
// `KeyValueStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl KeyValueStore for DbAdapter {
    async fn read(&self, key: &str) -> PortResult<Option<String>> {
        let record = sqlx::query_as::<_, SlotRecord>(
            "SELECT value FROM kv_store WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PortError::Storage(e.to_string()))?;

        Ok(record.map(|r| r.value))
    }

    async fn write(&self, key: &str, value: &str) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO kv_store (key, value, updated_at) VALUES ($1, $2, NOW())
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Storage(e.to_string()))?;

        Ok(())
    }
}
