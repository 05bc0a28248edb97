//! SQLite-backed price store
//!
//! Table layout: `prices(stock TEXT PRIMARY KEY, price REAL NOT NULL)`.
//! Upsert is a single `INSERT ... ON CONFLICT` statement, so concurrent
//! writers to the same key are serialized by sqlite itself.

use super::{normalize_symbol, validate_price, PriceStore};
use crate::error::ChatError;
use crate::models::PriceRecord;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;

pub struct SqlitePriceStore {
    pool: SqlitePool,
}

impl SqlitePriceStore {
    /// Open (creating if needed) the database at `url` and ensure the schema exists.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| ChatError::DatabaseError(format!("Invalid sqlite url {}: {}", url, e)))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let mut pool_options = SqlitePoolOptions::new().max_connections(5);
        if url.contains(":memory:") {
            // An in-memory database only lives as long as its single connection.
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| {
                ChatError::DatabaseError(format!("Failed to open price database: {}", e))
            })?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS prices (
              stock TEXT PRIMARY KEY,
              price REAL NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            ChatError::DatabaseError(format!("Failed to initialize price schema: {}", e))
        })?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl PriceStore for SqlitePriceStore {
    async fn upsert(&self, name: &str, price: f64) -> Result<()> {
        validate_price(price)?;
        let key = normalize_symbol(name)?;

        sqlx::query(
            r#"
            INSERT INTO prices (stock, price) VALUES (?1, ?2)
            ON CONFLICT(stock) DO UPDATE SET price = excluded.price
            "#,
        )
        .bind(&key)
        .bind(price)
        .execute(&self.pool)
        .await
        .map_err(|e| ChatError::DatabaseError(format!("Failed to store price for {}: {}", key, e)))?;

        Ok(())
    }

    async fn lookup(&self, name: &str) -> Result<Option<f64>> {
        let key = normalize_symbol(name)?;

        let row = sqlx::query("SELECT price FROM prices WHERE stock = ?1")
            .bind(&key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                ChatError::DatabaseError(format!("Failed to look up price for {}: {}", key, e))
            })?;

        match row {
            Some(row) => Ok(Some(row.try_get::<f64, _>("price")?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<PriceRecord>> {
        let rows = sqlx::query("SELECT stock, price FROM prices ORDER BY stock ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ChatError::DatabaseError(format!("Failed to list prices: {}", e)))?;

        rows.into_iter()
            .map(|row| -> Result<PriceRecord> {
                Ok(PriceRecord {
                    symbol: row.try_get("stock")?,
                    price: row.try_get("price")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqlitePriceStore {
        SqlitePriceStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_is_case_insensitive() {
        let store = memory_store().await;
        store.upsert("AAPL", 150.0).await.unwrap();
        assert_eq!(store.lookup("aapl").await.unwrap(), Some(150.0));
    }

    #[tokio::test]
    async fn test_missing_symbol_is_none() {
        let store = memory_store().await;
        assert_eq!(store.lookup("ZZZZ").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_on_conflict() {
        let store = memory_store().await;
        store.upsert("Gold", 1.0).await.unwrap();
        store.upsert("gold", 1.42).await.unwrap();

        let records = store.list().await.unwrap();
        assert_eq!(
            records,
            vec![PriceRecord {
                symbol: "gold".into(),
                price: 1.42
            }]
        );
    }

    #[tokio::test]
    async fn test_negative_price_rejected() {
        let store = memory_store().await;
        assert!(matches!(
            store.upsert("gold", -1.0).await,
            Err(ChatError::InvalidPrice(_))
        ));
    }

    #[tokio::test]
    async fn test_prices_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("stocks.db").display());

        {
            let store = SqlitePriceStore::connect(&url).await.unwrap();
            store.upsert("bronze", 2.99).await.unwrap();
        }

        let reopened = SqlitePriceStore::connect(&url).await.unwrap();
        assert_eq!(reopened.lookup("BRONZE").await.unwrap(), Some(2.99));
    }
}
