//! Price store
//!
//! Durable mapping from a stock or commodity name to its price.
//! Names are case-insensitive; the store is upsert-only.

pub mod sqlite;

pub use sqlite::SqlitePriceStore;

use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::models::PriceRecord;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Example prices loaded at startup when seeding is enabled
pub const EXAMPLE_PRICES: &[(&str, f64)] = &[
    ("Aluminum", 0.79),
    ("silver", 0.89),
    ("gold", 1.42),
    ("bronze", 2.99),
];

/// Trait for price persistence
#[async_trait::async_trait]
pub trait PriceStore: Send + Sync {
    /// Insert or overwrite the price stored under the normalized name
    async fn upsert(&self, name: &str, price: f64) -> Result<()>;

    /// `None` is the normal not-found branch, not an error
    async fn lookup(&self, name: &str) -> Result<Option<f64>>;

    /// All records ordered by symbol
    async fn list(&self) -> Result<Vec<PriceRecord>>;

    async fn seed(&self, records: &[(&str, f64)]) -> Result<()> {
        for (name, price) in records {
            self.upsert(name, *price).await?;
        }
        Ok(())
    }
}

/// Canonical key for a stock name
pub fn normalize_symbol(name: &str) -> Result<String> {
    let key = name.trim().to_lowercase();
    if key.is_empty() {
        return Err(ChatError::InvalidSymbol(name.to_string()));
    }
    Ok(key)
}

pub fn validate_price(price: f64) -> Result<()> {
    if price.is_finite() && price >= 0.0 {
        Ok(())
    } else {
        Err(ChatError::InvalidPrice(price))
    }
}

/// In-memory price store for development and tests
pub struct InMemoryPriceStore {
    prices: Arc<RwLock<HashMap<String, f64>>>,
}

impl InMemoryPriceStore {
    pub fn new() -> Self {
        Self {
            prices: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryPriceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PriceStore for InMemoryPriceStore {
    async fn upsert(&self, name: &str, price: f64) -> Result<()> {
        validate_price(price)?;
        let key = normalize_symbol(name)?;

        let mut prices = self.prices.write().await;
        prices.insert(key, price);
        Ok(())
    }

    async fn lookup(&self, name: &str) -> Result<Option<f64>> {
        let key = normalize_symbol(name)?;
        let prices = self.prices.read().await;
        Ok(prices.get(&key).copied())
    }

    async fn list(&self) -> Result<Vec<PriceRecord>> {
        let prices = self.prices.read().await;

        let mut records: Vec<PriceRecord> = prices
            .iter()
            .map(|(symbol, price)| PriceRecord {
                symbol: symbol.clone(),
                price: *price,
            })
            .collect();

        records.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(records)
    }
}

/// Open the configured backend, falling back to memory if sqlite is unavailable
pub async fn open_price_store(config: &ChatConfig) -> Arc<dyn PriceStore> {
    let store: Arc<dyn PriceStore> = match config.stocks_db_url.as_deref() {
        Some(url) => match SqlitePriceStore::connect(url).await {
            Ok(store) => {
                info!(url = %url, "Price store backend: sqlite");
                Arc::new(store)
            }
            Err(error) => {
                warn!(
                    "Failed to open sqlite price store, falling back to in-memory: {}",
                    error
                );
                Arc::new(InMemoryPriceStore::new())
            }
        },
        None => {
            info!("Price store backend: in-memory");
            Arc::new(InMemoryPriceStore::new())
        }
    };

    if config.seed_example_prices {
        match store.seed(EXAMPLE_PRICES).await {
            Ok(()) => info!(count = EXAMPLE_PRICES.len(), "Seeded example prices"),
            Err(error) => warn!("Failed to seed example prices: {}", error),
        }
    }

    store
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_case_insensitive_round_trip() {
        let store = InMemoryPriceStore::new();
        store.upsert("AAPL", 150.0).await.unwrap();
        assert_eq!(store.lookup("aapl").await.unwrap(), Some(150.0));
        assert_eq!(store.lookup("  Aapl ").await.unwrap(), Some(150.0));
    }

    #[tokio::test]
    async fn test_lookup_missing_is_none() {
        let store = InMemoryPriceStore::new();
        assert_eq!(store.lookup("ZZZZ").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_and_is_idempotent() {
        let store = InMemoryPriceStore::new();
        store.upsert("gold", 1.0).await.unwrap();
        store.upsert("GOLD", 1.42).await.unwrap();
        store.upsert("gold", 1.42).await.unwrap();

        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].price, 1.42);
    }

    #[tokio::test]
    async fn test_invalid_prices_rejected() {
        let store = InMemoryPriceStore::new();
        for bad in [-0.01, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                store.upsert("gold", bad).await,
                Err(ChatError::InvalidPrice(_))
            ));
        }
        assert_eq!(store.lookup("gold").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_blank_name_rejected() {
        let store = InMemoryPriceStore::new();
        assert!(matches!(
            store.upsert("   ", 1.0).await,
            Err(ChatError::InvalidSymbol(_))
        ));
        tokio_test::assert_err!(store.lookup("").await);
        tokio_test::assert_ok!(store.upsert(" silver ", 0.89).await);
    }

    #[test]
    fn test_seed_blocking() {
        let store = InMemoryPriceStore::new();
        tokio_test::block_on(store.seed(&[("Copper", 4.1)])).unwrap();
        let price = tokio_test::block_on(store.lookup("copper")).unwrap();
        assert_eq!(price, Some(4.1));
    }

    #[tokio::test]
    async fn test_seed_normalizes_names() {
        let store = InMemoryPriceStore::new();
        store.seed(EXAMPLE_PRICES).await.unwrap();

        assert_eq!(store.lookup("aluminum").await.unwrap(), Some(0.79));
        let symbols: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.symbol)
            .collect();
        assert_eq!(symbols, vec!["aluminum", "bronze", "gold", "silver"]);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_same_key() {
        let store = Arc::new(InMemoryPriceStore::new());
        let mut handles = vec![];
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.upsert("silver", i as f64).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let price = store.lookup("silver").await.unwrap().unwrap();
        assert!((0.0..16.0).contains(&price));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
