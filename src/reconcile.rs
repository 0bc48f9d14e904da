use std::collections::HashSet;

use error_stack::{Report, ResultExt};
use tracing::{info, warn};

use crate::error::ReconcileError;
use crate::exchange::Exchange;
use crate::model::Symbol;
use crate::ratelimiter::TokenBucket;
use crate::storage::Storage;

/// Run one symbol-reconciliation cycle (§4.E): refresh the ticker
/// snapshot and remove symbols the exchange no longer lists.
///
/// A failed or empty ticker fetch is not an error: it leaves the
/// existing tables untouched and returns `Ok(())`, matching the
/// non-fatal-warning policy of §4.E step 1.
pub async fn reconcile(
    exchange: &dyn Exchange,
    storage: &dyn Storage,
    tokens: &TokenBucket,
) -> Result<(), Report<ReconcileError>> {
    let tickers = exchange.fetch_tickers(tokens).await;
    if tickers.is_empty() {
        warn!("ticker fetch returned nothing, skipping reconciliation cycle");
        return Ok(());
    }

    let tickers: Vec<_> = tickers
        .into_iter()
        .filter(|t| t.symbol.ends_with("USDT"))
        .collect();

    let api_symbols: HashSet<Symbol> = tickers.iter().map(|t| t.symbol.clone()).collect();
    let db_symbols: HashSet<Symbol> = storage
        .list_symbols()
        .await
        .change_context(ReconcileError::StorageFailure)?
        .into_iter()
        .collect();

    let removed: Vec<Symbol> = db_symbols.difference(&api_symbols).cloned().collect();
    if !removed.is_empty() {
        storage
            .delete_symbol_everywhere(&removed)
            .await
            .change_context(ReconcileError::StorageFailure)?;
    }

    storage
        .truncate_tickers()
        .await
        .change_context(ReconcileError::StorageFailure)?;

    for ticker in &tickers {
        storage
            .insert_ticker(ticker)
            .await
            .change_context(ReconcileError::StorageFailure)?;
    }

    let added = api_symbols.difference(&db_symbols).count();
    info!(
        added,
        removed = removed.len(),
        total = api_symbols.len(),
        "symbol reconciliation complete"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Ticker;
    use futures::future::BoxFuture;
    use std::sync::Mutex;

    struct FakeExchange {
        tickers: Vec<Ticker>,
    }

    impl Exchange for FakeExchange {
        fn fetch_candles(
            &self,
            _symbol: &str,
            _timeframe: crate::model::TimeFrame,
            _start_ms: i64,
            _tokens: &TokenBucket,
        ) -> BoxFuture<'_, Vec<crate::model::Candle>> {
            Box::pin(async { Vec::new() })
        }

        fn fetch_tickers<'a>(&'a self, _tokens: &'a TokenBucket) -> BoxFuture<'a, Vec<Ticker>> {
            let tickers = self.tickers.clone();
            Box::pin(async move { tickers })
        }
    }

    #[derive(Default)]
    struct FakeStorage {
        db_symbols: Vec<Symbol>,
        deleted: Mutex<Vec<Symbol>>,
        inserted: Mutex<Vec<Symbol>>,
        truncated: Mutex<bool>,
    }

    impl Storage for FakeStorage {
        fn list_symbols(
            &self,
        ) -> BoxFuture<'_, Result<Vec<Symbol>, Report<crate::error::StorageError>>> {
            let symbols = self.db_symbols.clone();
            Box::pin(async move { Ok(symbols) })
        }

        fn last_open_time(
            &self,
            _symbol: &str,
            _timeframe: crate::model::TimeFrame,
        ) -> BoxFuture<'_, Result<Option<i64>, Report<crate::error::StorageError>>> {
            Box::pin(async { Ok(None) })
        }

        fn upsert_candles(
            &self,
            _timeframe: crate::model::TimeFrame,
            _rows: &[crate::model::Candle],
        ) -> BoxFuture<'_, Result<(), Report<crate::error::StorageError>>> {
            Box::pin(async { Ok(()) })
        }

        fn truncate_tickers(&self) -> BoxFuture<'_, Result<(), Report<crate::error::StorageError>>> {
            *self.truncated.lock().unwrap() = true;
            Box::pin(async { Ok(()) })
        }

        fn insert_ticker(
            &self,
            ticker: &Ticker,
        ) -> BoxFuture<'_, Result<(), Report<crate::error::StorageError>>> {
            self.inserted.lock().unwrap().push(ticker.symbol.clone());
            Box::pin(async { Ok(()) })
        }

        fn delete_symbol_everywhere(
            &self,
            symbols: &[Symbol],
        ) -> BoxFuture<'_, Result<(), Report<crate::error::StorageError>>> {
            self.deleted.lock().unwrap().extend_from_slice(symbols);
            Box::pin(async { Ok(()) })
        }
    }

    fn ticker(symbol: &str) -> Ticker {
        Ticker {
            symbol: symbol.to_owned(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn empty_ticker_fetch_is_non_fatal_noop() {
        let exchange = FakeExchange { tickers: vec![] };
        let storage = FakeStorage::default();
        let cancel = tokio_util::sync::CancellationToken::new();
        let tokens = crate::ratelimiter::spawn(1000, cancel.clone());

        reconcile(&exchange, &storage, &tokens).await.unwrap();

        assert!(!*storage.truncated.lock().unwrap());
        cancel.cancel();
    }

    #[tokio::test]
    async fn non_usdt_symbols_are_filtered() {
        let exchange = FakeExchange {
            tickers: vec![ticker("BTCUSDT"), ticker("BTCUSD")],
        };
        let storage = FakeStorage::default();
        let cancel = tokio_util::sync::CancellationToken::new();
        let tokens = crate::ratelimiter::spawn(1000, cancel.clone());

        reconcile(&exchange, &storage, &tokens).await.unwrap();

        let inserted = storage.inserted.lock().unwrap();
        assert_eq!(inserted.as_slice(), ["BTCUSDT"]);
        cancel.cancel();
    }

    #[tokio::test]
    async fn delisted_symbols_are_removed() {
        let exchange = FakeExchange {
            tickers: vec![ticker("BTCUSDT"), ticker("ETHUSDT")],
        };
        let storage = FakeStorage {
            db_symbols: vec!["BTCUSDT".into(), "ETHUSDT".into(), "FOOUSDT".into()],
            ..Default::default()
        };
        let cancel = tokio_util::sync::CancellationToken::new();
        let tokens = crate::ratelimiter::spawn(1000, cancel.clone());

        reconcile(&exchange, &storage, &tokens).await.unwrap();

        let deleted = storage.deleted.lock().unwrap();
        assert_eq!(deleted.as_slice(), ["FOOUSDT"]);
        cancel.cancel();
    }
}
