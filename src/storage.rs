pub mod mysql;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::StorageError;
use crate::model::{Candle, Symbol, Ticker, TimeFrame};

/// Persistence contract for candles and tickers (§4.D).
///
/// Implementations own deadlock retry and transactional boundaries;
/// callers never see a deadlock as distinct from any other transient
/// failure except through [`StorageError::DeadlockRetriesExhausted`].
pub trait Storage: Send + Sync {
    /// All symbols currently present in the ticker snapshot, ordered by
    /// `turnover24h` descending.
    fn list_symbols(&self) -> BoxFuture<'_, Result<Vec<Symbol>, Report<StorageError>>>;

    /// Max `open_time` stored for `(symbol, timeframe)`, or `None` if the
    /// symbol has no rows yet in that table.
    fn last_open_time(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
    ) -> BoxFuture<'_, Result<Option<i64>, Report<StorageError>>>;

    /// Upsert a batch of candles into `timeframe`'s table in one
    /// multi-row statement, inside its own transaction.
    fn upsert_candles(
        &self,
        timeframe: TimeFrame,
        rows: &[Candle],
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    /// Empty the ticker table ahead of a fresh snapshot.
    fn truncate_tickers(&self) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    /// Insert one ticker row.
    fn insert_ticker(&self, ticker: &Ticker) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    /// Remove `symbols` from the ticker table and every candle table.
    fn delete_symbol_everywhere(
        &self,
        symbols: &[Symbol],
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>>;
}
