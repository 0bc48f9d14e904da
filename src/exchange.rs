pub mod bybit;

use futures::future::BoxFuture;

use crate::model::{Candle, Ticker, TimeFrame};
use crate::ratelimiter::TokenBucket;

/// Abstraction over the exchange's public REST surface.
///
/// Uses `BoxFuture` (from `futures` crate) instead of `async fn` in trait
/// to keep the trait object-safe (`dyn Exchange`). Both methods are
/// soft-failing by contract (§4.B): retries are exhausted internally and
/// logged, never surfaced as an `Err` the caller must branch on.
pub trait Exchange: Send + Sync {
    /// Fetch one page of candles starting at `start_ms`, newest-first as
    /// returned by the exchange. Returns an empty vector both when the
    /// exchange genuinely has nothing more and when all retries were
    /// exhausted — callers cannot and need not distinguish the two.
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        start_ms: i64,
        tokens: &TokenBucket,
    ) -> BoxFuture<'_, Vec<Candle>>;

    /// Fetch the full current ticker snapshot for every linear-perpetual
    /// instrument. Returns an empty vector on hard failure after retries.
    fn fetch_tickers<'a>(&'a self, tokens: &'a TokenBucket) -> BoxFuture<'a, Vec<Ticker>>;
}
