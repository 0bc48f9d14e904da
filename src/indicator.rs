pub mod bollinger;
pub mod dual_ema;
pub mod ma;
pub mod macd;
pub mod rsi;
pub mod volatility;
pub mod volume;

use crate::model::Candle;

/// A technical analysis indicator that operates on a slice of candles.
///
/// Candles must be in ascending chronological order (oldest first).
/// Calculation is total: every indicator returns one output per input
/// candle, with `None` standing in for the warm-up window where the
/// indicator is not yet defined. Callers never see a truncated series.
pub trait Indicator: Send {
    /// Unique name of this indicator (e.g., "rsi", "sma").
    #[allow(dead_code)]
    fn name(&self) -> &str;

    /// Minimum number of candles required before the first defined value.
    fn required_candles(&self) -> usize;

    /// Calculate indicator values from candles, one per input candle.
    fn calculate(&self, candles: &[Candle]) -> Vec<Option<f64>>;
}

/// Extract close prices from a slice of candles.
pub fn close_prices(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Extract volumes from a slice of candles.
pub fn volumes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.volume).collect()
}
