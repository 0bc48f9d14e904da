use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::{Indicator, close_prices};
use crate::model::Candle;

/// Simple Moving Average.
pub struct Sma {
    period: usize,
}

impl Sma {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        if period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "period must be > 0".into(),
            });
        }
        Ok(Self { period })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// SMA of a price slice, padded to the input's length with `None`
    /// for the warm-up window.
    pub fn calculate_prices(&self, prices: &[f64]) -> Vec<Option<f64>> {
        sma_prices(prices, self.period)
    }
}

impl Indicator for Sma {
    fn name(&self) -> &str {
        "sma"
    }

    fn required_candles(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[Candle]) -> Vec<Option<f64>> {
        self.calculate_prices(&close_prices(candles))
    }
}

/// Exponential Moving Average, seeded with the SMA of the first
/// `period` prices.
pub struct Ema {
    period: usize,
}

impl Ema {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        if period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "period must be > 0".into(),
            });
        }
        Ok(Self { period })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// EMA of a price slice, padded to the input's length with `None`
    /// for the warm-up window.
    pub fn calculate_prices(&self, prices: &[f64]) -> Vec<Option<f64>> {
        ema_prices(prices, self.period)
    }
}

impl Indicator for Ema {
    fn name(&self) -> &str {
        "ema"
    }

    fn required_candles(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[Candle]) -> Vec<Option<f64>> {
        self.calculate_prices(&close_prices(candles))
    }
}

/// SMA over a raw price slice. Shared by Bollinger/SMA indicators.
pub(crate) fn sma_prices(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    if prices.len() < period {
        return vec![None; prices.len()];
    }
    let mut out = vec![None; period - 1];
    out.extend(
        prices
            .windows(period)
            .map(|w| Some(w.iter().sum::<f64>() / period as f64)),
    );
    out
}

/// EMA over a raw price slice, seeded with SMA. Shared by MACD/DualEMA.
pub(crate) fn ema_prices(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    if prices.len() < period {
        return vec![None; prices.len()];
    }
    let mut out = vec![None; period - 1];
    let k = 2.0 / (period as f64 + 1.0);
    let seed = prices[..period].iter().sum::<f64>() / period as f64;
    out.push(Some(seed));
    let mut prev = seed;
    for &price in &prices[period..] {
        let value = (price - prev) * k + prev;
        out.push(Some(value));
        prev = value;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                symbol: "TEST".into(),
                open_time: i as i64 * 60_000,
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1.0,
                turnover: 0,
            })
            .collect()
    }

    #[test]
    fn sma_period_zero_invalid() {
        assert!(Sma::new(0).is_err());
    }

    #[test]
    fn sma_insufficient_data_all_none() {
        let sma = Sma::new(5).unwrap();
        let values = sma.calculate(&candles_from_closes(&[1.0; 4]));
        assert_eq!(values.len(), 4);
        assert!(values.iter().all(|v| v.is_none()));
    }

    #[test]
    fn sma_warmup_padding_length() {
        let sma = Sma::new(3).unwrap();
        let candles = candles_from_closes(&[10.0; 5]);
        let values = sma.calculate(&candles);
        assert_eq!(values.len(), 5);
        assert!(values[0].is_none());
        assert!(values[1].is_none());
        for v in &values[2..] {
            assert!((v.unwrap() - 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn sma_known_value() {
        let sma = Sma::new(3).unwrap();
        let candles = candles_from_closes(&[1.0, 2.0, 3.0, 4.0]);
        let values = sma.calculate(&candles);
        assert!((values[2].unwrap() - 2.0).abs() < 1e-9);
        assert!((values[3].unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn ema_period_zero_invalid() {
        assert!(Ema::new(0).is_err());
    }

    #[test]
    fn ema_insufficient_data_all_none() {
        let ema = Ema::new(5).unwrap();
        let values = ema.calculate(&candles_from_closes(&[1.0; 4]));
        assert!(values.iter().all(|v| v.is_none()));
    }

    #[test]
    fn ema_flat_prices() {
        let ema = Ema::new(3).unwrap();
        let values = ema.calculate(&candles_from_closes(&[10.0; 6]));
        for v in &values[2..] {
            assert!((v.unwrap() - 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn ema_seed_equals_sma() {
        let ema = Ema::new(3).unwrap();
        let values = ema.calculate(&candles_from_closes(&[1.0, 2.0, 3.0, 4.0]));
        assert!((values[2].unwrap() - 2.0).abs() < 1e-9);
    }
}
