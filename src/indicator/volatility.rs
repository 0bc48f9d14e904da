use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::{Indicator, close_prices};
use crate::model::Candle;

/// Average absolute percentage change over a trailing window — a cheap
/// volatility proxy that does not require a Gaussian return assumption.
pub struct Volatility {
    period: usize,
}

impl Volatility {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        if period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "period must be > 0".into(),
            });
        }
        Ok(Self { period })
    }

    /// Full-length volatility series.
    pub fn calculate_prices(&self, prices: &[f64]) -> Vec<Option<f64>> {
        if prices.len() < self.period + 1 {
            return vec![None; prices.len()];
        }

        let mut out = vec![None; self.period];
        for i in self.period..prices.len() {
            let mut changes = Vec::new();
            for j in (i - self.period + 1)..=i {
                if j > 0 && prices[j - 1] > 0.0 {
                    changes.push((((prices[j] - prices[j - 1]) / prices[j - 1]) * 100.0).abs());
                }
            }
            if changes.is_empty() {
                out.push(None);
            } else {
                out.push(Some(changes.iter().sum::<f64>() / changes.len() as f64));
            }
        }
        out
    }
}

impl Indicator for Volatility {
    fn name(&self) -> &str {
        "volatility"
    }

    fn required_candles(&self) -> usize {
        self.period + 1
    }

    fn calculate(&self, candles: &[Candle]) -> Vec<Option<f64>> {
        self.calculate_prices(&close_prices(candles))
    }
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
    fn volatility_period_zero_invalid() {
        assert!(Volatility::new(0).is_err());
    }

    #[test]
    fn volatility_insufficient_data_all_none() {
        let vol = Volatility::new(5).unwrap();
        let values = vol.calculate(&candles_from_closes(&[1.0; 5]));
        assert!(values.iter().all(|v| v.is_none()));
    }

    #[test]
    fn volatility_flat_prices_is_zero() {
        let vol = Volatility::new(3).unwrap();
        let candles = candles_from_closes(&[10.0; 6]);
        let values = vol.calculate(&candles);
        for v in &values[3..] {
            assert!((v.unwrap() - 0.0).abs() < 1e-9);
        }
    }

    #[test]
    fn volatility_known_value() {
        let vol = Volatility::new(2).unwrap();
        // prices: 100, 110, 99 -> pct changes: +10%, -10% -> abs avg = 10
        let candles = candles_from_closes(&[100.0, 110.0, 99.0]);
        let values = vol.calculate(&candles);
        assert!((values[2].unwrap() - 10.0).abs() < 1e-6);
    }
}
