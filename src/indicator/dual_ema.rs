use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::ma::ema_prices;
use crate::indicator::{Indicator, close_prices};
use crate::model::Candle;

/// Two EMAs of different periods plotted together — typically a fast/slow
/// trend-cross pair (50/200).
pub struct DualEma {
    period1: usize,
    period2: usize,
}

/// The two EMA series, one value per input candle.
#[derive(Debug, Clone, PartialEq)]
pub struct DualEmaOutput {
    pub ema1: Vec<Option<f64>>,
    pub ema2: Vec<Option<f64>>,
}

impl DualEma {
    pub fn new(period1: usize, period2: usize) -> Result<Self, Report<IndicatorError>> {
        if period1 == 0 || period2 == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "both periods must be > 0".into(),
            });
        }
        Ok(Self { period1, period2 })
    }

    /// Full-length EMA(period1) and EMA(period2) series.
    pub fn calculate_full(&self, candles: &[Candle]) -> DualEmaOutput {
        let prices = close_prices(candles);
        DualEmaOutput {
            ema1: ema_prices(&prices, self.period1),
            ema2: ema_prices(&prices, self.period2),
        }
    }
}

impl Indicator for DualEma {
    fn name(&self) -> &str {
        "dual_ema"
    }

    fn required_candles(&self) -> usize {
        self.period1.max(self.period2)
    }

    /// Returns the first (typically faster) EMA only; use
    /// [`DualEma::calculate_full`] for both series.
    fn calculate(&self, candles: &[Candle]) -> Vec<Option<f64>> {
        self.calculate_full(candles).ema1
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
    fn dual_ema_period_zero_invalid() {
        assert!(DualEma::new(0, 200).is_err());
    }

    #[test]
    fn dual_ema_independent_warmups() {
        let dual = DualEma::new(2, 4).unwrap();
        let candles = candles_from_closes(&[10.0; 6]);
        let out = dual.calculate_full(&candles);
        assert!(out.ema1[0].is_none());
        assert!(out.ema1[1].is_some());
        assert!(out.ema2[2].is_none());
        assert!(out.ema2[3].is_some());
    }

    #[test]
    fn dual_ema_flat_prices_converge() {
        let dual = DualEma::new(2, 4).unwrap();
        let candles = candles_from_closes(&[5.0; 8]);
        let out = dual.calculate_full(&candles);
        assert!((out.ema1[7].unwrap() - 5.0).abs() < 1e-9);
        assert!((out.ema2[7].unwrap() - 5.0).abs() < 1e-9);
    }
}
