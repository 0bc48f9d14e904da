use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::{Indicator, close_prices};
use crate::model::Candle;

/// RSI (Relative Strength Index) using Wilder's smoothing method.
pub struct Rsi {
    period: usize,
}

impl Rsi {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        if period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "period must be > 0".into(),
            });
        }
        Ok(Self { period })
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &str {
        "rsi"
    }

    fn required_candles(&self) -> usize {
        self.period + 1
    }

    fn calculate(&self, candles: &[Candle]) -> Vec<Option<f64>> {
        let prices = close_prices(candles);
        if prices.len() < self.required_candles() {
            return vec![None; prices.len()];
        }

        let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();

        let mut avg_gain: f64 = deltas[..self.period]
            .iter()
            .map(|&d| d.max(0.0))
            .sum::<f64>()
            / self.period as f64;
        let mut avg_loss: f64 = deltas[..self.period]
            .iter()
            .map(|&d| (-d).max(0.0))
            .sum::<f64>()
            / self.period as f64;

        let mut out = vec![None; self.period];
        out.push(Some(rsi_value(avg_gain, avg_loss)));

        for &delta in &deltas[self.period..] {
            let gain = delta.max(0.0);
            let loss = (-delta).max(0.0);
            avg_gain = (avg_gain * (self.period - 1) as f64 + gain) / self.period as f64;
            avg_loss = (avg_loss * (self.period - 1) as f64 + loss) / self.period as f64;
            out.push(Some(rsi_value(avg_gain, avg_loss)));
        }

        out
    }
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
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
    fn rsi_insufficient_data_all_none() {
        let rsi = Rsi::new(14).unwrap();
        let candles = candles_from_closes(&[1.0; 10]);
        let values = rsi.calculate(&candles);
        assert_eq!(values.len(), 10);
        assert!(values.iter().all(|v| v.is_none()));
    }

    #[test]
    fn rsi_period_zero_invalid() {
        assert!(Rsi::new(0).is_err());
    }

    #[test]
    fn rsi_all_gains_returns_100() {
        let rsi = Rsi::new(3).unwrap();
        let candles = candles_from_closes(&[1.0, 2.0, 3.0, 4.0]);
        let values = rsi.calculate(&candles);
        assert_eq!(values[3], Some(100.0));
        assert!(values[..3].iter().all(|v| v.is_none()));
    }

    #[test]
    fn rsi_all_losses_returns_0() {
        let rsi = Rsi::new(3).unwrap();
        let candles = candles_from_closes(&[4.0, 3.0, 2.0, 1.0]);
        let values = rsi.calculate(&candles);
        assert!((values[3].unwrap() - 0.0).abs() < 1e-9);
    }

    #[test]
    fn rsi_known_value() {
        let rsi = Rsi::new(3).unwrap();
        let candles = candles_from_closes(&[10.0, 10.0, 10.0, 11.0]);
        let values = rsi.calculate(&candles);
        assert_eq!(values[3], Some(100.0));
    }

    #[test]
    fn rsi_output_length_matches_input() {
        let rsi = Rsi::new(14).unwrap();
        let candles = candles_from_closes(&[100.0_f64; 20]);
        let values = rsi.calculate(&candles);
        assert_eq!(values.len(), 20);
        assert!(values[..14].iter().all(|v| v.is_none()));
        assert!(values[14..].iter().all(|v| v.is_some()));
    }
}
