use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::ma::ema_prices;
use crate::indicator::{Indicator, close_prices};
use crate::model::Candle;

/// Moving Average Convergence/Divergence: fast EMA minus slow EMA, with
/// an EMA of the MACD line as the signal and their difference as the
/// histogram. All three series are full-length with `None` warm-up.
pub struct Macd {
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
}

/// The three MACD output series, one value per input candle.
#[derive(Debug, Clone, PartialEq)]
pub struct MacdOutput {
    pub macd: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

impl Macd {
    pub fn new(
        fast_period: usize,
        slow_period: usize,
        signal_period: usize,
    ) -> Result<Self, Report<IndicatorError>> {
        if fast_period == 0 || slow_period == 0 || signal_period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "all periods must be > 0".into(),
            });
        }
        if fast_period >= slow_period {
            bail!(IndicatorError::InvalidParameter {
                name: "fast_period must be < slow_period".into(),
            });
        }
        Ok(Self {
            fast_period,
            slow_period,
            signal_period,
        })
    }

    /// Full-length MACD line, signal line, and histogram.
    pub fn calculate_full(&self, candles: &[Candle]) -> MacdOutput {
        let prices = close_prices(candles);
        let fast_ema = ema_prices(&prices, self.fast_period);
        let slow_ema = ema_prices(&prices, self.slow_period);

        let macd_line: Vec<Option<f64>> = fast_ema
            .iter()
            .zip(slow_ema.iter())
            .map(|(f, s)| match (f, s) {
                (Some(f), Some(s)) => Some(f - s),
                _ => None,
            })
            .collect();

        let compacted: Vec<f64> = macd_line.iter().filter_map(|v| *v).collect();
        let signal_compacted = ema_prices(&compacted, self.signal_period);

        let mut signal_line = vec![None; prices.len()];
        let mut idx = 0;
        for (i, m) in macd_line.iter().enumerate() {
            if m.is_some() {
                signal_line[i] = signal_compacted[idx];
                idx += 1;
            }
        }

        let histogram: Vec<Option<f64>> = macd_line
            .iter()
            .zip(signal_line.iter())
            .map(|(m, s)| match (m, s) {
                (Some(m), Some(s)) => Some(m - s),
                _ => None,
            })
            .collect();

        MacdOutput {
            macd: macd_line,
            signal: signal_line,
            histogram,
        }
    }
}

impl Indicator for Macd {
    fn name(&self) -> &str {
        "macd"
    }

    fn required_candles(&self) -> usize {
        self.slow_period + self.signal_period
    }

    /// Returns the MACD line only; use [`Macd::calculate_full`] for signal
    /// and histogram.
    fn calculate(&self, candles: &[Candle]) -> Vec<Option<f64>> {
        self.calculate_full(candles).macd
    }
}
