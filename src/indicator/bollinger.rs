use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::ma::sma_prices;
use crate::indicator::{Indicator, close_prices};
use crate::model::Candle;

pub struct BollingerBands {
    period: usize,
    std_dev_multiplier: f64,
}

/// Upper, middle (SMA), and lower band series, one value per input candle.
#[derive(Debug, Clone, PartialEq)]
pub struct BollingerOutput {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

impl BollingerBands {
    pub fn new(period: usize, std_dev_multiplier: f64) -> Result<Self, Report<IndicatorError>> {
        if period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "period must be > 0".into(),
            });
        }
        if std_dev_multiplier <= 0.0 {
            bail!(IndicatorError::InvalidParameter {
                name: "std_dev_multiplier must be > 0".into(),
            });
        }
        Ok(Self {
            period,
            std_dev_multiplier,
        })
    }

    /// Full-length upper/middle/lower band series.
    pub fn calculate_bands(&self, candles: &[Candle]) -> BollingerOutput {
        let prices = close_prices(candles);
        if prices.len() < self.period {
            let none_list = vec![None; prices.len()];
            return BollingerOutput {
                upper: none_list.clone(),
                middle: none_list.clone(),
                lower: none_list,
            };
        }

        let middle = sma_prices(&prices, self.period);
        let mut upper = vec![None; self.period - 1];
        let mut lower = vec![None; self.period - 1];

        for (window, &mid) in prices.windows(self.period).zip(&middle[self.period - 1..]) {
            let mid = mid.expect("defined once the warm-up window has passed");
            let variance =
                window.iter().map(|&p| (p - mid).powi(2)).sum::<f64>() / self.period as f64;
            let std_dev = variance.sqrt();
            upper.push(Some(mid + self.std_dev_multiplier * std_dev));
            lower.push(Some(mid - self.std_dev_multiplier * std_dev));
        }

        BollingerOutput {
            upper,
            middle,
            lower,
        }
    }
}

impl Indicator for BollingerBands {
    fn name(&self) -> &str {
        "bollinger"
    }

    fn required_candles(&self) -> usize {
        self.period
    }

    /// Returns the middle band (SMA) only; use
    /// [`BollingerBands::calculate_bands`] for upper/lower.
    fn calculate(&self, candles: &[Candle]) -> Vec<Option<f64>> {
        self.calculate_bands(candles).middle
    }
}
