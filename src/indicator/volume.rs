use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::ma::sma_prices;
use crate::indicator::{Indicator, volumes};
use crate::model::Candle;

/// Volume Moving Average — simple average of trading volume over a period.
pub struct VolumeMA {
    period: usize,
}

impl VolumeMA {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        if period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "period must be > 0".into(),
            });
        }
        Ok(Self { period })
    }

    /// Returns `true` for each position where the current volume exceeds
    /// `surge_multiplier` times the volume MA; `false` during warm-up.
    #[allow(dead_code)]
    pub fn detect_surges(&self, candles: &[Candle], surge_multiplier: f64) -> Vec<bool> {
        let vols = volumes(candles);
        self.calculate_volumes(&vols)
            .iter()
            .zip(vols.iter())
            .map(|(ma, &v)| matches!(ma, Some(ma) if v > ma * surge_multiplier))
            .collect()
    }

    fn calculate_volumes(&self, vols: &[f64]) -> Vec<Option<f64>> {
        sma_prices(vols, self.period)
    }
}

impl Indicator for VolumeMA {
    fn name(&self) -> &str {
        "volume_ma"
    }

    fn required_candles(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[Candle]) -> Vec<Option<f64>> {
        self.calculate_volumes(&volumes(candles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candles_with_volumes(vols: &[f64]) -> Vec<Candle> {
        vols.iter()
            .enumerate()
            .map(|(i, &v)| Candle {
                symbol: "TEST".into(),
                open_time: i as i64 * 60_000,
                open: 100.0,
                high: 100.0,
                low: 100.0,
                close: 100.0,
                volume: v,
                turnover: 0,
            })
            .collect()
    }

    #[test]
    fn volume_ma_period_zero_invalid() {
        assert!(VolumeMA::new(0).is_err());
    }

    #[test]
    fn volume_ma_insufficient_data_all_none() {
        let vma = VolumeMA::new(5).unwrap();
        let values = vma.calculate(&candles_with_volumes(&[1.0; 4]));
        assert!(values.iter().all(|v| v.is_none()));
    }

    #[test]
    fn volume_ma_known_value() {
        let vma = VolumeMA::new(3).unwrap();
        let candles = candles_with_volumes(&[1.0, 2.0, 3.0, 4.0]);
        let values = vma.calculate(&candles);
        assert!((values[2].unwrap() - 2.0).abs() < 1e-9);
        assert!((values[3].unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn surge_detection() {
        let vma = VolumeMA::new(3).unwrap();
        let candles = candles_with_volumes(&[1.0, 1.0, 1.0, 5.0]);
        let surges = vma.detect_surges(&candles, 2.0);
        assert_eq!(surges.len(), 4);
        assert!(!surges[0]);
        assert!(!surges[1]);
        assert!(!surges[2]);
        assert!(surges[3]);
    }
}
