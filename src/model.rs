use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// A perpetual-futures trading symbol, e.g. `"BTCUSDT"`.
pub type Symbol = String;

/// Candle timeframe supported by the ingestor and the read API.
///
/// String representations match the Bybit `interval` query parameter
/// and the per-timeframe table suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    Min1,
    Min5,
    Min15,
    Hour1,
    Hour4,
    Day1,
    Week1,
}

impl TimeFrame {
    pub const ALL_COARSEST_FIRST: [TimeFrame; 7] = [
        TimeFrame::Week1,
        TimeFrame::Day1,
        TimeFrame::Hour4,
        TimeFrame::Hour1,
        TimeFrame::Min15,
        TimeFrame::Min5,
        TimeFrame::Min1,
    ];

    /// Parse a query-string / Bybit-interval timeframe token.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1" => Some(Self::Min1),
            "5" => Some(Self::Min5),
            "15" => Some(Self::Min15),
            "60" => Some(Self::Hour1),
            "240" => Some(Self::Hour4),
            "D" => Some(Self::Day1),
            "W" => Some(Self::Week1),
            _ => None,
        }
    }

    /// Bybit `interval` query parameter value.
    pub fn bybit_interval(self) -> &'static str {
        match self {
            Self::Min1 => "1",
            Self::Min5 => "5",
            Self::Min15 => "15",
            Self::Hour1 => "60",
            Self::Hour4 => "240",
            Self::Day1 => "D",
            Self::Week1 => "W",
        }
    }

    /// Per-timeframe candle table name.
    pub fn table_name(self) -> &'static str {
        match self {
            Self::Min1 => "candles1",
            Self::Min5 => "candles5",
            Self::Min15 => "candles15",
            Self::Hour1 => "candles60",
            Self::Hour4 => "candles240",
            Self::Day1 => "candlesd",
            Self::Week1 => "candlesw",
        }
    }

    /// Display form used in the `/api/candles` response body
    /// (`"60m"`, `"1D"`, `"1W"`).
    pub fn display_str(self) -> &'static str {
        match self {
            Self::Min1 => "1m",
            Self::Min5 => "5m",
            Self::Min15 => "15m",
            Self::Hour1 => "60m",
            Self::Hour4 => "240m",
            Self::Day1 => "1D",
            Self::Week1 => "1W",
        }
    }
}

impl std::fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.bybit_interval())
    }
}

/// A closed OHLCV bar for a `(symbol, timeframe, open_time)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub symbol: Symbol,
    /// Milliseconds since Unix epoch; bar start.
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Quote-currency turnover, rounded to the nearest integer to
    /// match the legacy schema.
    pub turnover: i64,
}

impl Candle {
    /// `YYYY-MM-DD HH:MM:SS` UTC wall-clock string derived from `open_time`.
    pub fn open_datetime(&self) -> String {
        DateTime::from_timestamp_millis(self.open_time)
            .unwrap_or_else(|| DateTime::from_timestamp_millis(0).unwrap())
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }
}

/// The current 24h market snapshot for a symbol. All numeric fields
/// are nullable: the exchange omits them or sends an empty string
/// for instruments where they do not apply.
#[derive(Debug, Clone, Default)]
pub struct Ticker {
    pub symbol: Symbol,
    pub last_price: Option<f64>,
    pub index_price: Option<f64>,
    pub mark_price: Option<f64>,
    pub prev_price_24h: Option<f64>,
    pub price_24h_pcnt: Option<f64>,
    pub high_price_24h: Option<f64>,
    pub low_price_24h: Option<f64>,
    pub prev_price_1h: Option<f64>,
    pub open_interest: Option<f64>,
    pub open_interest_value: Option<f64>,
    pub turnover_24h: Option<f64>,
    pub volume_24h: Option<f64>,
    pub funding_rate: Option<f64>,
    pub next_funding_time: Option<i64>,
    pub predicted_delivery_price: Option<f64>,
    pub basis_rate: Option<f64>,
    pub delivery_fee_rate: Option<f64>,
    pub delivery_time: Option<i64>,
    pub ask1_size: Option<f64>,
    pub bid1_price: Option<f64>,
    pub ask1_price: Option<f64>,
    pub bid1_size: Option<f64>,
    pub basis: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_round_trip() {
        let frames = [
            ("1", TimeFrame::Min1, "candles1"),
            ("5", TimeFrame::Min5, "candles5"),
            ("15", TimeFrame::Min15, "candles15"),
            ("60", TimeFrame::Hour1, "candles60"),
            ("240", TimeFrame::Hour4, "candles240"),
            ("D", TimeFrame::Day1, "candlesd"),
            ("W", TimeFrame::Week1, "candlesw"),
        ];
        for (s, tf, table) in frames {
            assert_eq!(TimeFrame::from_str(s), Some(tf));
            assert_eq!(tf.bybit_interval(), s);
            assert_eq!(tf.table_name(), table);
        }
    }

    #[test]
    fn timeframe_invalid_string_returns_none() {
        assert_eq!(TimeFrame::from_str("2"), None);
        assert_eq!(TimeFrame::from_str(""), None);
    }

    #[test]
    fn timeframe_display_str_matches_api_contract() {
        assert_eq!(TimeFrame::Hour1.display_str(), "60m");
        assert_eq!(TimeFrame::Day1.display_str(), "1D");
        assert_eq!(TimeFrame::Week1.display_str(), "1W");
    }

    #[test]
    fn coarsest_first_order_matches_pipeline_contract() {
        assert_eq!(TimeFrame::ALL_COARSEST_FIRST[0], TimeFrame::Week1);
        assert_eq!(TimeFrame::ALL_COARSEST_FIRST[6], TimeFrame::Min1);
    }

    #[test]
    fn open_datetime_formats_utc_wall_clock() {
        let candle = Candle {
            symbol: "BTCUSDT".into(),
            open_time: 1_704_067_200_000, // 2024-01-01T00:00:00Z
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
            turnover: 1,
        };
        assert_eq!(candle.open_datetime(), "2024-01-01 00:00:00");
    }
}
