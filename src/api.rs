use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::HttpError;
use crate::indicator::Indicator;
use crate::indicator::bollinger::BollingerBands;
use crate::indicator::dual_ema::DualEma;
use crate::indicator::macd::Macd;
use crate::indicator::rsi::Rsi;
use crate::model::{Candle, TimeFrame};
use crate::storage::mysql::MysqlStorage;

fn default_timeframe() -> String {
    "60".into()
}

fn default_candle_limit() -> usize {
    20_000
}

fn default_include_indicators() -> bool {
    true
}

fn default_indicator_limit() -> usize {
    20_000
}

const DUAL_EMA_FAST: usize = 50;
const DUAL_EMA_SLOW: usize = 200;
const VOLATILITY_PERIOD: usize = 200;

#[derive(Debug, Deserialize)]
struct CandleQuery {
    #[serde(default = "default_timeframe")]
    timeframe: String,
    #[serde(default = "default_candle_limit")]
    limit: usize,
    #[serde(default = "default_include_indicators")]
    include_indicators: bool,
}

#[derive(Debug, Deserialize)]
struct IndicatorQuery {
    #[serde(default = "default_timeframe")]
    timeframe: String,
    #[serde(default = "default_indicator_limit")]
    limit: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

struct ApiError {
    status: StatusCode,
    error: HttpError,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                success: false,
                error: self.error.to_string(),
            }),
        )
            .into_response()
    }
}

fn unknown_timeframe(raw: &str) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        error: HttpError::UnknownTimeframe {
            timeframe: raw.to_string(),
        },
    }
}

fn unknown_indicator(raw: &str) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        error: HttpError::UnknownIndicator {
            indicator: raw.to_string(),
        },
    }
}

fn database_error(err: impl std::fmt::Debug) -> ApiError {
    warn!(error = ?err, "database error serving request");
    ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        error: HttpError::Database,
    }
}

pub fn router(storage: Arc<MysqlStorage>) -> Router {
    Router::new()
        .route("/api/candles/:symbol", get(get_candles))
        .route("/api/symbols", get(get_symbols))
        .route("/api/indicators/:indicator/:symbol", get(get_indicator))
        .route("/api/test-db", get(get_test_db))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(storage)
}

fn candle_json(c: &Candle) -> Value {
    json!({
        "time": c.open_time / 1000,
        "open": c.open,
        "high": c.high,
        "low": c.low,
        "close": c.close,
        "volume": c.volume,
    })
}

fn none_on_undefined(values: &[Option<f64>]) -> Vec<Value> {
    values
        .iter()
        .map(|v| v.map(Value::from).unwrap_or(Value::Null))
        .collect()
}

fn compute_indicators(candles: &[Candle]) -> Value {
    let rsi = Rsi::new(14).expect("static period").calculate(candles);
    let macd = Macd::new(12, 26, 9)
        .expect("static periods")
        .calculate_full(candles);
    let dual_ema = DualEma::new(DUAL_EMA_FAST, DUAL_EMA_SLOW)
        .expect("static periods")
        .calculate_full(candles);
    let closes = crate::indicator::close_prices(candles);
    let volatility = crate::indicator::volatility::Volatility::new(VOLATILITY_PERIOD)
        .expect("static period")
        .calculate_prices(&closes);

    json!({
        "macd": {
            "macd": none_on_undefined(&macd.macd),
            "signal": none_on_undefined(&macd.signal),
            "histogram": none_on_undefined(&macd.histogram),
        },
        "volatility": none_on_undefined(&volatility),
        "dual_ema": {
            "ema50": none_on_undefined(&dual_ema.ema1),
            "ema200": none_on_undefined(&dual_ema.ema2),
        },
        "rsi": none_on_undefined(&rsi),
    })
}

async fn get_candles(
    State(storage): State<Arc<MysqlStorage>>,
    Path(symbol): Path<String>,
    Query(query): Query<CandleQuery>,
) -> Result<Json<Value>, ApiError> {
    let Some(timeframe) = TimeFrame::from_str(&query.timeframe) else {
        return Err(unknown_timeframe(&query.timeframe));
    };

    let candles = storage
        .recent_candles(&symbol, timeframe, query.limit)
        .await
        .map_err(database_error)?;

    let data: Vec<Value> = candles.iter().map(candle_json).collect();

    let mut body = json!({
        "success": true,
        "data": data,
        "count": candles.len(),
        "symbol": symbol,
        "timeframe": timeframe.display_str(),
    });

    if query.include_indicators {
        body["indicators"] = compute_indicators(&candles);
    }

    Ok(Json(body))
}

async fn get_symbols(
    State(storage): State<Arc<MysqlStorage>>,
) -> Result<Json<Value>, ApiError> {
    let tickers = storage.ticker_snapshot().await.map_err(database_error)?;

    let symbols: Vec<Value> = tickers
        .iter()
        .map(|t| {
            json!({
                "symbol": t.symbol,
                "price": t.last_price,
                "change_24h": t.price_24h_pcnt.map(|p| p * 100.0),
                "volume_24h_usdt": t.turnover_24h,
            })
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "symbols": symbols,
    })))
}

async fn get_indicator(
    State(storage): State<Arc<MysqlStorage>>,
    Path((indicator, symbol)): Path<(String, String)>,
    Query(query): Query<IndicatorQuery>,
) -> Result<Json<Value>, ApiError> {
    let Some(timeframe) = TimeFrame::from_str(&query.timeframe) else {
        return Err(unknown_timeframe(&query.timeframe));
    };

    let candles = storage
        .recent_candles(&symbol, timeframe, query.limit)
        .await
        .map_err(database_error)?;

    let data = match indicator.as_str() {
        "rsi" => {
            let rsi = Rsi::new(14).expect("static period").calculate(&candles);
            Value::Array(none_on_undefined(&rsi))
        }
        "macd" => {
            let macd = Macd::new(12, 26, 9)
                .expect("static periods")
                .calculate_full(&candles);
            let per_time: Vec<Value> = candles
                .iter()
                .zip(macd.macd.iter())
                .zip(macd.signal.iter())
                .zip(macd.histogram.iter())
                .map(|(((c, m), s), h)| {
                    json!({
                        "time": c.open_time / 1000,
                        "macd": m,
                        "signal": s,
                        "histogram": h,
                    })
                })
                .collect();
            Value::Array(per_time)
        }
        "volatility" => {
            let closes = crate::indicator::close_prices(&candles);
            let volatility = crate::indicator::volatility::Volatility::new(VOLATILITY_PERIOD)
                .expect("static period")
                .calculate_prices(&closes);
            let per_time: Vec<Value> = candles
                .iter()
                .zip(volatility.iter())
                .map(|(c, v)| json!({ "time": c.open_time / 1000, "value": v }))
                .collect();
            Value::Array(per_time)
        }
        "dual_ema" => {
            let dual_ema = DualEma::new(DUAL_EMA_FAST, DUAL_EMA_SLOW)
                .expect("static periods")
                .calculate_full(&candles);
            let per_time: Vec<Value> = candles
                .iter()
                .zip(dual_ema.ema1.iter())
                .zip(dual_ema.ema2.iter())
                .map(|((c, e1), e2)| {
                    json!({ "time": c.open_time / 1000, "ema50": e1, "ema200": e2 })
                })
                .collect();
            Value::Array(per_time)
        }
        "bollinger" => {
            let bands = BollingerBands::new(20, 2.0)
                .expect("static parameters")
                .calculate_bands(&candles);
            let per_time: Vec<Value> = candles
                .iter()
                .zip(bands.upper.iter())
                .zip(bands.middle.iter())
                .zip(bands.lower.iter())
                .map(|(((c, u), m), l)| {
                    json!({ "time": c.open_time / 1000, "upper": u, "middle": m, "lower": l })
                })
                .collect();
            Value::Array(per_time)
        }
        other => return Err(unknown_indicator(other)),
    };

    let count = data.as_array().map(|a| a.len()).unwrap_or(0);

    Ok(Json(json!({
        "success": true,
        "indicator": indicator,
        "data": data,
        "count": count,
    })))
}

async fn get_test_db(State(storage): State<Arc<MysqlStorage>>) -> Result<Json<Value>, ApiError> {
    storage.ping().await.map_err(database_error)?;
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_on_undefined_maps_warm_up_to_null() {
        let values = vec![None, Some(1.5), None];
        let json = none_on_undefined(&values);
        assert_eq!(json[0], Value::Null);
        assert_eq!(json[1], json!(1.5));
        assert_eq!(json[2], Value::Null);
    }

    #[test]
    fn candle_json_converts_ms_to_seconds() {
        let candle = Candle {
            symbol: "BTCUSDT".into(),
            open_time: 1_704_067_200_000,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
            turnover: 1,
        };
        assert_eq!(candle_json(&candle)["time"], json!(1_704_067_200));
    }
}
