use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::ExchangeError;
use crate::exchange::Exchange;
use crate::model::{Candle, Ticker, TimeFrame};
use crate::ratelimiter::TokenBucket;

const BASE_URL: &str = "https://api.bybit.com";
const DEFAULT_MAX_RETRIES: u32 = 5;
const INITIAL_BACKOFF_SECS: u64 = 1;
const KLINE_LIMIT: usize = 1000;

pub struct BybitExchange {
    client: reqwest::Client,
    max_retries: u32,
}

impl BybitExchange {
    pub fn new(max_retries: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(60))
            .build()
            .expect("static reqwest client config is always valid");
        Self {
            client,
            max_retries: max_retries.max(1),
        }
    }
}

impl Default for BybitExchange {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl Exchange for BybitExchange {
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        start_ms: i64,
        tokens: &TokenBucket,
    ) -> BoxFuture<'_, Vec<Candle>> {
        let symbol = symbol.to_owned();
        let tokens = tokens.clone();
        Box::pin(async move {
            let mut backoff = Duration::from_secs(INITIAL_BACKOFF_SECS);

            for attempt in 1..=self.max_retries {
                tokens.acquire().await;

                match self.try_fetch_candles(&symbol, timeframe, start_ms).await {
                    Ok(rows) => return rows,
                    Err(reason) => {
                        warn!(
                            symbol = %symbol,
                            timeframe = %timeframe,
                            attempt,
                            reason = %reason,
                            "kline fetch attempt failed"
                        );
                        if attempt < self.max_retries {
                            sleep(backoff).await;
                            backoff *= 2;
                        }
                    }
                }
            }

            warn!(
                symbol = %symbol,
                timeframe = %timeframe,
                "kline fetch exhausted retries, yielding empty page"
            );
            Vec::new()
        })
    }

    fn fetch_tickers<'a>(&'a self, tokens: &'a TokenBucket) -> BoxFuture<'a, Vec<Ticker>> {
        Box::pin(async move {
            let mut backoff = Duration::from_secs(INITIAL_BACKOFF_SECS);

            for attempt in 1..=self.max_retries {
                tokens.acquire().await;

                match self.try_fetch_tickers().await {
                    Ok(tickers) => {
                        info!(count = tickers.len(), "ticker snapshot fetched");
                        return tickers;
                    }
                    Err(reason) => {
                        warn!(attempt, reason = %reason, "ticker fetch attempt failed");
                        if attempt < self.max_retries {
                            sleep(backoff).await;
                            backoff *= 2;
                        }
                    }
                }
            }

            warn!("ticker fetch exhausted retries, yielding empty snapshot");
            Vec::new()
        })
    }
}

impl BybitExchange {
    async fn try_fetch_candles(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        start_ms: i64,
    ) -> Result<Vec<Candle>, Report<ExchangeError>> {
        let url = format!("{BASE_URL}/v5/market/kline");
        let limit = KLINE_LIMIT.to_string();
        let start = start_ms.to_string();
        let params = [
            ("category", "linear"),
            ("symbol", symbol),
            ("interval", timeframe.bybit_interval()),
            ("limit", limit.as_str()),
            ("start", start.as_str()),
        ];

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .change_context(ExchangeError::Request {
                exchange: "bybit".into(),
            })?;

        if !response.status().is_success() {
            return Err(Report::new(ExchangeError::Request {
                exchange: "bybit".into(),
            })
            .attach(format!("HTTP status: {}", response.status())));
        }

        let body: BybitEnvelope<BybitKlineResult> =
            response
                .json()
                .await
                .change_context(ExchangeError::ResponseParse {
                    exchange: "bybit".into(),
                })?;

        if body.ret_code != 0 {
            return Err(Report::new(ExchangeError::ApiError {
                exchange: "bybit".into(),
                code: body.ret_code,
            })
            .attach(body.ret_msg));
        }

        body.result
            .list
            .into_iter()
            .map(|row| row.into_candle(symbol))
            .collect()
    }

    async fn try_fetch_tickers(&self) -> Result<Vec<Ticker>, Report<ExchangeError>> {
        let url = format!("{BASE_URL}/v5/market/tickers");
        let response = self
            .client
            .get(&url)
            .query(&[("category", "linear")])
            .send()
            .await
            .change_context(ExchangeError::Request {
                exchange: "bybit".into(),
            })?;

        if !response.status().is_success() {
            return Err(Report::new(ExchangeError::Request {
                exchange: "bybit".into(),
            })
            .attach(format!("HTTP status: {}", response.status())));
        }

        let body: BybitEnvelope<BybitTickerResult> =
            response
                .json()
                .await
                .change_context(ExchangeError::ResponseParse {
                    exchange: "bybit".into(),
                })?;

        if body.ret_code != 0 {
            return Err(Report::new(ExchangeError::ApiError {
                exchange: "bybit".into(),
                code: body.ret_code,
            })
            .attach(body.ret_msg));
        }

        Ok(body.result.list.into_iter().map(|t| t.into_ticker()).collect())
    }
}

// ── REST response types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BybitEnvelope<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: T,
}

#[derive(Debug, Deserialize)]
struct BybitKlineResult {
    list: Vec<BybitKlineRow>,
}

/// `[open_time_ms, open, high, low, close, volume, turnover]`, all strings.
#[derive(Debug, Deserialize)]
struct BybitKlineRow(String, String, String, String, String, String, String);

impl BybitKlineRow {
    fn into_candle(self, symbol: &str) -> Result<Candle, Report<ExchangeError>> {
        let parse_f64 = |s: &str, field: &str| -> Result<f64, Report<ExchangeError>> {
            s.parse::<f64>()
                .change_context(ExchangeError::ResponseParse {
                    exchange: "bybit".into(),
                })
                .attach(format!("invalid {field}: {s:?}"))
        };

        let open_time = self.0.parse::<i64>().change_context(ExchangeError::ResponseParse {
            exchange: "bybit".into(),
        })
        .attach(format!("invalid open_time: {:?}", self.0))?;

        Ok(Candle {
            symbol: symbol.to_owned(),
            open_time,
            open: parse_f64(&self.1, "open")?,
            high: parse_f64(&self.2, "high")?,
            low: parse_f64(&self.3, "low")?,
            close: parse_f64(&self.4, "close")?,
            volume: parse_f64(&self.5, "volume")?,
            turnover: parse_f64(&self.6, "turnover")?.round() as i64,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BybitTickerResult {
    list: Vec<BybitTickerRow>,
}

#[derive(Debug, Deserialize)]
struct BybitTickerRow {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "indexPrice")]
    index_price: String,
    #[serde(rename = "markPrice")]
    mark_price: String,
    #[serde(rename = "prevPrice24h")]
    prev_price_24h: String,
    #[serde(rename = "price24hPcnt")]
    price_24h_pcnt: String,
    #[serde(rename = "highPrice24h")]
    high_price_24h: String,
    #[serde(rename = "lowPrice24h")]
    low_price_24h: String,
    #[serde(rename = "prevPrice1h")]
    prev_price_1h: String,
    #[serde(rename = "openInterest")]
    open_interest: String,
    #[serde(rename = "openInterestValue")]
    open_interest_value: String,
    #[serde(rename = "turnover24h")]
    turnover_24h: String,
    #[serde(rename = "volume24h")]
    volume_24h: String,
    #[serde(rename = "fundingRate")]
    funding_rate: String,
    #[serde(rename = "nextFundingTime")]
    next_funding_time: String,
    #[serde(rename = "predictedDeliveryPrice")]
    predicted_delivery_price: String,
    #[serde(rename = "basisRate")]
    basis_rate: String,
    #[serde(rename = "deliveryFeeRate")]
    delivery_fee_rate: String,
    #[serde(rename = "deliveryTime")]
    delivery_time: String,
    #[serde(rename = "ask1Size")]
    ask1_size: String,
    #[serde(rename = "bid1Price")]
    bid1_price: String,
    #[serde(rename = "ask1Price")]
    ask1_price: String,
    #[serde(rename = "bid1Size")]
    bid1_size: String,
    #[serde(default)]
    basis: String,
}

/// "null when missing or empty string", matching the original sync script's
/// `safe_float`.
fn safe_float(s: &str) -> Option<f64> {
    if s.is_empty() { None } else { s.parse().ok() }
}

/// Same coercion for integer-valued fields (`safe_int`).
fn safe_int(s: &str) -> Option<i64> {
    if s.is_empty() {
        None
    } else {
        s.parse::<f64>().ok().map(|v| v as i64)
    }
}

impl BybitTickerRow {
    fn into_ticker(self) -> Ticker {
        Ticker {
            symbol: self.symbol,
            last_price: safe_float(&self.last_price),
            index_price: safe_float(&self.index_price),
            mark_price: safe_float(&self.mark_price),
            prev_price_24h: safe_float(&self.prev_price_24h),
            price_24h_pcnt: safe_float(&self.price_24h_pcnt),
            high_price_24h: safe_float(&self.high_price_24h),
            low_price_24h: safe_float(&self.low_price_24h),
            prev_price_1h: safe_float(&self.prev_price_1h),
            open_interest: safe_float(&self.open_interest),
            open_interest_value: safe_float(&self.open_interest_value),
            turnover_24h: safe_float(&self.turnover_24h),
            volume_24h: safe_float(&self.volume_24h),
            funding_rate: safe_float(&self.funding_rate),
            next_funding_time: safe_int(&self.next_funding_time),
            predicted_delivery_price: safe_float(&self.predicted_delivery_price),
            basis_rate: safe_float(&self.basis_rate),
            delivery_fee_rate: safe_float(&self.delivery_fee_rate),
            delivery_time: safe_int(&self.delivery_time),
            ask1_size: safe_float(&self.ask1_size),
            bid1_price: safe_float(&self.bid1_price),
            ask1_price: safe_float(&self.ask1_price),
            bid1_size: safe_float(&self.bid1_size),
            basis: if self.basis.is_empty() {
                None
            } else {
                Some(self.basis)
            },
        }
    }
}
