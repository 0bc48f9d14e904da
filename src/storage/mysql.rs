use std::future::Future;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::{MySqlPool, Row};
use tokio::time::sleep;
use tracing::warn;

use crate::error::StorageError;
use crate::model::{Candle, Symbol, Ticker, TimeFrame};
use crate::storage::Storage;

const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);
/// MySQL error code for "Deadlock found when trying to get lock".
const DEADLOCK_ERROR_CODE: &str = "1213";

pub struct MysqlStorage {
    pool: MySqlPool,
    max_retries: u32,
    retry_delay: Duration,
}

impl MysqlStorage {
    /// Connect and run any pending migrations.
    ///
    /// `max_connections` should be `2 * MAX_CONCURRENT_REQUESTS` per §4.D,
    /// so both fetchers and the read API never starve each other.
    pub async fn connect(
        options: MySqlConnectOptions,
        max_connections: u32,
    ) -> Result<Self, Report<StorageError>> {
        Self::connect_with_retry_policy(
            options,
            max_connections,
            DEFAULT_MAX_RETRIES,
            DEFAULT_RETRY_DELAY,
        )
        .await
    }

    /// Connect with an explicit deadlock-retry policy (§4.D: `max_retries`,
    /// `retry_delay_ms` from configuration).
    pub async fn connect_with_retry_policy(
        options: MySqlConnectOptions,
        max_connections: u32,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Result<Self, Report<StorageError>> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .change_context(StorageError::Migration)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .change_context(StorageError::Migration)?;

        Ok(Self {
            pool,
            max_retries: max_retries.max(1),
            retry_delay,
        })
    }

    /// Trivial liveness probe for the `/api/test-db` handler.
    pub async fn ping(&self) -> Result<(), Report<StorageError>> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .change_context(StorageError::Query)?;
        Ok(())
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Most recent `limit` candles for `symbol` in `timeframe`'s table,
    /// returned ascending by `open_time` for the read API (§4.G).
    pub async fn recent_candles(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        limit: usize,
    ) -> Result<Vec<Candle>, Report<StorageError>> {
        let query = format!(
            "SELECT symbol, open_time, open, high, low, close, turnover, volume \
             FROM {} WHERE symbol = ? ORDER BY open_time DESC LIMIT ?",
            timeframe.table_name()
        );
        let rows = sqlx::query(&query)
            .bind(symbol)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .change_context(StorageError::Query)?;

        let mut candles: Vec<Candle> = rows
            .into_iter()
            .map(|row| Candle {
                symbol: row.get("symbol"),
                open_time: row.get("open_time"),
                open: row.get("open"),
                high: row.get("high"),
                low: row.get("low"),
                close: row.get("close"),
                volume: row.get("volume"),
                turnover: row.get("turnover"),
            })
            .collect();
        candles.reverse();
        Ok(candles)
    }

    /// Full current ticker snapshot, ordered by `turnover24h` descending
    /// and filtered to rows with positive turnover (§6 `/api/symbols`).
    pub async fn ticker_snapshot(&self) -> Result<Vec<Ticker>, Report<StorageError>> {
        let rows = sqlx::query(
            "SELECT symbol, lastPrice, price24hPcnt, turnover24h FROM tickers \
             WHERE turnover24h > 0 ORDER BY turnover24h DESC",
        )
        .fetch_all(&self.pool)
        .await
        .change_context(StorageError::Query)?;

        Ok(rows
            .into_iter()
            .map(|row| Ticker {
                symbol: row.get("symbol"),
                last_price: row.get("lastPrice"),
                price_24h_pcnt: row.get("price24hPcnt"),
                turnover_24h: row.get("turnover24h"),
                ..Default::default()
            })
            .collect())
    }
}

fn is_deadlock(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(DEADLOCK_ERROR_CODE))
}

/// Retry `attempt` up to `max_retries` times on a MySQL deadlock,
/// sleeping `retry_delay` between tries; any other error propagates
/// immediately.
async fn with_deadlock_retry<T, F, Fut>(
    max_retries: u32,
    retry_delay: Duration,
    mut attempt: F,
) -> Result<T, Report<StorageError>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    for try_number in 1..=max_retries {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if is_deadlock(&err) && try_number < max_retries => {
                warn!(try_number, "mysql deadlock detected, retrying");
                sleep(retry_delay).await;
            }
            Err(err) if is_deadlock(&err) => {
                return Err(Report::new(StorageError::DeadlockRetriesExhausted));
            }
            Err(err) => return Err(Report::new(err).change_context(StorageError::Insert)),
        }
    }
    unreachable!("loop always returns within max_retries iterations")
}

impl Storage for MysqlStorage {
    fn list_symbols(&self) -> BoxFuture<'_, Result<Vec<Symbol>, Report<StorageError>>> {
        Box::pin(async move {
            let rows = sqlx::query("SELECT symbol FROM tickers ORDER BY turnover24h DESC")
                .fetch_all(&self.pool)
                .await
                .change_context(StorageError::Query)?;
            Ok(rows.into_iter().map(|r| r.get("symbol")).collect())
        })
    }

    fn last_open_time(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
    ) -> BoxFuture<'_, Result<Option<i64>, Report<StorageError>>> {
        let symbol = symbol.to_owned();
        Box::pin(async move {
            let query = format!(
                "SELECT MAX(open_time) AS max_open_time FROM {} WHERE symbol = ?",
                timeframe.table_name()
            );
            let row = sqlx::query(&query)
                .bind(&symbol)
                .fetch_one(&self.pool)
                .await
                .change_context(StorageError::Query)?;
            Ok(row.try_get::<Option<i64>, _>("max_open_time").unwrap_or(None))
        })
    }

    fn upsert_candles(
        &self,
        timeframe: TimeFrame,
        rows: &[Candle],
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let rows = rows.to_vec();
        Box::pin(async move {
            if rows.is_empty() {
                return Ok(());
            }
            let table = timeframe.table_name();

            with_deadlock_retry(self.max_retries, self.retry_delay, || {
                let rows = &rows;
                async move {
                    let mut sql = format!(
                        "INSERT INTO {table} \
                         (symbol, open_time, open_datetime, open, high, low, close, volume, turnover) \
                         VALUES "
                    );
                    for i in 0..rows.len() {
                        if i > 0 {
                            sql.push(',');
                        }
                        sql.push_str("(?, ?, ?, ?, ?, ?, ?, ?, ?)");
                    }
                    sql.push_str(
                        " ON DUPLICATE KEY UPDATE \
                         open_datetime = VALUES(open_datetime), \
                         open = VALUES(open), high = VALUES(high), \
                         low = VALUES(low), close = VALUES(close), \
                         volume = VALUES(volume), turnover = VALUES(turnover)",
                    );

                    let mut query = sqlx::query(&sql);
                    for c in rows {
                        query = query
                            .bind(&c.symbol)
                            .bind(c.open_time)
                            .bind(c.open_datetime())
                            .bind(c.open)
                            .bind(c.high)
                            .bind(c.low)
                            .bind(c.close)
                            .bind(c.volume)
                            .bind(c.turnover);
                    }

                    let mut tx = self.pool.begin().await?;
                    query.execute(&mut *tx).await?;
                    tx.commit().await
                }
            })
            .await
        })
    }

    fn truncate_tickers(&self) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        Box::pin(async move {
            sqlx::query("TRUNCATE TABLE tickers")
                .execute(&self.pool)
                .await
                .change_context(StorageError::Insert)?;
            Ok(())
        })
    }

    fn insert_ticker(&self, ticker: &Ticker) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let ticker = ticker.clone();
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO tickers \
                 (symbol, lastPrice, indexPrice, markPrice, prevPrice24h, price24hPcnt, \
                  highPrice24h, lowPrice24h, prevPrice1h, openInterest, openInterestValue, \
                  turnover24h, volume24h, fundingRate, nextFundingTime, predictedDeliveryPrice, \
                  basisRate, deliveryFeeRate, deliveryTime, ask1Size, bid1Price, ask1Price, \
                  bid1Size, basis) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&ticker.symbol)
            .bind(ticker.last_price)
            .bind(ticker.index_price)
            .bind(ticker.mark_price)
            .bind(ticker.prev_price_24h)
            .bind(ticker.price_24h_pcnt)
            .bind(ticker.high_price_24h)
            .bind(ticker.low_price_24h)
            .bind(ticker.prev_price_1h)
            .bind(ticker.open_interest)
            .bind(ticker.open_interest_value)
            .bind(ticker.turnover_24h)
            .bind(ticker.volume_24h)
            .bind(ticker.funding_rate)
            .bind(ticker.next_funding_time)
            .bind(ticker.predicted_delivery_price)
            .bind(ticker.basis_rate)
            .bind(ticker.delivery_fee_rate)
            .bind(ticker.delivery_time)
            .bind(ticker.ask1_size)
            .bind(ticker.bid1_price)
            .bind(ticker.ask1_price)
            .bind(ticker.bid1_size)
            .bind(ticker.basis)
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)?;
            Ok(())
        })
    }

    fn delete_symbol_everywhere(
        &self,
        symbols: &[Symbol],
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let symbols = symbols.to_vec();
        Box::pin(async move {
            for symbol in &symbols {
                sqlx::query("DELETE FROM tickers WHERE symbol = ?")
                    .bind(symbol)
                    .execute(&self.pool)
                    .await
                    .change_context(StorageError::Insert)?;

                for timeframe in TimeFrame::ALL_COARSEST_FIRST {
                    let query = format!("DELETE FROM {} WHERE symbol = ?", timeframe.table_name());
                    sqlx::query(&query)
                        .bind(symbol)
                        .execute(&self.pool)
                        .await
                        .change_context(StorageError::Insert)?;
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn deadlock_code_matches_mysql_1213() {
        assert_eq!(DEADLOCK_ERROR_CODE, "1213");
    }

    /// Requires a live MySQL instance reachable via `TEST_DATABASE_URL`.
    /// Run with `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn integration_upsert_is_idempotent() {
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL not set");
        let options = MySqlConnectOptions::from_str(&url).unwrap();
        let storage = MysqlStorage::connect(options, 4).await.unwrap();

        let candle = Candle {
            symbol: "BTCUSDT".into(),
            open_time: 1_700_000_000_000,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
            turnover: 1,
        };

        storage
            .upsert_candles(TimeFrame::Hour1, &[candle.clone()])
            .await
            .unwrap();
        storage
            .upsert_candles(TimeFrame::Hour1, &[candle])
            .await
            .unwrap();

        let last = storage
            .last_open_time("BTCUSDT", TimeFrame::Hour1)
            .await
            .unwrap();
        assert_eq!(last, Some(1_700_000_000_000));
    }
}
