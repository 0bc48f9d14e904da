use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
}

#[derive(Debug, Display, Error)]
pub enum ExchangeError {
    #[display("request to {exchange} failed")]
    Request { exchange: String },
    #[display("failed to parse response from {exchange}")]
    ResponseParse { exchange: String },
    #[display("{exchange} API returned retCode {code}")]
    ApiError { exchange: String, code: i64 },
}

#[derive(Debug, Display, Error)]
pub enum StorageError {
    #[display("database migration failed")]
    Migration,
    #[display("failed to insert data")]
    Insert,
    #[display("failed to query data")]
    Query,
    #[display("deadlock retries exhausted")]
    DeadlockRetriesExhausted,
}

#[derive(Debug, Display, Error)]
pub enum IndicatorError {
    #[display("invalid parameter: {name}")]
    InvalidParameter { name: String },
}

#[derive(Debug, Display, Error)]
pub enum ReconcileError {
    #[display("no tickers returned from exchange")]
    EmptyTickerSet,
    #[display("storage operation failed during reconciliation")]
    StorageFailure,
}

#[derive(Debug, Display, Error)]
pub enum HttpError {
    #[display("unknown timeframe: {timeframe}")]
    UnknownTimeframe { timeframe: String },
    #[display("unknown indicator: {indicator}")]
    UnknownIndicator { indicator: String },
    #[display("database error")]
    Database,
}
