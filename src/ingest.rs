use std::sync::Arc;

use error_stack::{Report, ResultExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::error::StorageError;
use crate::exchange::Exchange;
use crate::model::{Candle, Symbol, TimeFrame};
use crate::ratelimiter::{self, TokenBucket};
use crate::storage::Storage;

/// Bybit returns at most this many rows per kline request; fewer than
/// this in a response means the backlog for that symbol is exhausted.
const KLINE_PAGE_SIZE: usize = 1000;

/// A chunk of fetched rows for one symbol, or the end-of-stream sentinel.
enum WriterMessage {
    Chunk(Symbol, Vec<Candle>),
    EndOfStream,
}

/// Run one full backfill pass: every timeframe in
/// [`TimeFrame::ALL_COARSEST_FIRST`] order, over every symbol currently
/// known to storage (§4.F).
pub async fn run_pipeline(
    exchange: Arc<dyn Exchange>,
    storage: Arc<dyn Storage>,
    config: &IngestConfig,
) -> Result<(), Report<StorageError>> {
    for timeframe in TimeFrame::ALL_COARSEST_FIRST {
        run_timeframe_pass(Arc::clone(&exchange), Arc::clone(&storage), config, timeframe).await?;
    }
    Ok(())
}

async fn run_timeframe_pass(
    exchange: Arc<dyn Exchange>,
    storage: Arc<dyn Storage>,
    config: &IngestConfig,
    timeframe: TimeFrame,
) -> Result<(), Report<StorageError>> {
    let symbols = storage.list_symbols().await?;
    if symbols.is_empty() {
        warn!(timeframe = %timeframe, "no symbols known to storage, skipping pass");
        return Ok(());
    }

    info!(
        timeframe = %timeframe,
        symbols = symbols.len(),
        "starting backfill pass"
    );

    let cancel = CancellationToken::new();
    let tokens = ratelimiter::spawn(config.requests_per_second, cancel.clone());
    let (writer_tx, writer_rx) = mpsc::unbounded_channel::<WriterMessage>();

    let writer_storage = Arc::clone(&storage);
    let writer_handle = tokio::spawn(run_writer(writer_storage, timeframe, writer_rx));

    let semaphore = Arc::new(tokio::sync::Semaphore::new(
        config.max_concurrent_requests as usize,
    ));
    let mut fetcher_handles = Vec::with_capacity(symbols.len());

    for symbol in symbols {
        let exchange = Arc::clone(&exchange);
        let storage = Arc::clone(&storage);
        let tokens = tokens.clone();
        let writer_tx = writer_tx.clone();
        let semaphore = Arc::clone(&semaphore);
        let default_start = config.default_start_timestamp_ms;

        fetcher_handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore not closed");
            run_symbol_backlog(
                exchange.as_ref(),
                storage.as_ref(),
                &tokens,
                &writer_tx,
                timeframe,
                symbol,
                default_start,
            )
            .await;
        }));
    }

    for handle in fetcher_handles {
        let _ = handle.await;
    }

    let _ = writer_tx.send(WriterMessage::EndOfStream);
    writer_handle.await.change_context(StorageError::Insert)??;

    cancel.cancel();
    info!(timeframe = %timeframe, "backfill pass complete");
    Ok(())
}

/// Per-symbol loop (§4.F step 3): page through the backlog from the
/// stored watermark until the exchange returns a short page.
async fn run_symbol_backlog(
    exchange: &dyn Exchange,
    storage: &dyn Storage,
    tokens: &TokenBucket,
    writer_tx: &mpsc::UnboundedSender<WriterMessage>,
    timeframe: TimeFrame,
    symbol: Symbol,
    default_start_ms: i64,
) {
    let mut start = match storage.last_open_time(&symbol, timeframe).await {
        Ok(Some(last)) => last,
        Ok(None) => default_start_ms,
        Err(err) => {
            warn!(symbol = %symbol, timeframe = %timeframe, error = ?err, "failed to read watermark, skipping symbol");
            return;
        }
    };

    loop {
        let mut rows = exchange
            .fetch_candles(&symbol, timeframe, start, tokens)
            .await;
        if rows.is_empty() {
            break;
        }

        rows.sort_by_key(|c| c.open_time);

        let page_len = rows.len();
        let end = rows.last().expect("non-empty").open_time;

        if writer_tx
            .send(WriterMessage::Chunk(symbol.clone(), rows))
            .is_err()
        {
            break;
        }

        // 2ms overlap re-fetches the still-forming bar next round; the
        // primary-key upsert makes this idempotent.
        start = end - 2;

        if page_len < KLINE_PAGE_SIZE {
            break;
        }
    }
}

/// Single writer task: serializes upserts per timeframe so no two
/// fetchers race on the same table.
async fn run_writer(
    storage: Arc<dyn Storage>,
    timeframe: TimeFrame,
    mut rx: mpsc::UnboundedReceiver<WriterMessage>,
) -> Result<(), Report<StorageError>> {
    while let Some(message) = rx.recv().await {
        match message {
            WriterMessage::EndOfStream => break,
            WriterMessage::Chunk(symbol, rows) => {
                let written = rows.len();
                storage.upsert_candles(timeframe, &rows).await.inspect_err(|err| {
                    warn!(symbol = %symbol, timeframe = %timeframe, error = ?err, "upsert failed, aborting writer");
                })?;
                tracing::debug!(symbol = %symbol, timeframe = %timeframe, written, "chunk upserted");
            }
        }
    }
    Ok(())
}
