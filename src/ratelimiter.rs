use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A shared pool of request permits, topped up at a fixed rate by a
/// dedicated emitter task. Consumers block on [`TokenBucket::acquire`]
/// until a permit is available; permits are never returned, so the
/// bucket never bursts beyond the natural backlog of a slow consumer.
#[derive(Clone)]
pub struct TokenBucket {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<()>>>,
}

impl TokenBucket {
    /// Block until one permit is available.
    pub async fn acquire(&self) {
        let mut rx = self.rx.lock().await;
        let _ = rx.recv().await;
    }
}

/// Spawn the emitter task and return a handle consumers can clone freely.
///
/// The task stops once `cancel` fires, matching the per-timeframe-pass
/// lifecycle: one bucket is spun up and torn down around each pass.
pub fn spawn(requests_per_second: u32, cancel: CancellationToken) -> TokenBucket {
    let (tx, rx) = mpsc::unbounded_channel();
    let period = Duration::from_secs_f64(1.0 / requests_per_second.max(1) as f64);

    tokio::spawn(async move {
        let mut ticks = interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("token emitter cancelled");
                    break;
                }
                _ = ticks.tick() => {
                    if tx.send(()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    TokenBucket {
        rx: Arc::new(Mutex::new(rx)),
    }
}
