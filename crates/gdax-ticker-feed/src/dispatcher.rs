/*
[INPUT]:  Ticker updates from the connection worker + confirmed product snapshots
[OUTPUT]: Ordered, de-duplicated PriceUpdated callbacks on a dedicated task
[POS]:    Runtime layer - hand-off between the socket read path and consumers
[UPDATE]: When changing queueing, requeue or sequence gating behavior
*/

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use gdax_ticker_adapter::TickerUpdate;

use crate::config::DispatchConfig;
use crate::events::Listeners;
use crate::reconcile::ActiveSnapshot;
use crate::sequence::{SequenceFilter, Verdict};

const FULL_WARN_EVERY: u64 = 100;

/// Ingress side of the dispatch queue. Never waits: a full queue drops.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    tx: mpsc::Sender<TickerUpdate>,
    dropped: Arc<AtomicU64>,
}

impl EventDispatcher {
    /// Spawn the dispatch worker and return the handle to feed it.
    pub fn spawn(
        config: &DispatchConfig,
        active: watch::Receiver<ActiveSnapshot>,
        listeners: Arc<Listeners>,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let worker = DispatchWorker {
            rx,
            active,
            listeners,
            shutdown,
            filter: SequenceFilter::new(),
            held: VecDeque::new(),
            next_retry: None,
            requeue_delay: config.requeue_delay(),
            max_requeue_attempts: config.max_requeue_attempts,
        };
        let handle = tokio::spawn(worker.run());

        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            handle,
        )
    }

    /// Queue an update for delivery. Returns false when it was dropped.
    pub fn enqueue(&self, update: TickerUpdate) -> bool {
        match self.tx.try_send(update) {
            Ok(()) => true,
            Err(TrySendError::Full(update)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % FULL_WARN_EVERY == 0 {
                    warn!(
                        product = %update.product,
                        sequence = update.sequence,
                        dropped,
                        "dispatch queue full; dropping ticker update"
                    );
                }
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct Held {
    update: TickerUpdate,
    attempts: u32,
}

enum Step {
    Shutdown,
    Received(Option<TickerUpdate>),
    ActiveChanged(bool),
    RetryDue,
}

struct DispatchWorker {
    rx: mpsc::Receiver<TickerUpdate>,
    active: watch::Receiver<ActiveSnapshot>,
    listeners: Arc<Listeners>,
    shutdown: CancellationToken,
    filter: SequenceFilter,
    /// Updates for products not confirmed yet, in arrival order.
    held: VecDeque<Held>,
    next_retry: Option<Instant>,
    requeue_delay: Duration,
    max_requeue_attempts: u32,
}

impl DispatchWorker {
    async fn run(mut self) {
        self.sync_filter();

        loop {
            let retry_at = self.next_retry;
            let step = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Step::Shutdown,
                changed = self.active.changed() => Step::ActiveChanged(changed.is_ok()),
                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => Step::RetryDue,
                update = self.rx.recv() => Step::Received(update),
            };

            match step {
                Step::Shutdown | Step::Received(None) | Step::ActiveChanged(false) => break,
                Step::ActiveChanged(true) => {
                    self.sync_filter();
                    self.retry_held();
                }
                Step::RetryDue => self.retry_held(),
                Step::Received(Some(update)) => self.handle(update),
            }
        }

        debug!(held = self.held.len(), "dispatch worker stopped");
    }

    fn sync_filter(&mut self) {
        let snapshot = self.active.borrow_and_update().clone();
        self.filter.sync(&snapshot);
    }

    fn handle(&mut self, update: TickerUpdate) {
        // Later updates queue behind held ones for the same product.
        if self.held.iter().any(|held| held.update.product == update.product) {
            self.hold(update, 0);
            return;
        }
        self.deliver(update, 0);
    }

    fn deliver(&mut self, update: TickerUpdate, attempts: u32) {
        match self.filter.accept(&update.product, update.sequence) {
            Verdict::Accepted => self.listeners.notify_price(&update.product, &update),
            Verdict::Stale { last_seen } => {
                trace!(
                    product = %update.product,
                    sequence = update.sequence,
                    last_seen,
                    "stale ticker update dropped"
                );
            }
            Verdict::Unknown if attempts < self.max_requeue_attempts => {
                self.hold(update, attempts + 1);
            }
            Verdict::Unknown => {
                debug!(
                    product = %update.product,
                    sequence = update.sequence,
                    attempts,
                    "ticker update for unconfirmed product dropped"
                );
            }
        }
    }

    fn hold(&mut self, update: TickerUpdate, attempts: u32) {
        self.held.push_back(Held { update, attempts });
        if self.next_retry.is_none() {
            self.next_retry = Some(Instant::now() + self.requeue_delay);
        }
    }

    fn retry_held(&mut self) {
        self.next_retry = None;
        let held = std::mem::take(&mut self.held);
        for Held { update, attempts } in held {
            self.deliver(update, attempts);
        }
    }
}
