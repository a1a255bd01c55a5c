/*
[INPUT]:  Subscribe/Unsubscribe calls from any thread, registered event handlers
[OUTPUT]: PriceUpdated and ConnectionStateChanged events, subscription snapshots
[POS]:    Public API - the feed client consumers hold
[UPDATE]: When the public feed contract changes
*/

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, anyhow};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gdax_ticker_adapter::{Product, TickerUpdate};

use crate::config::FeedConfig;
use crate::connection::{ConnectionManager, ConnectionState, StatePublisher, spawn_state_notifier};
use crate::dispatcher::EventDispatcher;
use crate::events::Listeners;
use crate::reconcile::ActiveSnapshot;

/// The contract consumers (UI, settings restore) depend on.
pub trait PriceFeed: Send + Sync {
    fn subscribe(&self, product: Product);
    fn unsubscribe(&self, product: &Product);
    fn stop(&self);
}

/// Ticker feed client.
///
/// `subscribe`/`unsubscribe` only edit the desired set and wake the
/// connection worker; they never touch the socket and never block.
pub struct Feed {
    desired: watch::Sender<BTreeSet<Product>>,
    state: watch::Receiver<ConnectionState>,
    active: watch::Receiver<ActiveSnapshot>,
    listeners: Arc<Listeners>,
    dispatcher: EventDispatcher,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Feed {
    /// Spawn the connection worker, the dispatch worker and the state
    /// notifier on the current Tokio runtime.
    pub fn start(config: FeedConfig) -> anyhow::Result<Self> {
        tokio::runtime::Handle::try_current()
            .map_err(|_| anyhow!("Feed::start requires a Tokio runtime"))?;
        config.validate().context("invalid feed configuration")?;

        let shutdown = CancellationToken::new();
        let listeners = Arc::new(Listeners::new());
        let (desired_tx, desired_rx) = watch::channel(BTreeSet::new());
        let (active_tx, active_rx) = watch::channel(ActiveSnapshot::default());
        let (state_tx, state_rx) = watch::channel(ConnectionState::None);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let (dispatcher, dispatch_handle) = EventDispatcher::spawn(
            &config.dispatch,
            active_rx.clone(),
            listeners.clone(),
            shutdown.clone(),
        );
        let notifier_handle = spawn_state_notifier(events_rx, listeners.clone());
        let manager = ConnectionManager::new(
            &config,
            desired_rx,
            active_tx,
            StatePublisher::new(state_tx, events_tx),
            dispatcher.clone(),
            shutdown.clone(),
        );
        let connection_handle = tokio::spawn(manager.run());

        info!(endpoint = %config.endpoint, "feed started");

        Ok(Self {
            desired: desired_tx,
            state: state_rx,
            active: active_rx,
            listeners,
            dispatcher,
            shutdown,
            workers: Mutex::new(vec![connection_handle, dispatch_handle, notifier_handle]),
        })
    }

    /// Add a product to the desired set. Always wakes the connection worker,
    /// so repeating a subscribe triggers a reconcile pass.
    pub fn subscribe(&self, product: Product) {
        debug!(%product, "subscribe requested");
        self.desired.send_modify(|desired| {
            desired.insert(product);
        });
    }

    /// Remove a product from the desired set; a no-op when absent.
    pub fn unsubscribe(&self, product: &Product) {
        let removed = self
            .desired
            .send_if_modified(|desired| desired.remove(product));
        if removed {
            debug!(%product, "unsubscribe requested");
        }
    }

    /// Signal both workers to shut down. Idempotent.
    pub fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            info!("feed stop requested");
        }
        self.shutdown.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait for the workers to exit. Call after [`Feed::stop`].
    pub async fn join(&self) {
        let handles = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "feed worker ended abnormally");
            }
        }
    }

    pub fn on_price_updated<F>(&self, handler: F)
    where
        F: Fn(&Product, &TickerUpdate) + Send + Sync + 'static,
    {
        self.listeners.add_price(Arc::new(handler));
    }

    pub fn on_connection_state_changed<F>(&self, handler: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.listeners.add_state(Arc::new(handler));
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Confirmed and in-flight products plus the connection generation.
    pub fn subscriptions(&self) -> ActiveSnapshot {
        self.active.borrow().clone()
    }

    pub fn subscribe_subscriptions(&self) -> watch::Receiver<ActiveSnapshot> {
        self.active.clone()
    }

    pub fn desired_products(&self) -> BTreeSet<Product> {
        self.desired.borrow().clone()
    }

    /// Ticker updates dropped because the dispatch queue was full.
    pub fn dropped_updates(&self) -> u64 {
        self.dispatcher.dropped()
    }
}

impl PriceFeed for Feed {
    fn subscribe(&self, product: Product) {
        Feed::subscribe(self, product);
    }

    fn unsubscribe(&self, product: &Product) {
        Feed::unsubscribe(self, product);
    }

    fn stop(&self) {
        Feed::stop(self);
    }
}

impl Drop for Feed {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed")
            .field("state", &*self.state.borrow())
            .field("desired", &*self.desired.borrow())
            .field("stopped", &self.shutdown.is_cancelled())
            .finish()
    }
}
