/*
[INPUT]:  Desired product set (watch), feed endpoint, cancellation token
[OUTPUT]: Connection state transitions, confirmed-set snapshots, queued ticker updates
[POS]:    Runtime layer - the single owner of the socket and of subscription state
[UPDATE]: When changing the connection state machine, reconcile triggers or fault handling
*/

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, trace, warn};
use uuid::Uuid;

use gdax_ticker_adapter::{ChannelType, FeedError, FeedSocket, Product, ResponseMessage};

use crate::config::FeedConfig;
use crate::dispatcher::EventDispatcher;
use crate::events::Listeners;
use crate::reconcile::{ActiveSnapshot, SubscriptionReconciler};
use crate::retry::RetryScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    None,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::None => "none",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Publishes each state change once: to the watch channel for pollers and
/// to the notifier task for handlers.
#[derive(Debug)]
pub(crate) struct StatePublisher {
    current: ConnectionState,
    watch: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<ConnectionState>,
}

impl StatePublisher {
    pub(crate) fn new(
        watch: watch::Sender<ConnectionState>,
        events: mpsc::UnboundedSender<ConnectionState>,
    ) -> Self {
        let current = *watch.borrow();
        Self {
            current,
            watch,
            events,
        }
    }

    pub(crate) fn current(&self) -> ConnectionState {
        self.current
    }

    pub(crate) fn transition(&mut self, next: ConnectionState) {
        if next == self.current {
            return;
        }
        info!(from = %self.current, to = %next, "connection state changed");
        self.current = next;
        self.watch.send_replace(next);
        let _ = self.events.send(next);
    }
}

/// Deliver state events to handlers off the connection worker.
pub(crate) fn spawn_state_notifier(
    mut events: mpsc::UnboundedReceiver<ConnectionState>,
    listeners: Arc<Listeners>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(state) = events.recv().await {
            listeners.notify_state(state);
        }
    })
}

#[derive(Debug)]
enum SessionExit {
    Shutdown,
    /// Nothing desired, nothing confirmed, nothing in flight.
    Idle,
    Fault(FeedError),
}

enum SessionEvent {
    Shutdown,
    DesiredChanged(bool),
    Message(gdax_ticker_adapter::Result<Option<ResponseMessage>>),
}

/// Connection worker: connect, reconcile, read, and retry on faults.
pub struct ConnectionManager {
    endpoint: String,
    connect_timeout: Duration,
    liveness_timeout: Duration,
    desired: watch::Receiver<BTreeSet<Product>>,
    active: watch::Sender<ActiveSnapshot>,
    state: StatePublisher,
    reconciler: SubscriptionReconciler,
    retry: RetryScheduler,
    dispatcher: EventDispatcher,
    shutdown: CancellationToken,
    generation: u64,
}

impl ConnectionManager {
    pub(crate) fn new(
        config: &FeedConfig,
        desired: watch::Receiver<BTreeSet<Product>>,
        active: watch::Sender<ActiveSnapshot>,
        state: StatePublisher,
        dispatcher: EventDispatcher,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            connect_timeout: config.connect_timeout(),
            liveness_timeout: config.liveness_timeout(),
            desired,
            active,
            state,
            reconciler: SubscriptionReconciler::new(),
            retry: RetryScheduler::from_config(&config.retry),
            dispatcher,
            shutdown,
            generation: 0,
        }
    }

    pub async fn run(mut self) {
        'run: loop {
            if self.shutdown.is_cancelled() {
                break 'run;
            }

            // Park until there is something to stream.
            if self.desired.borrow_and_update().is_empty() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break 'run,
                    changed = self.desired.changed() => {
                        if changed.is_err() {
                            break 'run;
                        }
                    }
                }
                continue 'run;
            }

            self.state.transition(ConnectionState::Connecting);
            let connected = tokio::select! {
                _ = self.shutdown.cancelled() => break 'run,
                result = FeedSocket::connect(&self.endpoint, self.connect_timeout) => result,
            };

            let mut socket = match connected {
                Ok(socket) => socket.with_liveness_timeout(self.liveness_timeout),
                Err(err) => {
                    warn!(
                        endpoint = %self.endpoint,
                        error = %err,
                        retryable = err.is_retryable(),
                        "feed connect failed"
                    );
                    self.reset_subscriptions();
                    self.state.transition(ConnectionState::Closed);
                    if !self.backoff().await {
                        break 'run;
                    }
                    continue 'run;
                }
            };

            self.retry.reset();
            self.generation += 1;
            self.state.transition(ConnectionState::Open);
            self.publish_active();

            let span = info_span!(
                "feed_session",
                connection_id = %Uuid::new_v4(),
                generation = self.generation
            );
            let exit = self.session(&mut socket).instrument(span).await;

            self.state.transition(ConnectionState::Closing);
            match exit {
                SessionExit::Shutdown => {
                    self.close_socket(socket).await;
                    break 'run;
                }
                SessionExit::Idle => {
                    info!("no products desired; closing idle connection");
                    self.close_socket(socket).await;
                    self.reset_subscriptions();
                    self.state.transition(ConnectionState::Closed);
                }
                SessionExit::Fault(err) => {
                    warn!(error = %err, retryable = err.is_retryable(), "feed connection lost");
                    drop(socket);
                    self.reset_subscriptions();
                    self.state.transition(ConnectionState::Closed);
                    if !self.backoff().await {
                        break 'run;
                    }
                }
            }
        }

        self.reset_subscriptions();
        if self.state.current() != ConnectionState::None {
            self.state.transition(ConnectionState::Closed);
        }
        debug!("connection worker stopped");
    }

    async fn session(&mut self, socket: &mut FeedSocket) -> SessionExit {
        if let Err(err) = self.reconcile(socket).await {
            return SessionExit::Fault(err);
        }
        if self.is_idle() {
            return SessionExit::Idle;
        }

        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => SessionEvent::Shutdown,
                changed = self.desired.changed() => SessionEvent::DesiredChanged(changed.is_ok()),
                message = socket.next_message() => SessionEvent::Message(message),
            };

            let outcome = match event {
                SessionEvent::Shutdown | SessionEvent::DesiredChanged(false) => {
                    return SessionExit::Shutdown;
                }
                SessionEvent::DesiredChanged(true) => self.reconcile(socket).await,
                SessionEvent::Message(Err(err)) => return SessionExit::Fault(err),
                SessionEvent::Message(Ok(None)) => {
                    return SessionExit::Fault(FeedError::closed("closed by peer"));
                }
                SessionEvent::Message(Ok(Some(message))) => {
                    self.handle_message(socket, message).await
                }
            };

            if let Err(err) = outcome {
                return SessionExit::Fault(err);
            }
            if self.is_idle() {
                return SessionExit::Idle;
            }
        }
    }

    async fn handle_message(
        &mut self,
        socket: &mut FeedSocket,
        message: ResponseMessage,
    ) -> gdax_ticker_adapter::Result<()> {
        match message {
            ResponseMessage::Subscriptions(response) => {
                let confirmed = response.products_for(ChannelType::Ticker);
                let delta = self.reconciler.apply_confirmation(confirmed);
                info!(
                    active = self.reconciler.active().len(),
                    added = ?delta.added,
                    removed = ?delta.removed,
                    "subscriptions confirmed"
                );
                self.publish_active();
                self.reconcile(socket).await?;
            }
            ResponseMessage::Ticker(update) => {
                self.dispatcher.enqueue(update);
            }
            ResponseMessage::Heartbeat(heartbeat) => {
                trace!(sequence = ?heartbeat.sequence, "heartbeat");
            }
            ResponseMessage::Error(error) => {
                let err = FeedError::from(error);
                // The exchange answers a bad subscribe with an error instead
                // of a confirmation; stop waiting on it.
                let rejected = self.reconciler.reject_pending_subscribes();
                warn!(error = %err, rejected = ?rejected, "feed reported error");
                if !rejected.is_empty() {
                    self.publish_active();
                }
            }
            ResponseMessage::Other(_) => {}
        }
        Ok(())
    }

    /// Send the requests that move the confirmed set toward the desired set.
    async fn reconcile(&mut self, socket: &mut FeedSocket) -> gdax_ticker_adapter::Result<()> {
        let desired = self.desired.borrow_and_update().clone();
        self.reconciler.release_rejected(&desired);
        let plan = self.reconciler.plan(&desired);
        if plan.is_empty() {
            return Ok(());
        }

        debug!(subscribe = ?plan.subscribe, unsubscribe = ?plan.unsubscribe, "reconciling");
        for request in plan.requests() {
            socket.send(&request).await?;
        }
        self.reconciler.mark_sent(&plan);
        self.publish_active();
        Ok(())
    }

    fn is_idle(&self) -> bool {
        self.desired.borrow().is_empty() && self.reconciler.is_idle()
    }

    fn reset_subscriptions(&mut self) {
        self.reconciler.clear();
        self.publish_active();
    }

    fn publish_active(&self) {
        let next = self.reconciler.snapshot(self.generation);
        self.active.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    async fn close_socket(&self, socket: FeedSocket) {
        match tokio::time::timeout(self.connect_timeout, socket.close()).await {
            Ok(Ok(())) => debug!("feed socket closed"),
            Ok(Err(err)) => debug!(error = %err, "feed socket close failed"),
            Err(_) => debug!("feed socket close timed out"),
        }
    }

    /// Sleep before the next attempt. Returns false when cancelled.
    async fn backoff(&mut self) -> bool {
        let delay = self.retry.next_delay();
        info!(attempt = self.retry.attempts(), ?delay, "reconnecting after backoff");
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
