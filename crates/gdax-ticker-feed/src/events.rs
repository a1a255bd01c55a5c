/*
[INPUT]:  Handlers registered by feed consumers
[OUTPUT]: Panic-isolated delivery of price and connection-state events
[POS]:    Runtime layer - consumer callback registry shared by the workers
[UPDATE]: When adding event kinds
*/

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;

use gdax_ticker_adapter::{Product, TickerUpdate};

use crate::connection::ConnectionState;

pub type PriceHandler = Arc<dyn Fn(&Product, &TickerUpdate) + Send + Sync>;
pub type StateHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Registered handlers. Handlers are called outside the lock, so a handler
/// may register further handlers.
#[derive(Default)]
pub struct Listeners {
    price: RwLock<Vec<PriceHandler>>,
    state: RwLock<Vec<StateHandler>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_price(&self, handler: PriceHandler) {
        self.price
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub fn add_state(&self, handler: StateHandler) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub fn notify_price(&self, product: &Product, update: &TickerUpdate) {
        let handlers = self
            .price
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(product, update))).is_err() {
                warn!(%product, sequence = update.sequence, "price handler panicked");
            }
        }
    }

    pub fn notify_state(&self, state: ConnectionState) {
        let handlers = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(state))).is_err() {
                warn!(%state, "connection state handler panicked");
            }
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let price = self.price.read().map(|h| h.len()).unwrap_or_default();
        let state = self.state.read().map(|h| h.len()).unwrap_or_default();
        f.debug_struct("Listeners")
            .field("price", &price)
            .field("state", &state)
            .finish()
    }
}
