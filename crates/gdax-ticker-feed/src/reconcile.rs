/*
[INPUT]:  Desired product set, server-confirmed ticker products, in-flight requests
[OUTPUT]: Batched subscribe/unsubscribe plans and confirmed-set deltas
[POS]:    Runtime layer - subscription convergence (owned by the connection worker)
[UPDATE]: When changing how requests are batched or confirmations are applied
*/

use std::collections::{BTreeMap, BTreeSet};

use gdax_ticker_adapter::{Product, RequestMessage, RequestType};

/// Requests needed to move the confirmed set toward the desired set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub subscribe: Vec<Product>,
    pub unsubscribe: Vec<Product>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }

    /// At most one batched request per direction.
    pub fn requests(&self) -> Vec<RequestMessage> {
        let mut requests = Vec::with_capacity(2);
        if !self.subscribe.is_empty() {
            requests.push(RequestMessage::subscribe(self.subscribe.iter().cloned()));
        }
        if !self.unsubscribe.is_empty() {
            requests.push(RequestMessage::unsubscribe(self.unsubscribe.iter().cloned()));
        }
        requests
    }
}

/// Read-only view of subscription state published by the connection worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveSnapshot {
    /// Bumped on every successful open; a new generation starts empty.
    pub generation: u64,
    pub products: BTreeSet<Product>,
    pub pending: BTreeSet<Product>,
    /// Confirmation serial per confirmed product. A product dropped and
    /// confirmed again gets a new serial even if no snapshot in between
    /// was observed.
    pub serials: BTreeMap<Product, u64>,
}

impl ActiveSnapshot {
    pub fn contains(&self, product: &Product) -> bool {
        self.products.contains(product)
    }
}

/// Products added to and removed from the confirmed set by one confirmation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmationDelta {
    pub added: Vec<Product>,
    pub removed: Vec<Product>,
}

#[derive(Debug, Default)]
pub struct SubscriptionReconciler {
    active: BTreeSet<Product>,
    pending: BTreeMap<Product, RequestType>,
    /// Subscribes the server answered with an error on this connection.
    rejected: BTreeSet<Product>,
    serials: BTreeMap<Product, u64>,
    next_serial: u64,
}

impl SubscriptionReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// `subscribe = desired - (active + pending + rejected)`,
    /// `unsubscribe = active - (desired + pending)`.
    pub fn plan(&self, desired: &BTreeSet<Product>) -> ReconcilePlan {
        let subscribe = desired
            .iter()
            .filter(|product| {
                !self.active.contains(*product)
                    && !self.pending.contains_key(*product)
                    && !self.rejected.contains(*product)
            })
            .cloned()
            .collect();
        let unsubscribe = self
            .active
            .iter()
            .filter(|product| !desired.contains(*product) && !self.pending.contains_key(*product))
            .cloned()
            .collect();

        ReconcilePlan {
            subscribe,
            unsubscribe,
        }
    }

    /// Record the plan's requests as in flight.
    pub fn mark_sent(&mut self, plan: &ReconcilePlan) {
        for product in &plan.subscribe {
            self.pending.insert(product.clone(), RequestType::Subscribe);
        }
        for product in &plan.unsubscribe {
            self.pending.insert(product.clone(), RequestType::Unsubscribe);
        }
    }

    /// Replace the confirmed set with the server's list and settle the
    /// pending requests it answers.
    pub fn apply_confirmation(&mut self, confirmed: BTreeSet<Product>) -> ConfirmationDelta {
        self.pending.retain(|product, kind| match kind {
            RequestType::Subscribe => !confirmed.contains(product),
            RequestType::Unsubscribe => confirmed.contains(product),
        });

        self.rejected.retain(|product| !confirmed.contains(product));

        let added: Vec<Product> = confirmed.difference(&self.active).cloned().collect();
        let removed: Vec<Product> = self.active.difference(&confirmed).cloned().collect();
        for product in &removed {
            self.serials.remove(product);
        }
        for product in &added {
            self.next_serial += 1;
            self.serials.insert(product.clone(), self.next_serial);
        }
        self.active = confirmed;

        ConfirmationDelta { added, removed }
    }

    /// Settle every in-flight subscribe as refused. Refused products are not
    /// requested again on this connection while they stay desired.
    pub fn reject_pending_subscribes(&mut self) -> Vec<Product> {
        let rejected: Vec<Product> = self
            .pending
            .iter()
            .filter(|(_, kind)| **kind == RequestType::Subscribe)
            .map(|(product, _)| product.clone())
            .collect();
        for product in &rejected {
            self.pending.remove(product);
            self.rejected.insert(product.clone());
        }
        rejected
    }

    /// Drop refusals for products the caller no longer wants, so a later
    /// subscribe to them is sent again.
    pub fn release_rejected(&mut self, desired: &BTreeSet<Product>) {
        self.rejected.retain(|product| desired.contains(product));
    }

    /// Forget everything; used whenever the socket goes away.
    pub fn clear(&mut self) {
        self.active.clear();
        self.pending.clear();
        self.rejected.clear();
        self.serials.clear();
    }

    pub fn active(&self) -> &BTreeSet<Product> {
        &self.active
    }

    pub fn pending_products(&self) -> BTreeSet<Product> {
        self.pending.keys().cloned().collect()
    }

    pub fn pending_kind(&self, product: &Product) -> Option<RequestType> {
        self.pending.get(product).copied()
    }

    pub fn rejected(&self) -> &BTreeSet<Product> {
        &self.rejected
    }

    /// Nothing confirmed and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.active.is_empty() && self.pending.is_empty()
    }

    pub fn snapshot(&self, generation: u64) -> ActiveSnapshot {
        ActiveSnapshot {
            generation,
            products: self.active.clone(),
            pending: self.pending_products(),
            serials: self.serials.clone(),
        }
    }
}
