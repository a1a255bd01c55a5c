/*
[INPUT]:  Ticker sequence numbers and the confirmed product snapshot
[OUTPUT]: Per-product accept/stale/unknown verdicts
[POS]:    Runtime layer - ordering and dedup gate in front of price handlers
[UPDATE]: When changing when last-seen sequences are reset
*/

use std::collections::HashMap;

use gdax_ticker_adapter::Product;

use crate::reconcile::ActiveSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Newer than anything delivered for the product.
    Accepted,
    /// Equal to or older than the last delivered sequence.
    Stale { last_seen: i64 },
    /// The product is not confirmed (yet); the caller may retry later.
    Unknown,
}

#[derive(Debug, Clone, Copy)]
struct Tracked {
    serial: u64,
    last_seen: i64,
}

/// Last delivered sequence per confirmed product.
#[derive(Debug, Default)]
pub struct SequenceFilter {
    generation: u64,
    tracked: HashMap<Product, Tracked>,
}

impl SequenceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a product at sequence 0; keeps an entry with the same
    /// confirmation serial.
    fn track(&mut self, product: Product, serial: u64) {
        self.tracked.entry(product).or_insert(Tracked {
            serial,
            last_seen: 0,
        });
    }

    pub fn clear(&mut self) {
        self.tracked.clear();
    }

    /// Align tracked products with the confirmed set. A new connection
    /// generation resets every sequence; a product confirmed again under a
    /// new serial starts over at 0.
    pub fn sync(&mut self, snapshot: &ActiveSnapshot) {
        if snapshot.generation != self.generation {
            self.generation = snapshot.generation;
            self.clear();
        }
        self.tracked
            .retain(|product, tracked| snapshot.serials.get(product) == Some(&tracked.serial));
        for (product, serial) in &snapshot.serials {
            self.track(product.clone(), *serial);
        }
    }

    pub fn check(&self, product: &Product, sequence: i64) -> Verdict {
        match self.tracked.get(product) {
            None => Verdict::Unknown,
            Some(tracked) if sequence > tracked.last_seen => Verdict::Accepted,
            Some(tracked) => Verdict::Stale {
                last_seen: tracked.last_seen,
            },
        }
    }

    /// Check and, when accepted, record the sequence.
    pub fn accept(&mut self, product: &Product, sequence: i64) -> Verdict {
        let verdict = self.check(product, sequence);
        if verdict == Verdict::Accepted {
            if let Some(tracked) = self.tracked.get_mut(product) {
                tracked.last_seen = sequence;
            }
        }
        verdict
    }

    pub fn last_seen(&self, product: &Product) -> Option<i64> {
        self.tracked.get(product).map(|tracked| tracked.last_seen)
    }
}
