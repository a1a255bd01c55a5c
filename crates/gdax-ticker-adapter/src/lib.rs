/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public GDAX feed adapter crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod error;
pub mod types;
pub mod ws;

pub use error::{FeedError, Result};

// Re-export all types
pub use types::*;

pub use ws::{DEFAULT_FEED_URL, FeedSocket, MessageReceiver};
