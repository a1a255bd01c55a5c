/*
[INPUT]:  Feed endpoint and subscription requests
[OUTPUT]: Decoded ticker feed messages
[POS]:    WebSocket layer - real-time data stream
[UPDATE]: When changing connection logic or message handling
*/

pub mod client;
pub mod message;

pub use client::{DEFAULT_FEED_URL, FeedSocket};
pub use message::MessageReceiver;
