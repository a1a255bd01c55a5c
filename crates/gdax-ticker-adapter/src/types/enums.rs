/*
[INPUT]:  Feed protocol discriminators and serde requirements
[OUTPUT]: Typed Rust enums with serialization support
[POS]:    Data layer - type definitions for feed communication
[UPDATE]: When the exchange adds channels or message kinds
*/

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Ticker,
    Heartbeat,
    Level2,
    User,
    Matches,
    Full,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Subscribe,
    Unsubscribe,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestType::Subscribe => f.write_str("subscribe"),
            RequestType::Unsubscribe => f.write_str("unsubscribe"),
        }
    }
}

/// Value of the top-level `type` field of every inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Subscriptions,
    Heartbeat,
    Ticker,
    Snapshot,
    L2update,
    Received,
    Open,
    Done,
    Match,
    Change,
    Activate,
    Error,
    #[serde(other)]
    Unknown,
}
