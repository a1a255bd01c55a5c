/*
[INPUT]:  Inbound feed JSON and serde requirements
[OUTPUT]: Typed inbound messages decoded by discriminator
[POS]:    Data layer - type definitions for feed communication
[UPDATE]: When the exchange adds message kinds the client acts on
*/

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::enums::{ChannelType, ResponseType};
use super::models::{Product, TickerUpdate};
use super::requests::Channel;

/// Authoritative list of channels the server currently streams.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubscriptionsResponse {
    #[serde(default)]
    pub channels: Vec<Channel>,
}

impl SubscriptionsResponse {
    /// Products confirmed on one channel; empty when the channel is absent.
    pub fn products_for(&self, channel: ChannelType) -> BTreeSet<Product> {
        self.channels
            .iter()
            .filter(|entry| entry.name == channel)
            .flat_map(|entry| entry.product_ids.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    #[serde(default)]
    pub product_id: Option<Product>,
    #[serde(default)]
    pub sequence: Option<i64>,
    #[serde(default)]
    pub last_trade_id: Option<i64>,
}

/// A decoded inbound message. Kinds the client does not act on are `Other`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseMessage {
    Subscriptions(SubscriptionsResponse),
    Ticker(TickerUpdate),
    Heartbeat(HeartbeatResponse),
    Error(ErrorResponse),
    Other(ResponseType),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: ResponseType,
}

impl ResponseMessage {
    /// Read the `type` field first and only decode the payload of kinds we use.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(raw)?;

        Ok(match envelope.kind {
            ResponseType::Subscriptions => Self::Subscriptions(serde_json::from_str(raw)?),
            ResponseType::Ticker => Self::Ticker(serde_json::from_str(raw)?),
            ResponseType::Heartbeat => Self::Heartbeat(serde_json::from_str(raw)?),
            ResponseType::Error => Self::Error(serde_json::from_str(raw)?),
            other => Self::Other(other),
        })
    }

    pub fn kind(&self) -> ResponseType {
        match self {
            Self::Subscriptions(_) => ResponseType::Subscriptions,
            Self::Ticker(_) => ResponseType::Ticker,
            Self::Heartbeat(_) => ResponseType::Heartbeat,
            Self::Error(_) => ResponseType::Error,
            Self::Other(kind) => *kind,
        }
    }
}
