/*
[INPUT]:  Subscription intents from the connection worker
[OUTPUT]: Typed outbound request messages with serialization support
[POS]:    Data layer - type definitions for feed communication
[UPDATE]: When the request schema changes or new channels are requested
*/

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::enums::{ChannelType, RequestType};
use super::models::Product;

/// A channel entry of a request or a `subscriptions` confirmation.
///
/// On the wire a channel without a product override is just its name
/// (`"ticker"`); with an override it is `{"name": .., "product_ids": [..]}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: ChannelType,
    pub product_ids: Vec<Product>,
}

impl Channel {
    pub fn new(name: ChannelType) -> Self {
        Self {
            name,
            product_ids: Vec::new(),
        }
    }

    pub fn ticker() -> Self {
        Self::new(ChannelType::Ticker)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ChannelRepr {
    Name(ChannelType),
    Full {
        name: ChannelType,
        #[serde(default)]
        product_ids: Vec<Product>,
    },
}

impl Serialize for Channel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if self.product_ids.is_empty() {
            ChannelRepr::Name(self.name).serialize(serializer)
        } else {
            ChannelRepr::Full {
                name: self.name,
                product_ids: self.product_ids.clone(),
            }
            .serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Channel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match ChannelRepr::deserialize(deserializer)? {
            ChannelRepr::Name(name) => Channel::new(name),
            ChannelRepr::Full { name, product_ids } => Channel { name, product_ids },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    #[serde(rename = "type")]
    pub kind: RequestType,
    pub product_ids: Vec<Product>,
    pub channels: Vec<Channel>,
}

impl RequestMessage {
    pub fn subscribe(products: impl IntoIterator<Item = Product>) -> Self {
        Self::ticker(RequestType::Subscribe, products)
    }

    pub fn unsubscribe(products: impl IntoIterator<Item = Product>) -> Self {
        Self::ticker(RequestType::Unsubscribe, products)
    }

    fn ticker(kind: RequestType, products: impl IntoIterator<Item = Product>) -> Self {
        Self {
            kind,
            product_ids: products.into_iter().collect(),
            channels: vec![Channel::ticker()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscribe_request_uses_bare_ticker_channel() {
        let request = RequestMessage::subscribe([Product::new("BTC-USD"), Product::new("ETH-USD")]);

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "type": "subscribe",
                "product_ids": ["BTC-USD", "ETH-USD"],
                "channels": ["ticker"]
            })
        );
    }

    #[test]
    fn channel_with_products_serializes_as_object() {
        let channel = Channel {
            name: ChannelType::Ticker,
            product_ids: vec![Product::new("LTC-USD")],
        };

        assert_eq!(
            serde_json::to_value(&channel).unwrap(),
            json!({"name": "ticker", "product_ids": ["LTC-USD"]})
        );
    }

    #[test]
    fn channel_accepts_both_wire_forms() {
        let bare: Channel = serde_json::from_value(json!("heartbeat")).unwrap();
        assert_eq!(bare, Channel::new(ChannelType::Heartbeat));

        let full: Channel =
            serde_json::from_value(json!({"name": "ticker", "product_ids": ["BCH-USD"]})).unwrap();
        assert_eq!(full.name, ChannelType::Ticker);
        assert_eq!(full.product_ids, vec![Product::new("BCH-USD")]);
    }

    #[test]
    fn unsubscribe_request_round_trips_kind() {
        let request = RequestMessage::unsubscribe([Product::new("ETH-USD")]);
        let raw = serde_json::to_string(&request).unwrap();
        let decoded: RequestMessage = serde_json::from_str(&raw).unwrap();

        assert_eq!(decoded.kind, RequestType::Unsubscribe);
        assert_eq!(decoded, request);
    }
}
