/*
[INPUT]:  Feed payload schemas and the static currency table
[OUTPUT]: Product identifiers and decoded ticker snapshots
[POS]:    Data layer - core domain models shared by adapter and feed
[UPDATE]: When adding currencies or ticker fields
*/

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::FeedError;

/// Currencies the exchange lists, resolved through a static table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Currency {
    Btc,
    Eth,
    Ltc,
    Bch,
    Usd,
    Eur,
    Gbp,
}

const CURRENCY_TABLE: [(Currency, &str, &str); 7] = [
    (Currency::Btc, "BTC", "Bitcoin"),
    (Currency::Eth, "ETH", "Ethereum"),
    (Currency::Ltc, "LTC", "Litecoin"),
    (Currency::Bch, "BCH", "Bitcoin Cash"),
    (Currency::Usd, "USD", "US Dollar"),
    (Currency::Eur, "EUR", "Euro"),
    (Currency::Gbp, "GBP", "British Pound"),
];

impl Currency {
    pub fn all() -> impl Iterator<Item = Currency> {
        CURRENCY_TABLE.iter().map(|(currency, _, _)| *currency)
    }

    pub fn ticker_symbol(self) -> &'static str {
        self.entry().1
    }

    pub fn name(self) -> &'static str {
        self.entry().2
    }

    /// Case-insensitive lookup by ticker symbol (e.g. `"btc"`).
    pub fn from_ticker_symbol(symbol: &str) -> Option<Self> {
        CURRENCY_TABLE
            .iter()
            .find(|(_, ticker, _)| ticker.eq_ignore_ascii_case(symbol.trim()))
            .map(|(currency, _, _)| *currency)
    }

    fn entry(self) -> &'static (Currency, &'static str, &'static str) {
        // Table rows are declared in enum order.
        &CURRENCY_TABLE[self as usize]
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ticker_symbol())
    }
}

/// Identifier of a tradable pair, e.g. `BTC-USD`.
///
/// Equality, hashing and ordering all go through the identifier string, so a
/// `Product` is usable as the key of every subscription and sequence map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Product {
    id: String,
}

impl Product {
    /// Wrap an identifier as received from the exchange, without validation.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn from_pair(base: Currency, target: Currency) -> Result<Self, FeedError> {
        if base == target {
            return Err(FeedError::InvalidProduct(format!(
                "base and target currency are both {base}"
            )));
        }
        Ok(Self::new(format!("{base}-{target}")))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resolve both halves of the identifier through the currency table.
    pub fn currencies(&self) -> Option<(Currency, Currency)> {
        let (base, target) = self.id.split_once('-')?;
        Some((
            Currency::from_ticker_symbol(base)?,
            Currency::from_ticker_symbol(target)?,
        ))
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl FromStr for Product {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (base, target) = trimmed
            .split_once('-')
            .ok_or_else(|| FeedError::InvalidProduct(format!("'{trimmed}' is not BASE-TARGET")))?;

        let valid_half = |half: &str| !half.is_empty() && half.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid_half(base) || !valid_half(target) {
            return Err(FeedError::InvalidProduct(format!(
                "'{trimmed}' is not BASE-TARGET"
            )));
        }
        if base.eq_ignore_ascii_case(target) {
            return Err(FeedError::InvalidProduct(format!(
                "base and target currency are both {base}"
            )));
        }

        Ok(Self::new(trimmed.to_ascii_uppercase()))
    }
}

/// One `ticker` channel message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerUpdate {
    #[serde(rename = "product_id")]
    pub product: Product,
    pub sequence: i64,
    #[serde(deserialize_with = "number_or_string")]
    pub price: f64,
    #[serde(rename = "open_24h", default, deserialize_with = "number_or_string")]
    pub open_price: f64,
    #[serde(default, deserialize_with = "number_or_string")]
    pub volume_24h: f64,
    #[serde(default, deserialize_with = "number_or_string")]
    pub low_24h: f64,
    #[serde(default, deserialize_with = "number_or_string")]
    pub high_24h: f64,
    #[serde(default, deserialize_with = "number_or_string")]
    pub volume_30d: f64,
    #[serde(default, deserialize_with = "number_or_string")]
    pub best_bid: f64,
    #[serde(default, deserialize_with = "number_or_string")]
    pub best_ask: f64,
}

impl TickerUpdate {
    /// Relative price change against the 24h open, `None` without an open.
    pub fn change_24h(&self) -> Option<f64> {
        if self.open_price == 0.0 {
            return None;
        }
        Some((self.price - self.open_price) / self.open_price)
    }
}

/// The exchange encodes decimals as strings; accept both that and plain numbers.
fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(0.0),
        Some(Raw::Number(value)) => Ok(value),
        Some(Raw::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(0.0);
            }
            text.parse::<f64>().map_err(serde::de::Error::custom)
        }
    }
}
