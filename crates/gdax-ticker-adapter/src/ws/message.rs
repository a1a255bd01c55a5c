/*
[INPUT]:  Complete WebSocket messages (codec has already joined fragments)
[OUTPUT]: Decoded ResponseMessage values, with sampled diagnostics
[POS]:    WebSocket layer - message classification and decoding
[UPDATE]: When adding new message kinds or changing payload normalization
*/

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, trace};

use crate::types::{RequestMessage, ResponseMessage, ResponseType};

const MESSAGE_SAMPLE_LIMIT: usize = 3;
const REQUEST_LOG_LIMIT: usize = 10;
const OTHER_LOG_LIMIT: usize = 3;
const PARSE_FAIL_LOG_LIMIT: usize = 3;
const RAW_LOG_MAX_BYTES: usize = 1024;

/// Turns transport frames into typed messages.
///
/// Log sampling is counted per receiver, so two feeds in one process do not
/// share a budget.
#[derive(Debug, Default)]
pub struct MessageReceiver {
    message_samples: AtomicUsize,
    requests_logged: AtomicUsize,
    others_logged: AtomicUsize,
    parse_failures_logged: AtomicUsize,
}

impl MessageReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify one transport message. `None` means "nothing for the caller":
    /// control frames, ignored kinds and malformed payloads.
    pub fn receive(&self, message: WsMessage) -> Option<ResponseMessage> {
        match message {
            WsMessage::Text(text) => self.decode(text.as_str()),
            WsMessage::Binary(bytes) => {
                let payload = trim_padding(&bytes);
                match std::str::from_utf8(payload) {
                    Ok(text) => self.decode(text),
                    Err(err) => {
                        self.log_parse_fail(&err.to_string(), "<binary>");
                        None
                    }
                }
            }
            WsMessage::Close(frame) => {
                debug!(?frame, "ws close frame received");
                None
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => None,
        }
    }

    pub fn decode(&self, raw: &str) -> Option<ResponseMessage> {
        if raw.trim().is_empty() {
            return None;
        }

        match ResponseMessage::decode(raw) {
            Ok(ResponseMessage::Other(kind)) => {
                self.log_other(kind, raw);
                None
            }
            Ok(message) => {
                self.log_message_sample(&message);
                Some(message)
            }
            Err(err) => {
                self.log_parse_fail(&err.to_string(), raw);
                None
            }
        }
    }

    pub fn log_request_sent(&self, request: &RequestMessage) {
        let count = self.requests_logged.fetch_add(1, Ordering::Relaxed);
        if count >= REQUEST_LOG_LIMIT {
            debug!(
                action = %request.kind,
                products = request.product_ids.len(),
                "ws request sent"
            );
            return;
        }

        let products: Vec<&str> = request.product_ids.iter().map(|p| p.id()).collect();
        info!(
            sample_index = count + 1,
            sample_limit = REQUEST_LOG_LIMIT,
            action = %request.kind,
            products = ?products,
            "ws request sent"
        );
    }

    fn log_message_sample(&self, message: &ResponseMessage) {
        let count = self.message_samples.fetch_add(1, Ordering::Relaxed);
        if count >= MESSAGE_SAMPLE_LIMIT {
            trace!(kind = ?message.kind(), "ws message");
            return;
        }

        match message {
            ResponseMessage::Ticker(ticker) => {
                info!(
                    sample_index = count + 1,
                    sample_limit = MESSAGE_SAMPLE_LIMIT,
                    kind = "ticker",
                    product = %ticker.product,
                    sequence = ticker.sequence,
                    "ws message sample"
                );
            }
            other => {
                info!(
                    sample_index = count + 1,
                    sample_limit = MESSAGE_SAMPLE_LIMIT,
                    kind = ?other.kind(),
                    "ws message sample"
                );
            }
        }
    }

    fn log_other(&self, kind: ResponseType, raw: &str) {
        let count = self.others_logged.fetch_add(1, Ordering::Relaxed);
        if count >= OTHER_LOG_LIMIT {
            return;
        }

        info!(
            sample_index = count + 1,
            sample_limit = OTHER_LOG_LIMIT,
            kind = ?kind,
            bytes = raw.len(),
            "ws message kind ignored"
        );
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = OTHER_LOG_LIMIT,
            message = %preview,
            "ws message kind ignored"
        );
    }

    fn log_parse_fail(&self, err: &str, raw: &str) {
        let count = self.parse_failures_logged.fetch_add(1, Ordering::Relaxed);
        if count >= PARSE_FAIL_LOG_LIMIT {
            return;
        }

        info!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            error = %err,
            bytes = raw.len(),
            "ws message parse failed"
        );
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            error = %err,
            message = %preview,
            "ws message parse failed"
        );
    }
}

/// Binary payloads may arrive with trailing NUL padding.
fn trim_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|byte| *byte != 0)
        .map_or(0, |index| index + 1);
    &bytes[..end]
}

pub fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut cut = max_len;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = String::with_capacity(cut + 3);
    out.push_str(&value[..cut]);
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Product;

    #[test]
    fn receive_decodes_text_ticker() {
        let receiver = MessageReceiver::new();
        let raw = r#"{"type":"ticker","sequence":3,"product_id":"BTC-USD","price":"100.5"}"#;

        let message = receiver.receive(WsMessage::Text(raw.into()));

        let Some(ResponseMessage::Ticker(ticker)) = message else {
            panic!("expected ticker");
        };
        assert_eq!(ticker.product, Product::new("BTC-USD"));
    }

    #[test]
    fn receive_accepts_padded_binary() {
        let receiver = MessageReceiver::new();
        let mut payload = br#"{"type":"heartbeat","sequence":1}"#.to_vec();
        payload.extend_from_slice(&[0, 0, 0, 0]);

        let message = receiver.receive(WsMessage::Binary(payload.into()));

        assert_eq!(message.map(|m| m.kind()), Some(ResponseType::Heartbeat));
    }

    #[test]
    fn receive_drops_malformed_and_ignored_messages() {
        let receiver = MessageReceiver::new();

        assert!(receiver.receive(WsMessage::Text("{broken".into())).is_none());
        assert!(receiver
            .receive(WsMessage::Text(r#"{"type":"match","trade_id":1}"#.into()))
            .is_none());
        assert!(receiver.receive(WsMessage::Ping(Vec::new().into())).is_none());
        assert!(receiver
            .receive(WsMessage::Binary(vec![0xff, 0xfe, 0x00].into()))
            .is_none());

        // The receiver keeps working after bad input.
        let raw = r#"{"type":"subscriptions","channels":[]}"#;
        assert!(receiver.receive(WsMessage::Text(raw.into())).is_some());
    }

    #[test]
    fn sampling_counters_are_per_instance() {
        let first = MessageReceiver::new();
        for _ in 0..(PARSE_FAIL_LOG_LIMIT + 2) {
            first.decode("{broken");
        }

        let second = MessageReceiver::new();
        assert_eq!(second.parse_failures_logged.load(Ordering::Relaxed), 0);
        assert_eq!(
            first.parse_failures_logged.load(Ordering::Relaxed),
            PARSE_FAIL_LOG_LIMIT + 2
        );
    }

    #[test]
    fn trim_padding_handles_all_zero_payload() {
        assert_eq!(trim_padding(&[0, 0]), b"");
        assert_eq!(trim_padding(b"ab\0"), b"ab");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let value = "ééé";
        assert_eq!(truncate_for_log(value, 3), "é...");
        assert_eq!(truncate_for_log("short", 10), "short");
    }
}
