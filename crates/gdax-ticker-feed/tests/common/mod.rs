/*
[INPUT]:  Test configuration and mock exchange requirements
[OUTPUT]: In-process mock feed server, fast test config, state/price recorders
[POS]:    Test infrastructure - shared across integration tests
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for gdax-ticker-feed integration tests

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

use gdax_ticker_feed::config::{DispatchConfig, RetryConfig};
use gdax_ticker_feed::{ConnectionState, Feed, FeedConfig};

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
enum Control {
    Send(String),
    Ping,
    Drop,
}

/// Mock exchange speaking the feed protocol over plain `ws://`.
///
/// With auto-confirm on, every request is answered with a `subscriptions`
/// message listing the connection's ticker products.
pub struct MockExchange {
    pub url: String,
    requests: mpsc::UnboundedReceiver<Value>,
    control: broadcast::Sender<Control>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockExchange {
    pub async fn start() -> Self {
        Self::start_with(true).await
    }

    /// Requests are recorded but never confirmed.
    pub async fn start_manual() -> Self {
        Self::start_with(false).await
    }

    async fn start_with(auto_confirm: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock exchange");
        let addr = listener.local_addr().expect("mock exchange address");
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let (control, _) = broadcast::channel(64);
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_control = control.clone();
        let accept_connections = connections.clone();
        let task = tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let control_rx = accept_control.subscribe();
                let requests_tx = requests_tx.clone();
                let Ok(ws) = accept_async(tcp).await else {
                    continue;
                };
                accept_connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_connection(ws, control_rx, requests_tx, auto_confirm));
            }
        });

        Self {
            url: format!("ws://{addr}"),
            requests,
            control,
            connections,
            task,
        }
    }

    /// Number of WebSocket handshakes accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub async fn next_request(&mut self) -> Value {
        tokio::time::timeout(WAIT, self.requests.recv())
            .await
            .expect("timed out waiting for a client request")
            .expect("mock exchange stopped")
    }

    pub async fn expect_no_request(&mut self, wait: Duration) {
        if let Ok(Some(request)) = tokio::time::timeout(wait, self.requests.recv()).await {
            panic!("unexpected client request: {request}");
        }
    }

    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.control.send(Control::Send(text.into()));
    }

    pub fn send_ticker(&self, product: &str, sequence: i64, price: &str) {
        self.send_text(
            json!({
                "type": "ticker",
                "sequence": sequence,
                "product_id": product,
                "price": price,
                "open_24h": "100.00",
                "volume_24h": "12.5",
                "low_24h": "99.00",
                "high_24h": "105.00",
                "volume_30d": "300.0",
                "best_bid": price,
                "best_ask": price,
                "side": "buy",
                "time": "2018-06-01T10:00:00.000000Z"
            })
            .to_string(),
        );
    }

    pub fn send_subscriptions(&self, products: &[&str]) {
        self.send_text(subscriptions_message(products.iter().copied()).to_string());
    }

    pub fn send_error(&self, message: &str, reason: &str) {
        self.send_text(json!({"type": "error", "message": message, "reason": reason}).to_string());
    }

    /// A WebSocket ping frame; carries no feed message.
    pub fn send_ping(&self) {
        let _ = self.control.send(Control::Ping);
    }

    /// Drop every open connection without a close handshake.
    pub fn drop_connections(&self) {
        let _ = self.control.send(Control::Drop);
    }
}

impl Drop for MockExchange {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum ServerEvent {
    Incoming(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
    Control(Result<Control, RecvError>),
}

async fn serve_connection(
    mut ws: WebSocketStream<tokio::net::TcpStream>,
    mut control: broadcast::Receiver<Control>,
    requests: mpsc::UnboundedSender<Value>,
    auto_confirm: bool,
) {
    let mut active: BTreeSet<String> = BTreeSet::new();

    loop {
        let event = tokio::select! {
            incoming = ws.next() => ServerEvent::Incoming(incoming),
            control = control.recv() => ServerEvent::Control(control),
        };

        match event {
            ServerEvent::Incoming(Some(Ok(Message::Text(text)))) => {
                let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                if auto_confirm {
                    apply_request(&mut active, &request);
                    let reply = subscriptions_message(active.iter().map(String::as_str));
                    if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                        break;
                    }
                }
                let _ = requests.send(request);
            }
            ServerEvent::Incoming(Some(Ok(Message::Close(_))))
            | ServerEvent::Incoming(Some(Err(_)))
            | ServerEvent::Incoming(None) => break,
            ServerEvent::Incoming(Some(Ok(_))) => {}
            ServerEvent::Control(Ok(Control::Send(text))) => {
                if ws.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            ServerEvent::Control(Ok(Control::Ping)) => {
                if ws.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            ServerEvent::Control(Ok(Control::Drop)) | ServerEvent::Control(Err(RecvError::Closed)) => {
                break;
            }
            ServerEvent::Control(Err(RecvError::Lagged(_))) => {}
        }
    }
}

fn apply_request(active: &mut BTreeSet<String>, request: &Value) {
    let products = request["product_ids"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_string);

    match request["type"].as_str() {
        Some("subscribe") => active.extend(products),
        Some("unsubscribe") => {
            for product in products {
                active.remove(&product);
            }
        }
        _ => {}
    }
}

fn subscriptions_message<'a>(products: impl Iterator<Item = &'a str>) -> Value {
    let products: Vec<&str> = products.collect();
    if products.is_empty() {
        return json!({"type": "subscriptions", "channels": []});
    }
    json!({
        "type": "subscriptions",
        "channels": [{"name": "ticker", "product_ids": products}]
    })
}

/// Fast retry and requeue settings pointed at the mock exchange.
pub fn test_config(url: &str) -> FeedConfig {
    FeedConfig {
        endpoint: url.to_string(),
        connect_timeout_secs: 2,
        liveness_timeout_secs: 30,
        retry: RetryConfig {
            initial_delay_ms: 50,
            max_delay_ms: 200,
        },
        dispatch: DispatchConfig {
            queue_capacity: 64,
            requeue_delay_ms: 20,
            max_requeue_attempts: 5,
        },
        ..FeedConfig::default()
    }
}

pub fn record_states(feed: &Feed) -> Arc<Mutex<Vec<ConnectionState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    feed.on_connection_state_changed(move |state| sink.lock().unwrap().push(state));
    states
}

pub fn record_prices(feed: &Feed) -> Arc<Mutex<Vec<(String, i64)>>> {
    let prices = Arc::new(Mutex::new(Vec::new()));
    let sink = prices.clone();
    feed.on_price_updated(move |product, update| {
        sink.lock()
            .unwrap()
            .push((product.id().to_string(), update.sequence));
    });
    prices
}

pub async fn wait_for_state(feed: &Feed, state: ConnectionState) {
    let mut rx = feed.subscribe_connection_state();
    tokio::time::timeout(WAIT, rx.wait_for(|current| *current == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for state {state}"))
        .expect("state channel closed");
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

/// True when `expected` appears in `seen` in order, not necessarily adjacent.
pub fn contains_in_order(seen: &[ConnectionState], expected: &[ConnectionState]) -> bool {
    let mut remaining = expected.iter().peekable();
    for state in seen {
        if remaining.peek() == Some(&state) {
            remaining.next();
        }
    }
    remaining.peek().is_none()
}
