/*
[INPUT]:  Test configuration and mock server requirements
[OUTPUT]: Shared test utilities, fixtures, and mock helpers
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for gdax-ticker-adapter tests

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Start a one-connection WebSocket server.
///
/// It waits for the client's first frame, plays `script`, closes the socket
/// and returns every text frame the client sent, parsed as JSON.
pub async fn spawn_scripted_server(
    script: Vec<Message>,
) -> (String, JoinHandle<Vec<serde_json::Value>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
    let addr = listener.local_addr().expect("mock server address");

    let handle = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept client");
        let mut ws = accept_async(tcp).await.expect("websocket handshake");
        let mut requests = Vec::new();

        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                requests.push(serde_json::from_str(text.as_str()).expect("request is json"));
            }
            _ => return requests,
        }

        for frame in script {
            ws.send(frame).await.expect("send scripted frame");
        }
        let _ = ws.close(None).await;

        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                requests.push(serde_json::from_str(text.as_str()).expect("request is json"));
            }
        }
        requests
    });

    (format!("ws://{addr}"), handle)
}

/// A ticker frame in the exchange's string-encoded format.
pub fn ticker_frame(product: &str, sequence: i64, price: &str) -> Message {
    Message::Text(
        serde_json::json!({
            "type": "ticker",
            "sequence": sequence,
            "product_id": product,
            "price": price,
            "open_24h": "100.00",
            "best_bid": price,
            "best_ask": price,
        })
        .to_string()
        .into(),
    )
}

/// Start a one-connection WebSocket server that plays `script` right after
/// the handshake, sleeping before each frame, then holds the socket open
/// without sending anything until the client goes away.
pub async fn spawn_paced_server(script: Vec<(Duration, Message)>) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
    let addr = listener.local_addr().expect("mock server address");

    let handle = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept client");
        let mut ws = accept_async(tcp).await.expect("websocket handshake");

        for (delay, frame) in script {
            tokio::time::sleep(delay).await;
            if ws.send(frame).await.is_err() {
                return;
            }
        }
        while let Some(Ok(_)) = ws.next().await {}
    });

    (format!("ws://{addr}"), handle)
}
