/*
[INPUT]:  Feed endpoint URL and outbound subscription requests
[OUTPUT]: Decoded inbound messages from one owned WebSocket connection
[POS]:    WebSocket layer - transport for the public ticker feed
[UPDATE]: When changing connect, read or close behavior
*/

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use url::Url;

use super::message::MessageReceiver;
use crate::error::{FeedError, Result};
use crate::types::{RequestMessage, ResponseMessage};

pub const DEFAULT_FEED_URL: &str = "wss://ws-feed.gdax.com";
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// One open connection to the feed. The owner is the only reader and writer.
pub struct FeedSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    receiver: MessageReceiver,
    liveness: Option<Duration>,
    last_frame_at: Instant,
}

impl FeedSocket {
    /// Open a connection, failing with `FeedError::Timeout` when the handshake
    /// does not finish within `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url)?;
        let (stream, _response) = tokio::time::timeout(timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| FeedError::Timeout { duration: timeout })??;

        debug!(url = %url, "ws connected");
        Ok(Self {
            stream,
            receiver: MessageReceiver::new(),
            liveness: None,
            last_frame_at: Instant::now(),
        })
    }

    /// Fail reads with `FeedError::Timeout` once no frame of any kind
    /// (data, ping, pong) has arrived for `timeout`.
    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness = Some(timeout);
        self
    }

    pub async fn send(&mut self, request: &RequestMessage) -> Result<()> {
        let json = serde_json::to_string(request)?;
        self.stream.send(WsMessage::Text(json.into())).await?;
        self.receiver.log_request_sent(request);
        Ok(())
    }

    /// Next message the client acts on, `Ok(None)` once the peer has closed.
    ///
    /// Cancel-safe: dropping the future between frames loses nothing, and the
    /// liveness deadline is measured from the last frame, not from the call.
    pub async fn next_message(&mut self) -> Result<Option<ResponseMessage>> {
        loop {
            let frame = match self.liveness {
                Some(limit) => {
                    let deadline = self.last_frame_at + limit;
                    tokio::time::timeout_at(deadline, self.stream.next())
                        .await
                        .map_err(|_| FeedError::Timeout { duration: limit })?
                }
                None => self.stream.next().await,
            };

            match frame {
                Some(Ok(message)) => {
                    self.last_frame_at = Instant::now();
                    if let Some(decoded) = self.receiver.receive(message) {
                        return Ok(Some(decoded));
                    }
                }
                Some(Err(WsError::ConnectionClosed)) | None => return Ok(None),
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }

    /// Send a close frame and wait briefly for the peer to acknowledge it.
    pub async fn close(mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {}
            Err(err) => return Err(err.into()),
        }

        let drain = async {
            while let Some(Ok(_)) = self.stream.next().await {}
        };
        if tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, drain).await.is_err() {
            debug!("ws close not acknowledged in time");
        }
        Ok(())
    }
}
