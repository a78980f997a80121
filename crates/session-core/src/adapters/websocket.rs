//! WebSocket signaling transport
//!
//! Each channel runs one socket task that owns the WebSocket stream and
//! multiplexes reads with writes queued by [`SignalingChannel::send`].

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use super::signaling::{SignalingChannel, SignalingEventSender, SignalingTransport};
use crate::errors::TransportError;
use crate::message::Payload;

/// Close code for a normal closure
const CLOSE_NORMAL: u16 = 1000;
/// Close code reported when the socket ended without a close frame
const CLOSE_ABNORMAL: u16 = 1006;

/// How long a locally initiated close waits for the peer's close frame
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// `SignalingTransport` over `ws://` and `wss://`
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    close_timeout: Duration,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self {
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the closing handshake; a peer that never answers is reported
    /// as an abnormal closure once this elapses
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    pub fn close_timeout(&self) -> Duration {
        self.close_timeout
    }
}

impl SignalingTransport for WebSocketTransport {
    fn open(&self, url: &Url, events: SignalingEventSender) -> Result<Box<dyn SignalingChannel>, TransportError> {
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(TransportError::Open {
                    url: url.to_string(),
                    reason: format!("unsupported scheme {:?}", other),
                })
            }
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(url.clone(), events, outbound_rx, self.close_timeout));
        Ok(Box::new(WebSocketChannel { outbound: outbound_tx }))
    }
}

enum Outbound {
    Text(String),
    Close,
}

struct WebSocketChannel {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl SignalingChannel for WebSocketChannel {
    fn send(&self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        // Already finished if the socket task is gone
        let _ = self.outbound.send(Outbound::Close);
    }
}

async fn run_socket(
    url: Url,
    events: SignalingEventSender,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    close_timeout: Duration,
) {
    debug!("Opening signaling socket to {}", url);

    let connecting = connect_async(url.as_str());
    tokio::pin!(connecting);

    // A close requested while connecting aborts the attempt
    let ws_stream = loop {
        tokio::select! {
            result = &mut connecting => match result {
                Ok((stream, _)) => break stream,
                Err(e) => {
                    warn!("Signaling socket to {} failed to open: {}", url, e);
                    events.error(e.to_string());
                    events.closed(CLOSE_ABNORMAL, "");
                    return;
                }
            },
            command = outbound.recv() => match command {
                Some(Outbound::Close) | None => {
                    debug!("Signaling socket closed before it opened");
                    events.closed(CLOSE_NORMAL, "");
                    return;
                }
                Some(Outbound::Text(_)) => {
                    warn!("Dropping signaling message written before the socket opened");
                }
            },
        }
    };

    info!("Signaling socket to {} is open", url);
    events.opened();

    let (mut write, mut read) = ws_stream.split();
    let mut closing = false;
    // Armed once the close frame is out
    let close_grace = sleep(close_timeout);
    tokio::pin!(close_grace);

    loop {
        tokio::select! {
            command = outbound.recv(), if !closing => match command {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        events.error(e.to_string());
                    }
                }
                Some(Outbound::Close) | None => {
                    closing = true;
                    match timeout(close_timeout, write.send(Message::Close(None))).await {
                        Ok(Ok(())) => close_grace.as_mut().reset(Instant::now() + close_timeout),
                        Ok(Err(e)) => {
                            debug!("Failed to send close frame: {}", e);
                            events.closed(CLOSE_ABNORMAL, "");
                            return;
                        }
                        Err(_) => {
                            warn!("Signaling socket to {} did not accept the close frame", url);
                            events.closed(CLOSE_ABNORMAL, "close handshake timed out");
                            return;
                        }
                    }
                }
            },
            _ = &mut close_grace, if closing => {
                warn!("Signaling peer at {} did not answer the close frame within {:?}", url, close_timeout);
                events.closed(CLOSE_ABNORMAL, "close handshake timed out");
                return;
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    events.message(Payload::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => {
                    events.message(Payload::Binary(data.to_vec()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                        .unwrap_or((CLOSE_NORMAL, String::new()));
                    debug!("Signaling socket closed by peer: {} {:?}", code, reason);
                    // Completes the closing handshake when the peer initiated it
                    let _ = timeout(close_timeout, write.close()).await;
                    events.closed(code, reason);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Signaling socket error: {}", e);
                    events.error(e.to_string());
                    events.closed(CLOSE_ABNORMAL, "");
                    return;
                }
                None => {
                    events.closed(CLOSE_ABNORMAL, "");
                    return;
                }
            },
        }
    }
}
