//! ZmqFeed - ZeroMQ subscriber for bitcoind's `zmqpubrawtx`
//!
//! A SUB socket never reports a publisher that went away: the peer is dropped
//! and `recv` keeps waiting. So after `idle_resubscribe` without a message the
//! feed connects a fresh socket. If the node is gone that connect times out and
//! the error reaches the supervisor; if the node restarted, the fresh socket
//! picks up its new publisher.

use async_trait::async_trait;
use std::time::Duration;
use zeromq::{Socket, SocketRecv, SubSocket};

use super::{FeedError, FeedMessage, FeedSource, RAWTX_TOPIC};

/// Silence after which the subscription is re-established.
pub const DEFAULT_IDLE_RESUBSCRIBE: Duration = Duration::from_secs(60);
/// How long a (re)connect may take before the feed counts as lost.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ZmqFeed {
    endpoint: String,
    idle_resubscribe: Duration,
    connect_timeout: Duration,
    socket: Option<SubSocket>,
}

impl ZmqFeed {
    /// `endpoint` like `tcp://127.0.0.1:28332`. Nothing connects until `subscribe`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            idle_resubscribe: DEFAULT_IDLE_RESUBSCRIBE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            socket: None,
        }
    }

    pub fn with_idle_resubscribe(mut self, idle: Duration) -> Self {
        self.idle_resubscribe = idle;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

async fn open(endpoint: &str, connect_timeout: Duration) -> Result<SubSocket, FeedError> {
    let mut socket = SubSocket::new();
    match tokio::time::timeout(connect_timeout, socket.connect(endpoint)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(FeedError::Transport(format!("connect {}: {}", endpoint, e))),
        Err(_) => {
            return Err(FeedError::Transport(format!(
                "connect {}: no publisher after {:?}",
                endpoint, connect_timeout
            )))
        }
    }
    socket
        .subscribe(RAWTX_TOPIC)
        .await
        .map_err(|e| FeedError::Transport(format!("subscribe {}: {}", RAWTX_TOPIC, e)))?;
    Ok(socket)
}

#[async_trait]
impl FeedSource for ZmqFeed {
    async fn subscribe(&mut self) -> Result<(), FeedError> {
        self.socket = None;
        self.socket = Some(open(&self.endpoint, self.connect_timeout).await?);
        tracing::info!(endpoint = %self.endpoint, topic = RAWTX_TOPIC, "subscriber connected");
        Ok(())
    }

    async fn next_message(&mut self) -> Result<FeedMessage, FeedError> {
        loop {
            let socket = self.socket.as_mut().ok_or(FeedError::Disconnected)?;
            let msg = match tokio::time::timeout(self.idle_resubscribe, socket.recv()).await {
                Ok(Ok(msg)) => msg,
                Ok(Err(e)) => {
                    self.socket = None;
                    return Err(FeedError::Transport(e.to_string()));
                }
                Err(_) => {
                    tracing::debug!(endpoint = %self.endpoint, idle = ?self.idle_resubscribe, "feed idle; reconnecting");
                    match open(&self.endpoint, self.connect_timeout).await {
                        Ok(fresh) => self.socket = Some(fresh),
                        Err(e) => {
                            self.socket = None;
                            return Err(e);
                        }
                    }
                    continue;
                }
            };

            // Frames: topic, body, 4-byte little-endian sequence number
            let topic = msg.get(0).map(|t| String::from_utf8_lossy(t).into_owned()).unwrap_or_default();
            let payload = msg.get(1).map(|b| b.to_vec()).unwrap_or_default();
            return Ok(FeedMessage { topic, payload });
        }
    }
}
