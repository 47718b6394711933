//! Feed - the node's raw transaction notifications
//!
//! bitcoind publishes every transaction entering its mempool or a block on the
//! `rawtx` topic. [`FeedListener`] consumes those messages in order, derives the
//! address of each output and asks for a balance refresh whenever one of them
//! pays the watched address.
//!
//! Sources:
//! - [`ZmqFeed`] - ZeroMQ SUB socket (`zmq` feature)
//! - [`ChannelFeed`] - in-process, fed from an mpsc channel

mod listener;
#[cfg(feature = "zmq")]
mod zmq;

pub use listener::{pays_watched_address, FeedListener, MAX_RECONNECT_BACKOFF};
#[cfg(feature = "zmq")]
pub use zmq::ZmqFeed;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Raw transaction topic
pub const RAWTX_TOPIC: &str = "rawtx";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl FeedMessage {
    pub fn rawtx(payload: impl Into<Vec<u8>>) -> Self {
        Self { topic: RAWTX_TOPIC.into(), payload: payload.into() }
    }
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("feed disconnected")]
    Disconnected,

    #[error("feed transport: {0}")]
    Transport(String),

    #[error("wallet never became ready")]
    NotReady,
}

/// An ordered stream of feed messages.
#[async_trait]
pub trait FeedSource: Send {
    /// (Re)establish the subscription. Called once readiness is reached and after every failure.
    async fn subscribe(&mut self) -> Result<(), FeedError>;

    async fn next_message(&mut self) -> Result<FeedMessage, FeedError>;
}

/// In-process feed. Reports `Disconnected` once every sender is dropped.
pub struct ChannelFeed {
    rx: mpsc::Receiver<FeedMessage>,
}

impl ChannelFeed {
    pub fn new(capacity: usize) -> (mpsc::Sender<FeedMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl FeedSource for ChannelFeed {
    async fn subscribe(&mut self) -> Result<(), FeedError> { Ok(()) }

    async fn next_message(&mut self) -> Result<FeedMessage, FeedError> {
        self.rx.recv().await.ok_or(FeedError::Disconnected)
    }
}
