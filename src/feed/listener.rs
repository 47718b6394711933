//! FeedListener - match rawtx outputs against the watched address

use bitcoin::{Network, Transaction};
use std::time::Duration;
use tokio::time::Instant;

use super::{FeedError, FeedMessage, FeedSource, RAWTX_TOPIC};
use crate::balance::RefreshHandle;
use crate::decode::{decode_transaction, paying_addresses};
use crate::runtime::ShutdownSignal;
use crate::wallet::{ReadinessWatch, WatchedAddress};

const INITIAL_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(30);

/// True if any output of `tx` pays `watched`. Outputs without an address are logged and skipped.
pub fn pays_watched_address(tx: &Transaction, watched: &WatchedAddress, network: Network) -> bool {
    let mut hit = false;
    for (vout, derived) in paying_addresses(tx, network) {
        match derived {
            Ok(address) => {
                if address.to_string() == watched.as_str() {
                    hit = true;
                }
            }
            Err(e) => tracing::debug!(txid = %tx.compute_txid(), vout, error = %e, "skipping output"),
        }
    }
    hit
}

pub struct FeedListener {
    readiness: ReadinessWatch,
    network: Network,
    refresh: RefreshHandle,
}

impl FeedListener {
    pub fn new(readiness: ReadinessWatch, network: Network, refresh: RefreshHandle) -> Self {
        Self { readiness, network, refresh }
    }

    /// Handle one message. Returns true if a refresh was dispatched (at most one per message).
    pub fn handle_message(&self, watched: &WatchedAddress, msg: &FeedMessage) -> bool {
        if msg.topic != RAWTX_TOPIC {
            tracing::debug!(topic = %msg.topic, "ignoring feed message");
            return false;
        }
        tracing::debug!(topic = %msg.topic, payload = %hex::encode(&msg.payload), "received feed message");

        let tx = match decode_transaction(&msg.payload) {
            Ok(tx) => tx,
            Err(e) => {
                tracing::warn!(error = %e, bytes = msg.payload.len(), "undecodable rawtx");
                return false;
            }
        };

        if !pays_watched_address(&tx, watched, self.network) {
            return false;
        }

        tracing::info!(txid = %tx.compute_txid(), address = %watched, "payment to watched address");
        if !self.refresh.broadcast() {
            tracing::warn!("refresh worker gone; dropping refresh");
        }
        true
    }

    /// Wait for readiness, subscribe and process messages until the source fails.
    pub async fn run<S: FeedSource>(&self, source: &mut S) -> Result<(), FeedError> {
        let watched = self.readiness.wait_ready().await.ok_or(FeedError::NotReady)?;
        source.subscribe().await?;
        loop {
            let msg = source.next_message().await?;
            self.handle_message(&watched, &msg);
        }
    }

    /// `run` with reconnect and exponential backoff. Returns on shutdown or if the wallet never gets ready.
    pub async fn run_supervised<S: FeedSource>(&self, mut source: S, mut shutdown: ShutdownSignal) {
        let mut backoff = INITIAL_RECONNECT_BACKOFF;
        loop {
            let started = Instant::now();
            let result = tokio::select! {
                _ = shutdown.recv() => return,
                result = self.run(&mut source) => result,
            };

            if started.elapsed() > MAX_RECONNECT_BACKOFF {
                backoff = INITIAL_RECONNECT_BACKOFF;
            }
            match result {
                Err(FeedError::NotReady) => {
                    tracing::error!("wallet bootstrap never completed; feed listener stopping");
                    return;
                }
                Err(e) => tracing::warn!(error = %e, retry_in = ?backoff, "feed lost"),
                Ok(()) => {}
            }
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_RECONNECT_BACKOFF);
        }
    }
}
