//! Wallet readiness - forward-only state machine with a write-once address handoff

use std::fmt;
use tokio::sync::watch;

/// The address whose incoming payments trigger balance broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchedAddress(String);

impl WatchedAddress {
    pub fn new(address: impl Into<String>) -> Self { Self(address.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for WatchedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WalletReadiness {
    #[default]
    Uninitialized,
    Bootstrapping,
    Ready(WatchedAddress),
}

impl WalletReadiness {
    fn rank(&self) -> u8 {
        match self { WalletReadiness::Uninitialized => 0, WalletReadiness::Bootstrapping => 1, WalletReadiness::Ready(_) => 2 }
    }

    pub fn as_str(&self) -> &'static str {
        match self { WalletReadiness::Uninitialized => "uninitialized", WalletReadiness::Bootstrapping => "bootstrapping", WalletReadiness::Ready(_) => "ready" }
    }

    pub fn is_ready(&self) -> bool { matches!(self, WalletReadiness::Ready(_)) }

    pub fn watched_address(&self) -> Option<&WatchedAddress> {
        match self { WalletReadiness::Ready(addr) => Some(addr), _ => None }
    }
}

/// Writer side. Owned by the bootstrap; transitions only move forward.
pub struct Readiness {
    tx: watch::Sender<WalletReadiness>,
}

impl Default for Readiness {
    fn default() -> Self { Self::new() }
}

impl Readiness {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(WalletReadiness::Uninitialized);
        Self { tx }
    }

    pub fn watch(&self) -> ReadinessWatch {
        ReadinessWatch { rx: self.tx.subscribe() }
    }

    pub fn current(&self) -> WalletReadiness {
        self.tx.borrow().clone()
    }

    /// Move to `next` if it is strictly ahead of the current state.
    pub fn advance(&self, next: WalletReadiness) -> bool {
        let advanced = self.tx.send_if_modified(|state| {
            if next.rank() > state.rank() {
                *state = next.clone();
                true
            } else {
                false
            }
        });
        if advanced {
            tracing::info!(state = next.as_str(), "wallet readiness advanced");
        } else {
            tracing::warn!(requested = next.as_str(), current = self.current().as_str(), "ignored readiness regression");
        }
        advanced
    }
}

/// Reader side, cloneable.
#[derive(Clone)]
pub struct ReadinessWatch {
    rx: watch::Receiver<WalletReadiness>,
}

impl ReadinessWatch {
    pub fn current(&self) -> WalletReadiness {
        self.rx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.rx.borrow().is_ready()
    }

    pub fn watched_address(&self) -> Option<WatchedAddress> {
        self.rx.borrow().watched_address().cloned()
    }

    /// Wait for Ready. `None` if the bootstrap went away without getting there.
    pub async fn wait_ready(&self) -> Option<WatchedAddress> {
        let mut rx = self.rx.clone();
        let state = rx.wait_for(WalletReadiness::is_ready).await.ok()?;
        state.watched_address().cloned()
    }
}
