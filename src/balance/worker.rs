//! RefreshWorker - sequential, coalescing execution of refresh requests

use std::collections::BTreeSet;
use tokio::sync::mpsc;

use super::BalanceRefresher;
use crate::server::ConnectionId;

/// Who receives the snapshot of a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshTarget {
    /// Every connection live when the snapshot is delivered
    All,
    /// Just these connections (e.g. a client that just joined)
    Only(BTreeSet<ConnectionId>),
}

impl RefreshTarget {
    pub fn one(id: ConnectionId) -> Self {
        RefreshTarget::Only(BTreeSet::from([id]))
    }

    /// Combine two pending requests into one. `All` covers any live connection.
    pub fn merge(self, other: RefreshTarget) -> RefreshTarget {
        match (self, other) {
            (RefreshTarget::Only(mut a), RefreshTarget::Only(b)) => {
                a.extend(b);
                RefreshTarget::Only(a)
            }
            _ => RefreshTarget::All,
        }
    }
}

/// Cheap, cloneable dispatcher. Sending never waits on the node.
#[derive(Clone)]
pub struct RefreshHandle {
    tx: mpsc::UnboundedSender<RefreshTarget>,
}

impl RefreshHandle {
    /// Returns false if the worker is gone.
    pub fn request(&self, target: RefreshTarget) -> bool {
        self.tx.send(target).is_ok()
    }

    pub fn broadcast(&self) -> bool { self.request(RefreshTarget::All) }

    pub fn only(&self, id: ConnectionId) -> bool { self.request(RefreshTarget::one(id)) }
}

pub struct RefreshQueue {
    rx: mpsc::UnboundedReceiver<RefreshTarget>,
}

pub fn refresh_channel() -> (RefreshHandle, RefreshQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RefreshHandle { tx }, RefreshQueue { rx })
}

impl RefreshQueue {
    /// Next request merged with everything queued behind it. `None` once all handles are dropped.
    pub async fn next(&mut self) -> Option<RefreshTarget> {
        let mut target = self.rx.recv().await?;
        while let Ok(more) = self.rx.try_recv() {
            target = target.merge(more);
        }
        Some(target)
    }

    /// Requests currently queued, unmerged.
    pub fn drain_pending(&mut self) -> Vec<RefreshTarget> {
        let mut pending = Vec::new();
        while let Ok(target) = self.rx.try_recv() {
            pending.push(target);
        }
        pending
    }
}

pub struct RefreshWorker {
    refresher: BalanceRefresher,
    queue: RefreshQueue,
}

impl RefreshWorker {
    pub fn new(refresher: BalanceRefresher, queue: RefreshQueue) -> Self {
        Self { refresher, queue }
    }

    /// Run until every [`RefreshHandle`] is dropped.
    pub async fn run(mut self) {
        while let Some(target) = self.queue.next().await {
            if let Err(e) = self.refresher.refresh(&target).await {
                tracing::warn!(?target, error = %e, "balance refresh failed; nothing sent");
            }
        }
        tracing::debug!("refresh worker stopped");
    }
}
