//! Balance - snapshots of the donation wallet and their delivery
//!
//! A refresh always re-queries the node: loadwallet (already-loaded is fine),
//! then `getbalance` and `getunconfirmedbalance` concurrently. Only a complete
//! snapshot is ever delivered; a failed query abandons that refresh.
//!
//! Refreshes are requested through a [`RefreshHandle`] and executed one at a
//! time by the [`RefreshWorker`], so a snapshot computed from earlier node
//! answers never reaches a client after a later one.

mod worker;

pub use worker::{refresh_channel, RefreshHandle, RefreshQueue, RefreshTarget, RefreshWorker};

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::sync::Arc;

use crate::rpc::{load_wallet, methods, NodeError, NodeRpc};
use crate::server::ConnectionRegistry;

/// A balance as the node reported it, number or decimal string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BalanceValue {
    Number(Number),
    Text(String),
}

impl BalanceValue {
    pub fn from_response(method: &str, value: Value) -> Result<Self, NodeError> {
        match value {
            Value::Number(n) => Ok(BalanceValue::Number(n)),
            Value::String(s) => Ok(BalanceValue::Text(s)),
            other => Err(NodeError::UnexpectedResponse { method: method.into(), detail: other.to_string() }),
        }
    }
}

/// Immutable confirmed/unconfirmed pair; serialized as `{"confirmed":..,"unconfirmed":..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub confirmed: BalanceValue,
    pub unconfirmed: BalanceValue,
}

impl BalanceSnapshot {
    pub fn to_message(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub struct BalanceRefresher {
    wallet: Arc<dyn NodeRpc>,
    wallet_name: String,
    registry: ConnectionRegistry,
}

impl BalanceRefresher {
    /// `wallet` must be the donation wallet's client.
    pub fn new(wallet: Arc<dyn NodeRpc>, wallet_name: impl Into<String>, registry: ConnectionRegistry) -> Self {
        Self { wallet, wallet_name: wallet_name.into(), registry }
    }

    /// Query the node for a fresh snapshot.
    pub async fn snapshot(&self) -> Result<BalanceSnapshot, NodeError> {
        if let Err(e) = load_wallet(self.wallet.as_ref(), &self.wallet_name).await {
            tracing::warn!(wallet = %self.wallet_name, error = %e, "loadwallet failed before balance query");
        }

        let (confirmed, unconfirmed) = tokio::try_join!(
            self.wallet.request(methods::GET_BALANCE, &[]),
            self.wallet.request(methods::GET_UNCONFIRMED_BALANCE, &[]),
        )?;

        Ok(BalanceSnapshot {
            confirmed: BalanceValue::from_response(methods::GET_BALANCE, confirmed)?,
            unconfirmed: BalanceValue::from_response(methods::GET_UNCONFIRMED_BALANCE, unconfirmed)?,
        })
    }

    /// Take a snapshot and deliver it to `target`. Nothing is delivered on error.
    pub async fn refresh(&self, target: &RefreshTarget) -> Result<BalanceSnapshot, NodeError> {
        let snapshot = self.snapshot().await?;
        let delivered = match target {
            RefreshTarget::All => self.registry.broadcast(&snapshot),
            RefreshTarget::Only(ids) => self.registry.deliver(ids, &snapshot),
        };
        tracing::debug!(?target, delivered, "balance delivered");
        Ok(snapshot)
    }
}
