//! Bootstrap - bring the default and donation wallets up, discover the watched address

use serde_json::Value;
use thiserror::Error;

use super::fixtures;
use super::readiness::{Readiness, ReadinessWatch, WalletReadiness, WatchedAddress};
use crate::config::Network;
use crate::rpc::{methods, NodeClients, NodeError, NodeRpc};

/// The node's default wallet has the empty name.
pub const DEFAULT_WALLET: &str = "";

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("{step}: {source}")]
    Node {
        step: &'static str,
        #[source]
        source: NodeError,
    },

    #[error("bootstrap already started (state: {0})")]
    AlreadyStarted(&'static str),
}

impl BootstrapError {
    pub(crate) fn node(step: &'static str) -> impl FnOnce(NodeError) -> Self {
        move |source| BootstrapError::Node { step, source }
    }
}

pub struct Bootstrap {
    clients: NodeClients,
    wallet_name: String,
    network: Network,
    readiness: Readiness,
}

impl Bootstrap {
    pub fn new(clients: NodeClients, wallet_name: impl Into<String>, network: Network) -> Self {
        Self { clients, wallet_name: wallet_name.into(), network, readiness: Readiness::new() }
    }

    pub fn watch(&self) -> ReadinessWatch { self.readiness.watch() }

    pub fn readiness(&self) -> WalletReadiness { self.readiness.current() }

    /// Run the bootstrap sequence once. On error the state stays at Bootstrapping.
    pub async fn initialize(&self) -> Result<WatchedAddress, BootstrapError> {
        match self.readiness.current() {
            WalletReadiness::Uninitialized => {}
            WalletReadiness::Ready(addr) => return Ok(addr),
            state => return Err(BootstrapError::AlreadyStarted(state.as_str())),
        }
        self.readiness.advance(WalletReadiness::Bootstrapping);

        ensure_wallet_exists(self.clients.node.as_ref(), DEFAULT_WALLET).await?;

        if self.network.is_regtest() {
            fixtures::fund_default_wallet(self.clients.default_wallet.as_ref()).await?;
        }

        ensure_wallet_exists(self.clients.default_wallet.as_ref(), &self.wallet_name).await?;

        let address = self
            .clients
            .donation_wallet
            .request(methods::GET_NEW_ADDRESS, &[])
            .await
            .map_err(BootstrapError::node("getnewaddress (donation wallet)"))?;
        let address = match address {
            Value::String(s) if !s.is_empty() => WatchedAddress::new(s),
            other => {
                return Err(BootstrapError::Node {
                    step: "getnewaddress (donation wallet)",
                    source: NodeError::UnexpectedResponse { method: methods::GET_NEW_ADDRESS.into(), detail: other.to_string() },
                })
            }
        };

        tracing::info!(address = %address, wallet = %self.wallet_name, "watching donation address");
        self.readiness.advance(WalletReadiness::Ready(address.clone()));
        Ok(address)
    }
}

/// Create `name` if missing and make sure it is loaded. Returns true if it was newly created.
pub async fn ensure_wallet_exists(client: &dyn NodeRpc, name: &str) -> Result<bool, BootstrapError> {
    let created = match client.request(methods::CREATE_WALLET, &[Value::from(name)]).await {
        Ok(_) => {
            tracing::info!(wallet = name, "created wallet");
            true
        }
        Err(e) if e.is_already_exists() => {
            tracing::info!(wallet = name, "wallet already exists");
            false
        }
        Err(e) => return Err(BootstrapError::Node { step: "createwallet", source: e }),
    };

    let loaded = client
        .request(methods::LIST_WALLETS, &[])
        .await
        .map_err(BootstrapError::node("listwallets"))?;
    let loaded = match loaded {
        Value::Array(names) => names.iter().any(|n| n.as_str() == Some(name)),
        other => {
            return Err(BootstrapError::Node {
                step: "listwallets",
                source: NodeError::UnexpectedResponse { method: methods::LIST_WALLETS.into(), detail: other.to_string() },
            })
        }
    };

    if !loaded {
        match client.request(methods::LOAD_WALLET, &[Value::from(name)]).await {
            Ok(_) => tracing::info!(wallet = name, "loaded wallet"),
            Err(e) if e.is_already_loaded() => tracing::info!(wallet = name, "wallet already loaded"),
            Err(e) => return Err(BootstrapError::Node { step: "loadwallet", source: e }),
        }
    }

    Ok(created)
}
