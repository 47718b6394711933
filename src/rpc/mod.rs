//! Node RPC boundary
//!
//! Everything the service asks of bitcoind goes through [`NodeRpc`]: a single
//! `request(method, params)` call that either yields the JSON result or a
//! [`NodeError`]. Wallet-scoped calls use a separate client per wallet context,
//! grouped in [`NodeClients`].
//!
//! | Context | Endpoint | Used for |
//! |---------|----------|----------|
//! | `node` | `/` | createwallet, listwallets, loadwallet of the default wallet |
//! | `default_wallet` | `/wallet/` | regtest funding, donation wallet creation |
//! | `donation_wallet` | `/wallet/<name>` | watched address, balances |

mod bitcoind;

pub use bitcoind::CoreRpc;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// bitcoind `RPC_WALLET_ALREADY_LOADED`
pub const WALLET_ALREADY_LOADED: i32 = -35;
/// bitcoind `RPC_WALLET_ALREADY_EXISTS`
pub const WALLET_ALREADY_EXISTS: i32 = -36;

/// RPC method names
pub mod methods {
    pub const CREATE_WALLET: &str = "createwallet";
    pub const LOAD_WALLET: &str = "loadwallet";
    pub const LIST_WALLETS: &str = "listwallets";
    pub const GET_NEW_ADDRESS: &str = "getnewaddress";
    pub const GENERATE_TO_ADDRESS: &str = "generatetoaddress";
    pub const GET_BALANCE: &str = "getbalance";
    pub const GET_UNCONFIRMED_BALANCE: &str = "getunconfirmedbalance";
    pub const SEND_TO_ADDRESS: &str = "sendtoaddress";
}

/// Node RPC errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("node error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("transport: {0}")]
    Transport(String),

    #[error("{method} timed out after {secs}s")]
    Timeout { method: String, secs: u64 },

    #[error("unexpected response to {method}: {detail}")]
    UnexpectedResponse { method: String, detail: String },
}

impl NodeError {
    pub fn rpc(code: i32, message: impl Into<String>) -> Self {
        NodeError::Rpc { code, message: message.into() }
    }

    /// createwallet on a wallet that is already on disk
    pub fn is_already_exists(&self) -> bool {
        match self {
            NodeError::Rpc { code, message } => {
                *code == WALLET_ALREADY_EXISTS || message.contains("already exists")
            }
            _ => false,
        }
    }

    /// loadwallet on a wallet that is already loaded
    pub fn is_already_loaded(&self) -> bool {
        match self {
            NodeError::Rpc { code, message } => {
                *code == WALLET_ALREADY_LOADED || message.contains("already loaded")
            }
            _ => false,
        }
    }
}

/// Request/response access to the node.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    async fn request(&self, method: &str, params: &[Value]) -> Result<Value, NodeError>;
}

/// The three wallet contexts the service talks to.
#[derive(Clone)]
pub struct NodeClients {
    pub node: Arc<dyn NodeRpc>,
    pub default_wallet: Arc<dyn NodeRpc>,
    pub donation_wallet: Arc<dyn NodeRpc>,
}

/// `loadwallet`, treating "already loaded" as success. Returns true if the call loaded it.
pub async fn load_wallet(client: &dyn NodeRpc, name: &str) -> Result<bool, NodeError> {
    match client.request(methods::LOAD_WALLET, &[Value::from(name)]).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_already_loaded() => {
            tracing::debug!(wallet = name, "wallet already loaded");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
