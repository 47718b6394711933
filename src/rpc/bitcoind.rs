//! CoreRpc - bitcoincore-rpc client, one per wallet context

use async_trait::async_trait;
use bitcoincore_rpc::{jsonrpc, Auth, Client, RpcApi};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::{NodeClients, NodeError, NodeRpc};
use crate::config::{Config, RpcAuth};

/// Characters left as-is in the `/wallet/<name>` path segment.
const WALLET_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// `<base>/wallet/<name>` with the name percent-encoded; the default wallet ("") maps to `/wallet/`.
pub fn wallet_url(base: &str, wallet: &str) -> String {
    format!("{}/wallet/{}", base.trim_end_matches('/'), utf8_percent_encode(wallet, WALLET_SEGMENT))
}

pub struct CoreRpc {
    client: Arc<Client>,
    url: String,
    timeout: Duration,
}

impl CoreRpc {
    /// Connect to `url` (a base node URL or a `/wallet/<name>` URL).
    pub fn connect(url: impl Into<String>, auth: &RpcAuth, timeout: Duration) -> Result<Self, NodeError> {
        let url = url.into();
        let auth = match auth {
            RpcAuth::UserPass { user, pass } => Auth::UserPass(user.clone(), pass.clone()),
            RpcAuth::Cookie(path) => Auth::CookieFile(path.clone()),
            RpcAuth::None => Auth::None,
        };
        let client = Client::new(&url, auth)
            .map_err(|e| NodeError::Transport(format!("RPC connect {}: {}", url, e)))?;
        Ok(Self { client: Arc::new(client), url, timeout })
    }

    /// Build the base, default-wallet and donation-wallet clients from config.
    pub fn clients(config: &Config) -> Result<NodeClients, NodeError> {
        let base = config.rpc_url.trim_end_matches('/');
        let timeout = config.rpc_timeout;
        Ok(NodeClients {
            node: Arc::new(Self::connect(base, &config.rpc_auth, timeout)?),
            default_wallet: Arc::new(Self::connect(wallet_url(base, ""), &config.rpc_auth, timeout)?),
            donation_wallet: Arc::new(Self::connect(wallet_url(base, &config.wallet_name), &config.rpc_auth, timeout)?),
        })
    }
}

fn map_error(e: bitcoincore_rpc::Error) -> NodeError {
    match e {
        bitcoincore_rpc::Error::JsonRpc(jsonrpc::Error::Rpc(rpc)) => NodeError::rpc(rpc.code, rpc.message),
        other => NodeError::Transport(other.to_string()),
    }
}

#[async_trait]
impl NodeRpc for CoreRpc {
    async fn request(&self, method: &str, params: &[Value]) -> Result<Value, NodeError> {
        let client = self.client.clone();
        let cmd = method.to_string();
        let args = params.to_vec();
        let call = tokio::task::spawn_blocking(move || client.call::<Value>(&cmd, &args));

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(result)) => result.map_err(map_error),
            Ok(Err(join)) => Err(NodeError::Transport(format!("RPC task: {}", join))),
            Err(_) => {
                tracing::warn!(method, url = %self.url, "RPC call timed out");
                Err(NodeError::Timeout { method: method.to_string(), secs: self.timeout.as_secs() })
            }
        }
    }
}
