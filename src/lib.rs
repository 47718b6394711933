//! Tipjar: live donation tracker for a bitcoind wallet.
//!
//! # Architecture
//!
//! ```text
//! bitcoind ──rawtx (ZMQ)──▶ FeedListener ──match──▶ RefreshHandle
//!    ▲                                                   │
//!    │ JSON-RPC                                          ▼
//!    ├──────────────────────────────────────────── RefreshWorker
//!    │                                              (BalanceRefresher)
//! Bootstrap ──Ready(address)──▶ ReadinessWatch           │ snapshot
//!                                   │                    ▼
//!                          readiness gate ──▶ ConnectionRegistry ──▶ WebSocket clients
//! ```
//!
//! - [`wallet`] - wallet bootstrap and the forward-only readiness state
//! - [`feed`] - rawtx subscription, decoding and address matching
//! - [`balance`] - balance snapshots and the sequential refresh worker
//! - [`server`] - connection registry, WebSocket/HTTP routes, start gate
//! - [`rpc`] - node JSON-RPC boundary
//!
//! # Usage
//!
//! ```ignore
//! use tipjar::{Bootstrap, Config, CoreRpc};
//!
//! let config = Config::from_env()?;
//! let clients = CoreRpc::clients(&config)?;
//! let bootstrap = Bootstrap::new(clients, &config.wallet_name, config.network);
//! let address = bootstrap.initialize().await?;
//! ```

pub mod balance;
pub mod config;
pub mod decode;
pub mod feed;
pub mod logging;
pub mod rpc;
pub mod runtime;
pub mod server;
pub mod wallet;

pub use balance::{BalanceRefresher, BalanceSnapshot, BalanceValue, RefreshHandle, RefreshTarget, RefreshWorker, refresh_channel};
pub use config::{Config, Network, RpcAuth};
pub use feed::{ChannelFeed, FeedListener, FeedMessage, FeedSource};
#[cfg(feature = "zmq")]
pub use feed::ZmqFeed;
pub use rpc::{CoreRpc, NodeClients, NodeError, NodeRpc};
pub use runtime::{install_signal_handlers, Shutdown};
pub use server::{create_router, AppState, ConnectionRegistry};
pub use wallet::{Bootstrap, BootstrapError, ReadinessWatch, WalletReadiness, WatchedAddress};
