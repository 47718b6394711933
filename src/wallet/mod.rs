//! Wallet module - bootstrap and readiness gate
//!
//! ```text
//! Uninitialized ──initialize()──▶ Bootstrapping ──success──▶ Ready(address)
//!                                      │
//!                                      └── error: stays here, server never starts
//! ```
//!
//! Bootstrap sequence: default wallet → (regtest) 101 blocks of subsidy →
//! donation wallet → fresh receive address → Ready.

mod bootstrap;
pub mod fixtures;
mod readiness;

pub use bootstrap::{ensure_wallet_exists, Bootstrap, BootstrapError, DEFAULT_WALLET};
pub use readiness::{Readiness, ReadinessWatch, WalletReadiness, WatchedAddress};
