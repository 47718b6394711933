//! Regtest fixtures: block subsidies for the default wallet and scheduled test payments.
//!
//! Callers gate these on [`Network::is_regtest`]; `spawn_test_payments` re-checks.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::bootstrap::BootstrapError;
use super::readiness::WatchedAddress;
use crate::config::Network;
use crate::rpc::{methods, NodeRpc};
use crate::runtime::ShutdownSignal;

/// Coinbase outputs mature after 100 blocks; 101 leaves one spendable subsidy.
pub const FUNDING_BLOCKS: u64 = 101;

/// BTC sent by each scheduled test payment.
pub const TEST_PAYMENT_BTC: f64 = 0.001;

pub async fn fund_default_wallet(default_wallet: &dyn NodeRpc) -> Result<(), BootstrapError> {
    tracing::info!(blocks = FUNDING_BLOCKS, "generating blocks to fund default wallet");
    let address = default_wallet
        .request(methods::GET_NEW_ADDRESS, &[])
        .await
        .map_err(BootstrapError::node("getnewaddress (default wallet)"))?;
    default_wallet
        .request(methods::GENERATE_TO_ADDRESS, &[Value::from(FUNDING_BLOCKS), address])
        .await
        .map_err(BootstrapError::node("generatetoaddress"))?;
    Ok(())
}

/// Periodically pay the watched address from the default wallet. `None` off regtest.
pub fn spawn_test_payments(
    network: Network,
    default_wallet: Arc<dyn NodeRpc>,
    to: WatchedAddress,
    every: Duration,
    mut shutdown: ShutdownSignal,
) -> Option<JoinHandle<()>> {
    if !network.is_regtest() {
        tracing::warn!(network = network.as_str(), "test payments are regtest-only; not scheduling");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    let params = [Value::from(to.as_str()), Value::from(TEST_PAYMENT_BTC)];
                    match default_wallet.request(methods::SEND_TO_ADDRESS, &params).await {
                        Ok(txid) => tracing::info!(%txid, address = %to, "sent test payment"),
                        Err(e) => tracing::warn!(error = %e, "test payment failed"),
                    }
                }
            }
        }
    }))
}
