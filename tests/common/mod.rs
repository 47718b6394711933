//! Shared test fixtures: a scripted node and transaction builders.

#![allow(dead_code)]

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::{consensus, transaction, Address, Amount, Network, ScriptBuf, Transaction, TxIn, TxOut, WPubkeyHash};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tipjar::rpc::{NodeClients, NodeError, NodeRpc};

/// Node double: per-method default results plus one-shot overrides, with a call log.
#[derive(Default)]
pub struct MockNode {
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    defaults: Mutex<HashMap<String, Result<Value, NodeError>>>,
    once: Mutex<HashMap<String, VecDeque<Result<Value, NodeError>>>>,
}

impl MockNode {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    /// Answer every `method` call with `result`.
    pub fn on(&self, method: &str, result: Result<Value, NodeError>) -> &Self {
        self.defaults.lock().unwrap().insert(method.into(), result);
        self
    }

    /// Answer the next `method` call with `result`, ahead of the default.
    pub fn once(&self, method: &str, result: Result<Value, NodeError>) -> &Self {
        self.once.lock().unwrap().entry(method.into()).or_default().push_back(result);
        self
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn params(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls.lock().unwrap().iter().filter(|(m, _)| m == method).map(|(_, p)| p.clone()).collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(m, _)| m == method).count()
    }
}

#[async_trait]
impl NodeRpc for MockNode {
    async fn request(&self, method: &str, params: &[Value]) -> Result<Value, NodeError> {
        self.calls.lock().unwrap().push((method.to_string(), params.to_vec()));
        if let Some(result) = self.once.lock().unwrap().get_mut(method).and_then(|q| q.pop_front()) {
            return result;
        }
        self.defaults
            .lock()
            .unwrap()
            .get(method)
            .cloned()
            .unwrap_or_else(|| Err(NodeError::rpc(-32601, "Method not found")))
    }
}

pub struct MockNodes {
    pub node: Arc<MockNode>,
    pub default_wallet: Arc<MockNode>,
    pub donation_wallet: Arc<MockNode>,
}

impl MockNodes {
    pub fn new() -> Self {
        Self { node: MockNode::new(), default_wallet: MockNode::new(), donation_wallet: MockNode::new() }
    }

    pub fn clients(&self) -> NodeClients {
        NodeClients {
            node: self.node.clone(),
            default_wallet: self.default_wallet.clone(),
            donation_wallet: self.donation_wallet.clone(),
        }
    }
}

/// A fresh regtest node: nothing exists yet, createwallet loads what it creates.
pub fn fresh_regtest_node(wallet: &str, fund_addr: &str, watched: &str) -> MockNodes {
    let nodes = MockNodes::new();
    nodes.node
        .on("createwallet", Ok(serde_json::json!({"name": "", "warning": ""})))
        .on("listwallets", Ok(serde_json::json!([""])));
    nodes.default_wallet
        .on("getnewaddress", Ok(Value::from(fund_addr)))
        .on("generatetoaddress", Ok(serde_json::json!([])))
        .on("createwallet", Ok(serde_json::json!({"name": wallet, "warning": ""})))
        .on("listwallets", Ok(serde_json::json!(["", wallet])));
    nodes.donation_wallet
        .on("getnewaddress", Ok(Value::from(watched)))
        .on("loadwallet", Err(NodeError::rpc(-35, format!("Wallet \"{}\" is already loaded.", wallet))))
        .on("getbalance", Ok(serde_json::json!(0.5)))
        .on("getunconfirmedbalance", Ok(serde_json::json!(0.001)));
    nodes
}

/// Deterministic regtest address from a single byte.
pub fn regtest_address(n: u8) -> Address {
    let script = ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([n; 20]));
    Address::from_script(&script, Network::Regtest).expect("p2wpkh address")
}

pub fn tx_with_outputs(scripts: Vec<ScriptBuf>) -> Transaction {
    Transaction {
        version: transaction::Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn::default()],
        output: scripts.into_iter().map(|script_pubkey| TxOut { value: Amount::from_sat(10_000), script_pubkey }).collect(),
    }
}

pub fn raw(tx: &Transaction) -> Vec<u8> {
    consensus::encode::serialize(tx)
}

/// OP_RETURN output: never has an address.
pub fn op_return() -> ScriptBuf {
    ScriptBuf::from_bytes(vec![0x6a, 0x04, 0xde, 0xad, 0xbe, 0xef])
}

/// Poll `cond` until true or the deadline passes.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
