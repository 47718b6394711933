//! Feed → refresh → broadcast pipeline
//!
//! These tests verify:
//! 1. Exactly one refresh per matching message, none for others
//! 2. Bad outputs and bad messages never stop the listener
//! 3. The listener waits for readiness before consuming the feed
//! 4. Snapshots reach every live connection, scoped refreshes only their target
//! 5. A failed balance query broadcasts nothing and the next payment still refreshes
//! 6. The worker coalesces a backlog and never delivers out of order
//! 7. The supervised listener resubscribes with capped exponential backoff

mod common;

use async_trait::async_trait;
use common::{eventually, fresh_regtest_node, op_return, raw, regtest_address, tx_with_outputs, MockNode};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tipjar::balance::{refresh_channel, BalanceRefresher, RefreshTarget, RefreshWorker};
use tipjar::feed::{pays_watched_address, ChannelFeed, FeedError, FeedListener, FeedMessage, FeedSource, MAX_RECONNECT_BACKOFF};
use tipjar::rpc::NodeError;
use tipjar::server::{ClientConnection, ConnectionRegistry};
use tipjar::wallet::{Bootstrap, Readiness, WalletReadiness, WatchedAddress};
use tipjar::{Network, Shutdown};
use tokio::time::Instant;

fn ready(address: &str) -> Readiness {
    let readiness = Readiness::new();
    readiness.advance(WalletReadiness::Bootstrapping);
    readiness.advance(WalletReadiness::Ready(WatchedAddress::new(address)));
    readiness
}

#[test]
fn one_refresh_per_message_even_with_repeated_outputs() {
    let watched = regtest_address(1);
    let readiness = ready(&watched.to_string());
    let (refresh, mut queue) = refresh_channel();
    let listener = FeedListener::new(readiness.watch(), bitcoin::Network::Regtest, refresh);
    let addr = readiness.watch().watched_address().unwrap();

    let tx = tx_with_outputs(vec![watched.script_pubkey(), regtest_address(2).script_pubkey(), watched.script_pubkey()]);
    assert!(listener.handle_message(&addr, &FeedMessage::rawtx(raw(&tx))));
    assert_eq!(queue.drain_pending(), vec![RefreshTarget::All]);
}

#[test]
fn unrelated_transactions_dispatch_nothing() {
    let readiness = ready(&regtest_address(1).to_string());
    let (refresh, mut queue) = refresh_channel();
    let listener = FeedListener::new(readiness.watch(), bitcoin::Network::Regtest, refresh);
    let addr = readiness.watch().watched_address().unwrap();

    let tx = tx_with_outputs(vec![regtest_address(2).script_pubkey(), regtest_address(3).script_pubkey()]);
    assert!(!listener.handle_message(&addr, &FeedMessage::rawtx(raw(&tx))));

    // Other topics and undecodable payloads are skipped too
    assert!(!listener.handle_message(&addr, &FeedMessage { topic: "hashblock".into(), payload: vec![0; 32] }));
    assert!(!listener.handle_message(&addr, &FeedMessage::rawtx(vec![0xff, 0x00, 0x13])));
    assert!(queue.drain_pending().is_empty());
}

#[test]
fn undecodable_output_does_not_hide_match() {
    let watched = regtest_address(9);
    let addr = WatchedAddress::new(watched.to_string());
    let tx = tx_with_outputs(vec![op_return(), watched.script_pubkey()]);
    assert!(pays_watched_address(&tx, &addr, bitcoin::Network::Regtest));

    let readiness = ready(addr.as_str());
    let (refresh, mut queue) = refresh_channel();
    let listener = FeedListener::new(readiness.watch(), bitcoin::Network::Regtest, refresh);
    assert!(listener.handle_message(&addr, &FeedMessage::rawtx(raw(&tx))));
    assert_eq!(queue.drain_pending().len(), 1);
}

#[test]
fn match_is_case_sensitive_and_network_specific() {
    let watched = regtest_address(4);
    let tx = tx_with_outputs(vec![watched.script_pubkey()]);

    let upper = WatchedAddress::new(watched.to_string().to_uppercase());
    assert!(!pays_watched_address(&tx, &upper, bitcoin::Network::Regtest));

    // Same script under mainnet rules derives a bc1 address
    let exact = WatchedAddress::new(watched.to_string());
    assert!(!pays_watched_address(&tx, &exact, bitcoin::Network::Bitcoin));
}

#[tokio::test]
async fn listener_waits_for_readiness_and_survives_bad_messages() {
    let watched = regtest_address(5);
    let readiness = Readiness::new();
    let (refresh, mut queue) = refresh_channel();
    let listener = FeedListener::new(readiness.watch(), bitcoin::Network::Regtest, refresh);
    let (feed_tx, mut feed) = ChannelFeed::new(16);

    let paying = tx_with_outputs(vec![watched.script_pubkey()]);
    feed_tx.send(FeedMessage::rawtx(vec![0x01, 0x02])).await.unwrap();
    feed_tx.send(FeedMessage::rawtx(raw(&paying))).await.unwrap();

    let task = tokio::spawn(async move { listener.run(&mut feed).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(queue.drain_pending().is_empty(), "matched before the address was known");

    readiness.advance(WalletReadiness::Ready(WatchedAddress::new(watched.to_string())));
    let target = tokio::time::timeout(Duration::from_secs(1), queue.next()).await.unwrap();
    assert_eq!(target, Some(RefreshTarget::All));

    // Feed going away ends `run` with a disconnect, not a panic
    drop(feed_tx);
    let result = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    assert!(matches!(result, Err(FeedError::Disconnected)));
}

#[tokio::test]
async fn listener_gives_up_if_bootstrap_is_gone() {
    let readiness = Readiness::new();
    let (refresh, _queue) = refresh_channel();
    let listener = FeedListener::new(readiness.watch(), bitcoin::Network::Regtest, refresh);
    let (_feed_tx, mut feed) = ChannelFeed::new(1);
    drop(readiness);
    assert!(matches!(listener.run(&mut feed).await, Err(FeedError::NotReady)));
}

#[tokio::test]
async fn refresh_is_idempotent_without_balance_change() {
    let node = MockNode::new();
    node.on("loadwallet", Ok(json!({"name": "donations"})))
        .on("getbalance", Ok(json!(1.25)))
        .on("getunconfirmedbalance", Ok(json!("0.00010000")));
    let refresher = BalanceRefresher::new(node.clone(), "donations", ConnectionRegistry::new());

    let first = refresher.snapshot().await.unwrap();
    let second = refresher.snapshot().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(node.count("getbalance"), 2, "every refresh re-queries the node");
    assert_eq!(node.params("loadwallet")[0], vec![json!("donations")]);
}

#[tokio::test]
async fn failed_query_delivers_nothing() {
    let node = MockNode::new();
    node.on("loadwallet", Err(NodeError::rpc(-35, "already loaded")))
        .on("getbalance", Err(NodeError::Timeout { method: "getbalance".into(), secs: 30 }))
        .on("getunconfirmedbalance", Ok(json!(0)));
    let registry = ConnectionRegistry::new();
    let mut conn = registry.register();
    let refresher = BalanceRefresher::new(node, "donations", registry.clone());

    assert!(refresher.refresh(&RefreshTarget::All).await.is_err());
    assert!(conn.outbound.try_recv().is_err());
    assert!(registry.is_live(conn.id));
}

#[tokio::test]
async fn connect_refresh_is_scoped_to_the_new_client() {
    let node = MockNode::new();
    node.on("loadwallet", Ok(Value::Null)).on("getbalance", Ok(json!(2))).on("getunconfirmedbalance", Ok(json!(0)));
    let registry = ConnectionRegistry::new();
    let (refresh, queue) = refresh_channel();
    tokio::spawn(RefreshWorker::new(BalanceRefresher::new(node, "donations", registry.clone()), queue).run());

    let mut existing = registry.register();
    let mut joining = registry.on_connect(&refresh);

    let msg = tokio::time::timeout(Duration::from_secs(1), joining.outbound.recv()).await.unwrap().unwrap();
    assert_eq!(serde_json::from_str::<Value>(&msg).unwrap(), json!({"confirmed": 2, "unconfirmed": 0}));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(existing.outbound.try_recv().is_err());
    assert!(joining.outbound.try_recv().is_err(), "exactly one snapshot for the joining client");
}

/// Regtest bootstrap → payment to the watched address on the feed → every client gets the balance.
#[tokio::test]
async fn payment_on_feed_reaches_all_clients() {
    let watched = regtest_address(7);
    let nodes = fresh_regtest_node("donations", &regtest_address(8).to_string(), &watched.to_string());
    let bootstrap = Bootstrap::new(nodes.clients(), "donations", Network::Regtest);
    let readiness = bootstrap.watch();
    let address = bootstrap.initialize().await.unwrap();
    assert_eq!(address.as_str(), watched.to_string());
    assert_eq!(nodes.default_wallet.params("generatetoaddress")[0][0], json!(101));

    let registry = ConnectionRegistry::new();
    let (refresh, queue) = refresh_channel();
    let refresher = BalanceRefresher::new(nodes.donation_wallet.clone(), "donations", registry.clone());
    tokio::spawn(RefreshWorker::new(refresher, queue).run());

    let mut a = registry.register();
    let mut b = registry.register();
    let gone = registry.register();
    registry.on_disconnect(gone.id);

    let listener = FeedListener::new(readiness, bitcoin::Network::Regtest, refresh);
    let (feed_tx, mut feed) = ChannelFeed::new(4);
    tokio::spawn(async move { listener.run(&mut feed).await });

    let payment = tx_with_outputs(vec![regtest_address(3).script_pubkey(), watched.script_pubkey()]);
    feed_tx.send(FeedMessage::rawtx(raw(&payment))).await.unwrap();

    let expected = json!({"confirmed": 0.5, "unconfirmed": 0.001});
    for conn in [&mut a, &mut b] {
        let msg = tokio::time::timeout(Duration::from_secs(1), conn.outbound.recv()).await.unwrap().unwrap();
        assert_eq!(serde_json::from_str::<Value>(&msg).unwrap(), expected);
    }
    assert!(!registry.is_live(gone.id));
}

/// getbalance fails once: nothing is broadcast, the listener keeps going, the next payment refreshes.
#[tokio::test]
async fn transient_balance_failure_then_recovery() {
    let watched = regtest_address(6);
    let readiness = ready(&watched.to_string());
    let node = MockNode::new();
    node.on("loadwallet", Err(NodeError::rpc(-35, "already loaded")))
        .on("getbalance", Ok(json!(0.3)))
        .on("getunconfirmedbalance", Ok(json!(0.2)))
        .once("getbalance", Err(NodeError::Transport("connection reset".into())));

    let registry = ConnectionRegistry::new();
    let mut client = registry.register();
    let (refresh, queue) = refresh_channel();
    tokio::spawn(RefreshWorker::new(BalanceRefresher::new(node.clone(), "donations", registry.clone()), queue).run());

    let listener = FeedListener::new(readiness.watch(), bitcoin::Network::Regtest, refresh);
    let (feed_tx, mut feed) = ChannelFeed::new(4);
    let listener_task = tokio::spawn(async move { listener.run(&mut feed).await });

    let payment = raw(&tx_with_outputs(vec![watched.script_pubkey()]));
    feed_tx.send(FeedMessage::rawtx(payment.clone())).await.unwrap();

    let node_probe = node.clone();
    assert!(eventually(|| node_probe.count("getbalance") >= 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(client.outbound.try_recv().is_err(), "no snapshot after a failed query");
    assert!(!listener_task.is_finished());

    feed_tx.send(FeedMessage::rawtx(payment)).await.unwrap();
    let msg = tokio::time::timeout(Duration::from_secs(1), client.outbound.recv()).await.unwrap().unwrap();
    assert_eq!(serde_json::from_str::<Value>(&msg).unwrap(), json!({"confirmed": 0.3, "unconfirmed": 0.2}));
    assert_eq!(node.count("getbalance"), 2);
}

async fn next_confirmed(conn: &mut ClientConnection) -> Value {
    let msg = tokio::time::timeout(Duration::from_secs(1), conn.outbound.recv()).await.unwrap().unwrap();
    serde_json::from_str::<Value>(&msg).unwrap()["confirmed"].clone()
}

#[tokio::test]
async fn worker_coalesces_backlog_and_keeps_delivery_order() {
    let node = MockNode::new();
    node.on("loadwallet", Ok(Value::Null))
        .on("getunconfirmedbalance", Ok(json!(0)))
        .once("getbalance", Ok(json!(1)))
        .once("getbalance", Ok(json!(2)))
        .once("getbalance", Ok(json!(3)));
    let registry = ConnectionRegistry::new();
    let mut a = registry.register();
    let mut b = registry.register();
    let (refresh, queue) = refresh_channel();

    // Queued before the worker first runs: one refresh covers all three
    let worker = tokio::spawn(RefreshWorker::new(BalanceRefresher::new(node.clone(), "donations", registry.clone()), queue).run());
    assert!(refresh.broadcast());
    assert!(refresh.only(b.id));
    assert!(refresh.broadcast());

    assert_eq!(next_confirmed(&mut a).await, json!(1));
    assert_eq!(next_confirmed(&mut b).await, json!(1));
    assert_eq!(node.count("getbalance"), 1);

    assert!(refresh.only(b.id));
    assert_eq!(next_confirmed(&mut b).await, json!(2));
    assert!(refresh.broadcast());
    assert_eq!(next_confirmed(&mut a).await, json!(3));
    assert_eq!(next_confirmed(&mut b).await, json!(3));

    // a never saw the scoped snapshot, and nothing is left over
    assert!(a.outbound.try_recv().is_err());
    assert!(b.outbound.try_recv().is_err());

    drop(refresh);
    tokio::time::timeout(Duration::from_secs(1), worker).await.unwrap().unwrap();
}

/// Feed double: scripted subscribe results and messages, records when it was (re)subscribed.
struct ScriptedFeed {
    subscribe_results: VecDeque<Result<(), FeedError>>,
    messages: VecDeque<(Duration, Result<FeedMessage, FeedError>)>,
    subscribed_at: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedFeed {
    fn new() -> Self {
        Self { subscribe_results: VecDeque::new(), messages: VecDeque::new(), subscribed_at: Arc::default() }
    }

    fn failing_subscribes(mut self, n: usize) -> Self {
        for _ in 0..n {
            self.subscribe_results.push_back(Err(FeedError::Transport("connection refused".into())));
        }
        self
    }

    fn then(mut self, after: Duration, message: Result<FeedMessage, FeedError>) -> Self {
        self.messages.push_back((after, message));
        self
    }

    fn gaps(log: &Mutex<Vec<Instant>>) -> Vec<Duration> {
        log.lock().unwrap().windows(2).map(|w| w[1] - w[0]).collect()
    }
}

#[async_trait]
impl FeedSource for ScriptedFeed {
    async fn subscribe(&mut self) -> Result<(), FeedError> {
        self.subscribed_at.lock().unwrap().push(Instant::now());
        self.subscribe_results.pop_front().unwrap_or(Ok(()))
    }

    async fn next_message(&mut self) -> Result<FeedMessage, FeedError> {
        match self.messages.pop_front() {
            Some((after, message)) => {
                tokio::time::sleep(after).await;
                message
            }
            None => std::future::pending().await,
        }
    }
}

async fn wait_for_subscribes(log: &Mutex<Vec<Instant>>, n: usize) {
    while log.lock().unwrap().len() < n {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn supervised_listener_resubscribes_after_failures() {
    let watched = regtest_address(11);
    let readiness = ready(&watched.to_string());
    let (refresh, mut queue) = refresh_channel();
    let listener = FeedListener::new(readiness.watch(), bitcoin::Network::Regtest, refresh);

    let paying = raw(&tx_with_outputs(vec![watched.script_pubkey()]));
    let feed = ScriptedFeed::new()
        .failing_subscribes(1)
        .then(Duration::ZERO, Err(FeedError::Disconnected))
        .then(Duration::ZERO, Ok(FeedMessage::rawtx(paying)));
    let subscribed = feed.subscribed_at.clone();

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    let task = tokio::spawn(async move { listener.run_supervised(feed, signal).await });

    let target = tokio::time::timeout(Duration::from_secs(60), queue.next()).await.unwrap();
    assert_eq!(target, Some(RefreshTarget::All));
    let secs: Vec<u64> = ScriptedFeed::gaps(&subscribed).iter().map(Duration::as_secs).collect();
    assert_eq!(secs, vec![1, 2]);

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn supervised_backoff_doubles_up_to_cap() {
    let readiness = ready(&regtest_address(12).to_string());
    let (refresh, _queue) = refresh_channel();
    let listener = FeedListener::new(readiness.watch(), bitcoin::Network::Regtest, refresh);
    let feed = ScriptedFeed::new().failing_subscribes(100);
    let subscribed = feed.subscribed_at.clone();

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    let task = tokio::spawn(async move { listener.run_supervised(feed, signal).await });

    wait_for_subscribes(&subscribed, 9).await;
    let secs: Vec<u64> = ScriptedFeed::gaps(&subscribed).iter().take(8).map(Duration::as_secs).collect();
    assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    assert_eq!(MAX_RECONNECT_BACKOFF, Duration::from_secs(30));

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn supervised_backoff_resets_after_long_connection() {
    let readiness = ready(&regtest_address(13).to_string());
    let (refresh, _queue) = refresh_channel();
    let listener = FeedListener::new(readiness.watch(), bitcoin::Network::Regtest, refresh);
    let feed = ScriptedFeed::new()
        .failing_subscribes(2)
        .then(Duration::from_secs(45), Err(FeedError::Transport("peer reset".into())));
    let subscribed = feed.subscribed_at.clone();

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    let task = tokio::spawn(async move { listener.run_supervised(feed, signal).await });

    wait_for_subscribes(&subscribed, 4).await;
    let secs: Vec<u64> = ScriptedFeed::gaps(&subscribed).iter().map(Duration::as_secs).collect();
    // 1s, 2s, then a 45s connection, then back to 1s
    assert_eq!(secs, vec![1, 2, 46]);

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn supervised_listener_stops_when_wallet_never_ready() {
    let readiness = Readiness::new();
    let (refresh, _queue) = refresh_channel();
    let listener = FeedListener::new(readiness.watch(), bitcoin::Network::Regtest, refresh);
    let feed = ScriptedFeed::new();
    let subscribed = feed.subscribed_at.clone();

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    let task = tokio::spawn(async move { listener.run_supervised(feed, signal).await });
    drop(readiness);

    tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    assert!(subscribed.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn supervised_listener_stops_on_shutdown_while_waiting() {
    let readiness = Readiness::new();
    let (refresh, _queue) = refresh_channel();
    let listener = FeedListener::new(readiness.watch(), bitcoin::Network::Regtest, refresh);

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    let task = tokio::spawn(async move { listener.run_supervised(ScriptedFeed::new(), signal).await });

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!task.is_finished());
    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
}
