//! Tipjar CLI
//!
//!   tipjar serve        → Bootstrap wallets, wait for readiness, stream balances
//!   tipjar bootstrap    → Bootstrap wallets once, print the watched address
//!
//! Configuration comes from the environment (and `.env`), flags override:
//!   ZEROMQ_PORT, WALLET_NAME, PORT, NETWORK, BITCOIN_RPC_URL, BITCOIN_RPC_USER,
//!   BITCOIN_RPC_PASS, BITCOIN_RPC_COOKIE, TIPJAR_UI_DIR, TIPJAR_TEST_PAYMENT_SECS,
//!   TIPJAR_FEED_IDLE_SECS, TIPJAR_LOG_FORMAT

use anyhow::Context;
use serde_json::{json, Value};
use std::env;
use std::io::IsTerminal;
use tipjar::balance::{refresh_channel, BalanceRefresher, RefreshWorker};
use tipjar::config::{load_dotenv, Config, Network};
use tipjar::logging::{init_logging, LogFormat};
use tipjar::server::{self, create_router, AppState, ConnectionRegistry, READINESS_POLL};
use tipjar::wallet::{fixtures, Bootstrap};
use tipjar::{install_signal_handlers, CoreRpc};
use tracing::{error, info};

fn main() {
    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);

    if opts.help {
        print_usage();
        return;
    }

    if opts.version {
        println!("tipjar {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = opts.config().and_then(|config| {
        init_logging(config.log_format);
        match opts.command.as_deref() {
            None | Some("serve") => cmd_serve(config),
            Some("bootstrap") => cmd_bootstrap(config),
            Some(cmd) => Err(anyhow::anyhow!("Unknown command: {}", cmd)),
        }
    });

    let pretty = std::io::stdout().is_terminal();
    let render = |v: &Value| if pretty { serde_json::to_string_pretty(v) } else { serde_json::to_string(v) };
    match result {
        Ok(output) => {
            if let Ok(text) = render(&output) {
                println!("{}", text);
            }
        }
        Err(e) => {
            if let Ok(text) = render(&json!({"error": format!("{:#}", e)})) {
                eprintln!("{}", text);
            }
            std::process::exit(1);
        }
    }
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    port: Option<u16>,
    network: Option<String>,
    wallet: Option<String>,
    zmq_port: Option<u16>,
    rpc_url: Option<String>,
    log_format: Option<String>,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        let mut opts = ParsedArgs::default();
        let mut i = 0;
        while i < args.len() {
            let arg = &args[i];
            let value = args.get(i + 1).cloned();
            match arg.as_str() {
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                "--port" | "-p" => { opts.port = value.and_then(|v| v.parse().ok()); i += 1; }
                "--network" | "-n" => { opts.network = value; i += 1; }
                "--wallet" | "-w" => { opts.wallet = value; i += 1; }
                "--zmq-port" => { opts.zmq_port = value.and_then(|v| v.parse().ok()); i += 1; }
                "--rpc-url" => { opts.rpc_url = value; i += 1; }
                "--log-format" => { opts.log_format = value; i += 1; }
                _ if !arg.starts_with('-') && opts.command.is_none() => opts.command = Some(arg.clone()),
                _ => {} // Ignore unknown flags
            }
            i += 1;
        }
        opts
    }

    /// Environment (seeded from `.env`) with flag overrides applied on top.
    fn config(&self) -> anyhow::Result<Config> {
        load_dotenv(".env");
        if let Some(wallet) = &self.wallet {
            env::set_var("WALLET_NAME", wallet);
        }
        if let Some(port) = self.zmq_port {
            env::set_var("ZEROMQ_PORT", port.to_string());
        }
        let mut config = Config::from_env().context("configuration")?;
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(net) = &self.network {
            config.network = Network::from_str(net).ok_or_else(|| anyhow::anyhow!("Invalid network: {}", net))?;
        }
        if let Some(url) = &self.rpc_url {
            config.rpc_url = url.clone();
        }
        if let Some(format) = &self.log_format {
            config.log_format = LogFormat::from_str(format).ok_or_else(|| anyhow::anyhow!("Invalid log format: {}", format))?;
        }
        Ok(config)
    }
}

fn print_usage() {
    println!(
        r#"tipjar - live donation tracker

USAGE:
    tipjar [command] [options]

COMMANDS:
    serve                   Bootstrap wallets and stream balances (default)
    bootstrap               Bootstrap wallets once and print the watched address

OPTIONS:
    --port, -p <port>       HTTP/WebSocket port (env: PORT, default 8080)
    --network, -n <net>     bitcoin|testnet|signet|regtest (env: NETWORK, default regtest)
    --wallet, -w <name>     Donation wallet name (env: WALLET_NAME)
    --zmq-port <port>       bitcoind zmqpubrawtx port (env: ZEROMQ_PORT)
    --rpc-url <url>         bitcoind RPC URL (env: BITCOIN_RPC_URL)
    --log-format <fmt>      pretty|compact|json (env: TIPJAR_LOG_FORMAT)
    --version, -V           Print version

ROUTES:
    GET /                   UI, or WebSocket balance stream on upgrade
    GET /address            Watched address (text/plain)
    GET /health             {{status, wallet, connections}}
"#
    );
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to create runtime")
}

fn cmd_bootstrap(config: Config) -> anyhow::Result<Value> {
    let clients = CoreRpc::clients(&config)?;
    let bootstrap = Bootstrap::new(clients, &config.wallet_name, config.network);

    let address = runtime()?.block_on(bootstrap.initialize())?;
    Ok(json!({
        "address": address.as_str(),
        "wallet": config.wallet_name,
        "network": config.network.as_str(),
    }))
}

#[cfg(not(feature = "zmq"))]
fn cmd_serve(_config: Config) -> anyhow::Result<Value> {
    anyhow::bail!("built without the `zmq` feature; no feed transport available")
}

#[cfg(feature = "zmq")]
fn cmd_serve(config: Config) -> anyhow::Result<Value> {
    use tipjar::feed::{FeedListener, ZmqFeed};

    let clients = CoreRpc::clients(&config)?;

    runtime()?.block_on(async move {
        let shutdown = install_signal_handlers();

        let bootstrap = Bootstrap::new(clients.clone(), &config.wallet_name, config.network);
        let readiness = bootstrap.watch();

        let registry = ConnectionRegistry::new();
        let (refresh, queue) = refresh_channel();
        let refresher = BalanceRefresher::new(clients.donation_wallet.clone(), &config.wallet_name, registry.clone());
        let worker = RefreshWorker::new(refresher, queue);
        let mut worker_stop = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = worker.run() => {}
                _ = worker_stop.recv() => {}
            }
        });

        // Bootstrap once; the gate below is what waits.
        {
            let shutdown = shutdown.clone();
            let default_wallet = clients.default_wallet.clone();
            let network = config.network;
            let test_payments = config.test_payment_interval;
            tokio::spawn(async move {
                match bootstrap.initialize().await {
                    Ok(address) => {
                        if let Some(every) = test_payments {
                            fixtures::spawn_test_payments(network, default_wallet, address, every, shutdown.subscribe());
                        }
                    }
                    Err(e) => error!(error = %e, "wallet bootstrap failed; server will not start"),
                }
            });
        }

        let listener = FeedListener::new(readiness.clone(), config.network.to_bitcoin(), refresh.clone());
        let feed = ZmqFeed::new(config.zmq_endpoint()).with_idle_resubscribe(config.feed_idle);
        let feed_stop = shutdown.subscribe();
        tokio::spawn(async move { listener.run_supervised(feed, feed_stop).await });

        let mut gate_stop = shutdown.subscribe();
        tokio::select! {
            _ = server::wait_until_ready(&readiness, READINESS_POLL) => {}
            _ = gate_stop.recv() => {
                info!("Shutdown before wallet was ready");
                return Ok(json!({"status": "stopped"}));
            }
        }

        info!("Starting server");
        let addr = format!("0.0.0.0:{}", config.port);
        let tcp = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("Failed to bind {}", addr))?;
        let router = create_router(AppState::new(registry, refresh, readiness, config.ui_dir.clone()));
        server::serve(tcp, router, shutdown.subscribe()).await.context("Server error")?;

        info!("Server stopped");
        Ok(json!({"status": "stopped"}))
    })
}
