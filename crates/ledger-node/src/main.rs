use clap::Parser;
use ledger_core::Ledger;
use ledger_node::{
    api::{self, AppState},
    config::NodeConfig,
    p2p::{self, Broadcaster, Server},
    peers::PeerDirectory,
};
use ledger_storage::JsonFileStore;
use std::{path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
struct Args {
    /// Path to the node's JSON config file
    #[arg(long, default_value = "configs/config.json")]
    config: PathBuf,

    /// Peer-to-peer port, overriding the config file
    #[arg(long)]
    port: Option<u16>,

    /// Control API port, overriding the config file
    #[arg(long)]
    api_port: Option<u16>,

    /// Chain file, overriding the config file
    #[arg(long)]
    blockchain_file: Option<PathBuf>,

    /// Skip requesting peers' chains at start-up
    #[arg(long)]
    no_sync: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = NodeConfig::load(&args.config)?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(port) = args.api_port {
        config.api_port = port;
    }
    if let Some(path) = args.blockchain_file {
        config.blockchain_file = path;
    }
    if args.no_sync {
        config.sync_on_start = false;
    }

    let store = Arc::new(JsonFileStore::new(&config.blockchain_file));
    let ledger = Arc::new(Ledger::open(store, config.consensus())?);
    let broadcaster = Broadcaster::new(
        PeerDirectory::file(&config.peers_file),
        config.port,
        config.peer_timeout(),
    );

    let p2p_listener = TcpListener::bind(config.p2p_addr()).await?;
    let server = Server::new(Arc::clone(&ledger), broadcaster.clone())
        .with_limits(config.inbound_limits());
    tokio::spawn(async move {
        if let Err(e) = server.serve(p2p_listener).await {
            error!("p2p server failed: {e:#}");
        }
    });

    if config.sync_on_start {
        let ledger = Arc::clone(&ledger);
        let broadcaster = broadcaster.clone();
        tokio::spawn(async move {
            p2p::sync_from_peers(&ledger, &broadcaster).await;
        });
    }

    let app = api::router(AppState::new(
        ledger,
        broadcaster,
        config.parallel_mining,
    ))
    .layer(TraceLayer::new_for_http());

    let api_addr = config.api_addr();
    info!(node_id = %config.node_id, "ledger-node control API on http://{api_addr}");
    axum::serve(TcpListener::bind(&api_addr).await?, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
