// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Hypermedia Identity Agent
//!
//! Entry point for the `hm-node` binary. Parses CLI arguments, initializes
//! logging and metrics, then runs one of:
//!
//! - `init`   : create the data directory and a fresh account
//! - `run`    : serve the HTTP API and accept device-link streams
//! - `link`   : join another agent's account from a session JSON
//! - `version`: print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context as _, Result};
use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::mpsc;

use libp2p::Multiaddr;

use hypermedia_protocol::clock::SystemClock;
use hypermedia_protocol::config::{ProtocolConfig, DEVICE_LINK_PROTOCOL_ID, PROTOCOL_VERSION};
use hypermedia_protocol::identity::account::create_account;
use hypermedia_protocol::link::{AddrInfo, DeviceLinkSession, LinkEvent, LinkInitiator, LinkJoiner};
use hypermedia_protocol::storage::{Blockstore, SledStore};
use hypermedia_protocol::transport::{TcpLinkListener, TcpTransport};
use hypermedia_protocol::Context;

use cli::{Commands, HmNodeCli};
use logging::LogFormat;
use metrics::{NodeMetrics, SharedMetrics};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = HmNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args).await,
        Commands::Link(args) => link_device(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Open the sled database under `data_dir` and build a context over it.
/// The key store and the blockstore share one database.
fn open_context(data_dir: &Path) -> Result<(Arc<Context>, Arc<Blockstore>)> {
    let db_path = data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;

    let db = sled::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    let blocks = Arc::new(Blockstore::from_db(&db).context("failed to open blockstore")?);
    let store = Arc::new(SledStore::from_db(db));
    tracing::info!(path = %db_path.display(), "database opened");

    let ctx = Arc::new(Context::local(
        ProtocolConfig::default(),
        Arc::new(SystemClock),
        store,
        blocks.clone(),
    ));
    Ok((ctx, blocks))
}

/// Starts the agent: API server, device-link listener and metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, LogFormat::from_str_lossy(&args.log_format));

    tracing::info!(
        api_port = args.api_port,
        p2p_port = args.p2p_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        "starting hm-node"
    );

    let (ctx, blocks) = open_context(&args.data_dir)?;
    let identity = ctx
        .require_identity()
        .context("no local account; run `hm-node init` first")?;
    tracing::info!(account = %identity.account_id(), "identity loaded");

    let node_metrics: SharedMetrics =
        Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    // --- Device-link listener ---
    let link_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.p2p_port));
    let link_listener = TcpLinkListener::bind(
        link_addr,
        DEVICE_LINK_PROTOCOL_ID,
        ctx.config().max_frame_length,
    )
    .await
    .with_context(|| format!("failed to bind device-link listener on {link_addr}"))?;
    let link_port = link_listener.local_addr()?.port();
    tracing::info!(%link_addr, "device-link listener ready");

    let initiator = Arc::new(LinkInitiator::new(ctx.clone()));
    let accept_loop = tokio::spawn(accept_links(
        link_listener,
        initiator.clone(),
        node_metrics.clone(),
        ctx.config().negotiation_timeout,
    ));

    // --- Application state ---
    let app_state = api::AppState {
        version: format!("{} (protocol {})", env!("CARGO_PKG_VERSION"), PROTOCOL_VERSION),
        ctx: ctx.clone(),
        blocks: blocks.clone(),
        initiator,
        addr_info: AddrInfo {
            peer_id: identity.account_id(),
            addrs: advertised_addrs(link_port, &args.external_addrs),
        },
        metrics: node_metrics.clone(),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("127.0.0.1:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {api_addr}"))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(node_metrics);
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {metrics_addr}"))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    accept_loop.abort();
    if let Err(e) = blocks.flush() {
        tracing::warn!(error = %e, "blockstore flush failed");
    }
    tracing::info!("hm-node stopped");
    Ok(())
}

/// Accept device-link streams until the task is aborted. Each stream is
/// negotiated and handled on its own task; the initiator itself allows one
/// redemption.
async fn accept_links(
    listener: TcpLinkListener,
    initiator: Arc<LinkInitiator>,
    metrics: SharedMetrics,
    negotiation_timeout: Duration,
) {
    loop {
        let (inbound, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept link stream");
                continue;
            }
        };
        metrics.link_attempts_total.inc();
        tracing::debug!(%peer, "device-link stream accepted");

        let initiator = initiator.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let mut stream = match inbound.negotiate(negotiation_timeout).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(%peer, error = %e, "rejected incoming link stream");
                    metrics.link_failures_total.inc();
                    return;
                }
            };
            match initiator.handle(&mut stream).await {
                Ok(_) => metrics.links_completed_total.inc(),
                Err(_) => metrics.link_failures_total.inc(),
            }
            metrics
                .link_duration_seconds
                .observe(started.elapsed().as_secs_f64());
        });
    }
}

/// Addresses a Joiner may dial: loopback first, then every configured
/// external address, then the host's non-loopback IPv4 interfaces.
fn advertised_addrs(link_port: u16, external: &[Multiaddr]) -> Vec<String> {
    let mut addrs = vec![format!("/ip4/127.0.0.1/tcp/{link_port}")];
    addrs.extend(external.iter().map(|addr| addr.to_string()));

    match get_if_addrs::get_if_addrs() {
        Ok(interfaces) => {
            for interface in interfaces {
                let addr = match interface.ip() {
                    IpAddr::V4(v4) if !v4.is_loopback() => format!("/ip4/{v4}/tcp/{link_port}"),
                    _ => continue,
                };
                if !addrs.contains(&addr) {
                    addrs.push(addr);
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to list network interfaces"),
    }
    addrs
}

/// Creates the data directory and a new account.
async fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("hm_node=info", LogFormat::Pretty);
    tracing::info!(data_dir = %args.data_dir.display(), "initializing agent");

    let (ctx, blocks) = open_context(&args.data_dir)?;
    let created = create_account(&ctx, &args.name, None)
        .await
        .context("failed to create account")?;
    blocks.flush().context("failed to flush blockstore")?;

    println!("Account created.");
    println!("  Data directory : {}", args.data_dir.display());
    println!("  Account        : {}", created.identity.account_id());
    println!("  Home document  : {}", created.reference.cid);

    Ok(())
}

/// Joins the account named in a device-link session.
async fn link_device(args: cli::LinkArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, LogFormat::Pretty);

    let session: DeviceLinkSession =
        serde_json::from_str(&args.session).context("invalid session JSON")?;
    let (ctx, blocks) = open_context(&args.data_dir)?;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                LinkEvent::Dialing { addr } => println!("dialing {addr}"),
                LinkEvent::DialOk { addr } => println!("connected to {addr}"),
                LinkEvent::DialFail { addr, error } => println!("failed {addr}: {error}"),
            }
        }
    });

    let transport = Arc::new(TcpTransport::new(ctx.config().max_frame_length));
    let joiner = LinkJoiner::new(ctx.clone(), transport).with_events(events_tx);
    let result = joiner.link(&session).await;
    drop(joiner);
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "link event printer failed");
    }

    let outcome = result.context("device link failed")?;
    blocks.flush().context("failed to flush blockstore")?;

    println!("Device linked.");
    println!("  This device    : {}", outcome.browser_account_id);
    println!("  Linked account : {}", outcome.app_account_id);
    println!("  Profile alias  : {}", outcome.profile_alias.cid);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("hm-node   {}", env!("CARGO_PKG_VERSION"));
    println!("protocol  {}", PROTOCOL_VERSION);
    println!("rustc     {}", rustc_version());
}

fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first. If a
/// handler cannot be installed, that branch never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn account_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let account_id = {
            let (ctx, blocks) = open_context(dir.path()).unwrap();
            let created = create_account(&ctx, "Alice", None).await.unwrap();
            blocks.flush().unwrap();
            created.identity.account_id()
        };

        let (ctx, blocks) = open_context(dir.path()).unwrap();
        let identity = ctx.require_identity().unwrap();
        assert_eq!(identity.account_id(), account_id);
        assert_eq!(blocks.len(), 3);
    }

    #[test]
    fn advertised_addrs_put_loopback_first() {
        let external: Multiaddr = "/ip4/203.0.113.7/tcp/56000".parse().unwrap();
        let addrs = advertised_addrs(56000, &[external.clone()]);
        assert_eq!(addrs[0], "/ip4/127.0.0.1/tcp/56000");
        assert_eq!(addrs[1], external.to_string());
        assert!(addrs.iter().skip(1).all(|addr| !addr.starts_with("/ip4/127.")));
        for addr in &addrs {
            assert!(addr.parse::<Multiaddr>().is_ok(), "{addr}");
        }
    }
}
