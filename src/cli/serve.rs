//! `snare serve` (spec §6): grounded on `cmd/serve.go::runServe`.

use anyhow::Context;
use clap::Args;
use snare::cert::{CertificateAuthority, HostCertCache};
use snare::server::ProxyServer;
use snare::state::ProxyState;
use snare::store::CaptureStore;
use snare::transport::ForwardTransport;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Args)]
pub struct ServeArgs {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 8888)]
    port: u16,

    /// Address to bind.
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    /// Disable TLS interception; CONNECT requests become plain tunnels.
    #[arg(long)]
    no_mitm: bool,

    /// Override the capture persistence directory.
    #[arg(long)]
    store_dir: Option<std::path::PathBuf>,
}

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let store_dir = args.store_dir.unwrap_or_else(snare::config::store_dir);
    std::fs::create_dir_all(&store_dir)
        .with_context(|| format!("creating store directory {}", store_dir.display()))?;
    let store = Arc::new(CaptureStore::new(1000, Some(store_dir)));
    let transport = Arc::new(ForwardTransport::new());

    let host_certs = if args.no_mitm {
        None
    } else {
        let ca_dir = snare::config::ca_dir();
        match CertificateAuthority::load_or_create(&ca_dir) {
            Ok(ca) => Some(Arc::new(HostCertCache::new(Arc::new(ca)))),
            Err(e) => {
                warn!(error = %e, "failed to load or create CA; MITM disabled for this run");
                None
            }
        }
    };
    let mitm_enabled = host_certs.is_some();

    let state = Arc::new(ProxyState { store, transport, host_certs });
    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse().context("invalid bind address")?;
    let server = ProxyServer::bind(addr).await?;

    info!(addr = %server.local_addr(), mitm = mitm_enabled, "snare listening");
    println!("snare listening on http://{}", server.local_addr());
    println!("  HTTP_PROXY=http://{}  HTTPS_PROXY=http://{}", server.local_addr(), server.local_addr());
    if !mitm_enabled {
        println!("  MITM interception is disabled; HTTPS traffic is tunneled opaquely");
    } else {
        println!("  run `snare ca install` to trust the root certificate for HTTPS interception");
    }

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });

    server.serve(state, rx).await;
    Ok(())
}
