//! pvedns binary entry point.

use clap::Parser;
use pvedns::chain::Handler;
use pvedns::{
    telemetry, BlockList, Config, DnsServer, InventoryClient, PveResolver, Refresher, VmCache,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// DNS middleware chain with a persistent blocklist and a Proxmox VE guest resolver.
#[derive(Parser, Debug)]
#[command(name = "pvedns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "pvedns.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("PVEDNS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        listen_addr = %config.server.listen_addr,
        endpoint = %config.resolver.endpoint,
        network = %config.resolver.network,
        "Starting pvedns"
    );

    let blocklist = Arc::new(BlockList::new(&config.blocklist));
    match blocklist.load_persisted() {
        Ok(count) => info!(blocked = count, "loaded persisted block list"),
        Err(err) => info!(%err, "no persisted block list loaded"),
    }

    // Authenticate against the inventory before anything else; a bad token or
    // unreachable endpoint is fatal at startup.
    let client = InventoryClient::builder(
        &config.resolver.endpoint,
        &config.resolver.token_id,
        &config.resolver.secret,
    )
    .insecure_tls(config.resolver.insecure_tls)
    .build()?;
    let version = client.version().await.map_err(|err| {
        error!(%err, "inventory authentication failure");
        err
    })?;
    info!(version = %version.version, "authenticated against inventory");

    // Setup graceful shutdown
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    // Start the background refresher
    let cache = VmCache::new();
    let refresher = Refresher::new(
        client,
        cache.clone(),
        config.resolver.network,
        Duration::from_secs(config.resolver.poll_interval_secs),
        config.resolver.fanout_limit,
    );
    let refresher_handle = refresher.spawn(shutdown.clone());

    // Periodically emit table size metrics
    let metrics_cache = cache.clone();
    let metrics_blocklist = blocklist.clone();
    let metrics_token = shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            tokio::select! {
                _ = interval.tick() => metrics_cache.emit_metrics(metrics_blocklist.len()),
                _ = metrics_token.cancelled() => return,
            }
        }
    });

    // Run the DNS front end
    let handlers: Vec<Arc<dyn Handler>> = vec![blocklist, Arc::new(PveResolver::new(cache))];
    let server = DnsServer::bind(config.server.listen_addr, handlers).await?;
    let result = server.run(shutdown.clone()).await;

    shutdown.cancel();
    let _ = refresher_handle.await;

    if let Err(e) = result {
        error!("DNS server error: {}", e);
        return Err(e.into());
    }

    info!("pvedns shutdown complete");
    Ok(())
}
