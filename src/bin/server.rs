use clap::Parser;
use parley_server::handler::ChatHandler;
use parley_server::store::FeoxBackend;
use parley_server::{Config, Server};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 9000)]
    port: u16,

    /// IPv4 bind address
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    /// Path to FeOx data file (memory-only if not specified)
    #[arg(short = 'd', long)]
    data_path: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Drop a client whose socket read or write blocks for this long
    #[arg(long)]
    exchange_timeout_ms: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::fmt()
        .with_env_filter(format!("parley_server={},feoxdb=info", log_level))
        .init();

    let config = if let Some(config_path) = args.config {
        Config::from_file(&config_path)?
    } else {
        Config {
            bind_addr: args.bind,
            port: args.port,
            data_path: args.data_path,
            exchange_timeout_ms: args.exchange_timeout_ms,
            log_level: log_level.to_string(),
            ..Default::default()
        }
    };
    config.validate()?;

    info!(
        "Starting Parley Server v{} on {}:{}",
        env!("CARGO_PKG_VERSION"),
        config.bind_addr,
        config.port
    );

    if config.exchange_timeout_ms.is_none() {
        warn!("No exchange timeout configured; a stalled client blocks every other client");
    }

    let store = FeoxBackend::open(&config)?;
    let mut server = Server::bind(&config, ChatHandler::new(store))?;

    // Signal handlers only request cancellation; the loop does the teardown
    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, shutting down gracefully...");
        shutdown.request();
    })?;

    let result = server.run();
    server.into_handler().into_store().close();

    if let Err(e) = result {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
