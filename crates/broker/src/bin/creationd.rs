//! Log creation service daemon

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use dataplane_broker::service::{DEFAULT_ROUTER_HOST, DEFAULT_ROUTER_PORT};
use dataplane_broker::{
    Address, BrokerConfig, BrokerResult, BrokerService, CreationBroker, DedupStore, NameDirectory,
    PoolConfig, SERVICE_NAME,
};

/// Log creation service: admits CREATE commands at most once per log
/// name and splices backend responses back to their creators.
#[derive(Debug, Parser)]
#[command(name = "creationd", version)]
struct Args {
    /// Host of the routing layer
    #[arg(short = 'i', long, default_value = DEFAULT_ROUTER_HOST)]
    host: String,

    /// Port of the routing layer
    #[arg(short, long, default_value_t = DEFAULT_ROUTER_PORT)]
    port: u16,

    /// Path for the dedup database
    #[arg(short, long)]
    dbname: PathBuf,

    /// Address(es) for this service, typically human readable names
    #[arg(short, long, required = true, num_args = 1..)]
    addr: Vec<String>,

    /// Log server(s) used for actual log creation, typically human
    /// readable names
    #[arg(short, long, required = true, num_args = 1..)]
    server: Vec<String>,

    /// Path for the human-name directory database; omit to skip
    /// directory registration
    #[arg(long)]
    namedb: Option<PathBuf>,

    /// Be quite verbose in execution
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> BrokerResult<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let router_addr = format!("{}:{}", args.host, args.port);
    let addrs: Vec<Address> = args
        .addr
        .iter()
        .map(|name| Address::from_human_name(name))
        .collect();
    let servers: Vec<Address> = args
        .server
        .iter()
        .map(|name| Address::from_human_name(name))
        .collect();

    info!("starting a log-creation service");
    info!(router = %router_addr, "connecting");
    info!(names = ?args.addr, "servicing");
    info!(servers = ?args.server, "using log servers");
    info!(namedb = ?args.namedb, "human name directory");

    let store = DedupStore::open(&args.dbname, &PoolConfig::default()).await?;
    let directory = match &args.namedb {
        Some(path) => Some(NameDirectory::open(path, &PoolConfig::directory()).await?),
        None => None,
    };

    let broker = Arc::new(CreationBroker::new(store, directory, servers));
    let config = BrokerConfig {
        router_addr,
        service_addr: Address::from_human_name(SERVICE_NAME),
        addrs,
        ..BrokerConfig::default()
    };

    let service = BrokerService::new(config, broker);
    service.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    service.shutdown().await;
    Ok(())
}
