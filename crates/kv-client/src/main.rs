//! kvcli — a thin demo binary over the cluster runtime.
//!
//! Exercises tend/topology discovery and the one-shot info protocol; it
//! does not encode or decode record operations, since that wire format is
//! out of scope for this crate (see the client's `DESIGN.md`).

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use kv_client::{AsyncPolicy, Client};
use kv_core::{ClientConfig, ClientPolicy, Host};

#[derive(Parser)]
#[command(name = "kvcli", about = "Cluster runtime demo client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to a seed list, print the live topology every `interval`
    /// seconds, and stop on Ctrl-C.
    Tend {
        /// `host:port` seed addresses; repeatable.
        #[arg(long = "seed", required = true)]
        seeds: Vec<String>,

        /// Optional `ClientConfig` TOML file overriding defaults.
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value = "2")]
        interval_secs: u64,
    },
    /// Issue a one-shot info request against a single host, bypassing the
    /// cluster entirely.
    Info {
        host: String,
        port: u16,
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,kv_cluster=debug,kv_exec=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Tend { seeds, config, interval_secs } => run_tend(seeds, config, interval_secs).await,
        Command::Info { host, port, names } => run_info(host, port, names),
    }
}

async fn run_tend(seeds: Vec<String>, config: Option<PathBuf>, interval_secs: u64) -> anyhow::Result<()> {
    let mut policy = match config {
        Some(path) => ClientPolicy::from_config(&ClientConfig::from_file(&path)?),
        None => ClientPolicy::default(),
    };
    policy.seed_hosts = seeds.iter().map(|s| parse_host(s)).collect::<anyhow::Result<Vec<_>>>()?;

    info!(seed_hosts = ?policy.seed_hosts, "connecting");
    let client = Client::connect(policy, AsyncPolicy::default())?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(interval_secs)) => {
                let nodes = client.cluster().active_nodes();
                info!(node_count = nodes.len(), nodes = ?nodes.iter().map(|n| n.name.clone()).collect::<Vec<_>>(), "topology snapshot");
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    client.close();
    info!("stopped");
    Ok(())
}

fn run_info(host: String, port: u16, names: Vec<String>) -> anyhow::Result<()> {
    let request = kv_wire::info::build_request(&names.iter().map(String::as_str).collect::<Vec<_>>());
    let header = kv_wire::framing::Header::new(
        kv_wire::framing::VERSION_INFO,
        kv_wire::framing::TYPE_INFO,
        request.len() as u64,
    );

    let mut stream = TcpStream::connect((host.as_str(), port))?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.write_all(&header.encode())?;
    stream.write_all(&request)?;

    let mut header_buf = [0u8; kv_wire::framing::HEADER_LEN];
    stream.read_exact(&mut header_buf)?;
    let response_header = kv_wire::framing::Header::decode(&header_buf)?;
    let mut body = vec![0u8; response_header.length as usize];
    stream.read_exact(&mut body)?;

    let values = kv_wire::info::parse_response(&body)?;
    for name in &names {
        match values.get(name) {
            Some(value) => println!("{name}\t{value}"),
            None => println!("{name}\t<missing>"),
        }
    }
    Ok(())
}

fn parse_host(spec: &str) -> anyhow::Result<Host> {
    match spec.rsplit_once(':') {
        Some((name, port)) => Ok(Host::new(name, port.parse()?)),
        None => Ok(Host::new(spec, 3000)),
    }
}
