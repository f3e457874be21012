use std::net::SocketAddr;
use anyhow::{anyhow, Context};
use clap::Parser;
use clap_derive::Parser;
use tokio::net::UdpSocket;
use tracing::{error, info, Level};
use udpxfer::config::TransferConfig;
use udpxfer::file_transfer::send_file;

/// Sends (a prefix of) a file to a running `udpxfer-recv`
#[derive(Parser)]
struct Args {
    receiver_host: String,
    receiver_port: u16,
    filename: String,
    /// capped at the file's length
    bytes_to_transfer: u64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
pub async fn main() {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::INFO,
        (false, false) => Level::WARN,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let receiver_addr = resolve(&args.receiver_host, args.receiver_port).await?;
    let socket = UdpSocket::bind("0.0.0.0:0").await
        .context("binding UDP socket")?;

    let stats = send_file(&socket, receiver_addr, &args.filename, args.bytes_to_transfer, &TransferConfig::default()).await?;
    info!("sent {} bytes to {} in {:?} ({:.0} bytes/s, {} retransmissions)",
        stats.bytes_sent, receiver_addr, stats.elapsed, stats.throughput_bytes_per_sec(), stats.retransmissions);
    Ok(())
}

/// The socket is bound to an IPv4 wildcard address, so IPv6 results are only a fallback
async fn resolve(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let candidates: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await
        .with_context(|| format!("resolving {}", host))?
        .collect();

    candidates.iter()
        .find(|addr| addr.is_ipv4())
        .or(candidates.first())
        .copied()
        .ok_or_else(|| anyhow!("{} does not resolve to any address", host))
}
