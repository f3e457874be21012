use clap::Parser;
use clap_derive::Parser;
use tokio::net::UdpSocket;
use tracing::{error, info, Level};
use anyhow::Context;
use udpxfer::config::TransferConfig;
use udpxfer::file_transfer::receive_file;

/// Waits for a single `udpxfer-send` and writes what it sends to a file
#[derive(Parser)]
struct Args {
    udp_port: u16,
    filename: String,
    /// bytes per second, 0 for unlimited
    #[clap(default_value_t = 0)]
    write_rate: u64,

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
    let socket = UdpSocket::bind(("0.0.0.0", args.udp_port)).await
        .with_context(|| format!("binding UDP port {}", args.udp_port))?;

    let stats = receive_file(&socket, &args.filename, args.write_rate, &TransferConfig::default()).await?;
    info!("received {} bytes in {:?} ({:.0} bytes/s, {} duplicates discarded)",
        stats.bytes_written, stats.elapsed, stats.throughput_bytes_per_sec(), stats.duplicates_discarded);
    Ok(())
}
