use std::time::Duration;

use clap::Parser;
use rs_swarm::tracker::message::MAX_SCRAPE_HASHES;
use rs_swarm::{InfoHash, TrackerConfig, UdpTracker, logging};
use tracing::Level;

/// Query a UDP tracker for swarm statistics
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Tracker announce URL, e.g. udp://tracker.example.com:6969/announce
    #[arg(short, long)]
    tracker: String,

    /// Hex-encoded info hashes to scrape.
    #[arg(required = true)]
    info_hashes: Vec<String>,

    /// Seconds to wait for the first response; doubled on each retry.
    #[arg(long, default_value_t = 8)]
    timeout: u64,

    /// Attempts per batch before giving up.
    #[arg(long, default_value_t = 4)]
    attempts: u32,

    #[arg(long, default_value_t = Level::WARN)]
    log_level: Level,
}

fn parse_info_hash(hex_hash: &str) -> Result<InfoHash, Box<dyn std::error::Error>> {
    let bytes = hex::decode(hex_hash)?;
    InfoHash::try_from(bytes.as_slice())
        .map_err(|_| format!("info hash {hex_hash} is not 20 bytes").into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logging::init(args.log_level)?;

    let info_hashes = args
        .info_hashes
        .iter()
        .map(|h| parse_info_hash(h))
        .collect::<Result<Vec<_>, _>>()?;

    let config = TrackerConfig::default()
        .with_timeout(Duration::from_secs(args.timeout))
        .with_max_attempts(args.attempts);
    let tracker = UdpTracker::from_url(&args.tracker, config).await?;

    for batch in info_hashes.chunks(MAX_SCRAPE_HASHES) {
        for stats in tracker.scrape(batch).await? {
            println!(
                "{} seeders={} completed={} leechers={}",
                hex::encode(stats.info_hash),
                stats.seeders,
                stats.completed,
                stats.leechers
            );
        }
    }

    Ok(())
}
