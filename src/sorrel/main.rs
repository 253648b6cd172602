use anyhow::{Context, bail};
use clap::Parser;
use std::path::PathBuf;
use ticketing::config::TrainConfig;
use ticketing::history::{filter_route, parse_history};
use ticketing::replay::replay;

#[derive(Parser, Debug)]
#[command(author, version, about = "Replays a recorded ticketing history", long_about = None)]
struct Args {
    /// History file written by larch
    history: PathBuf,
    /// Only replay the buys and refunds of this route, plus its last inquiry
    #[arg(short, long)]
    route: Option<u32>,
    #[arg(short, long, default_value = "TrainConfig")]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let train = TrainConfig::load_or_default(&args.config)
        .with_context(|| format!("reading train config {}", args.config.display()))?;

    let text = std::fs::read_to_string(&args.history)
        .with_context(|| format!("reading history {}", args.history.display()))?;
    let mut lines = parse_history(&text)?;
    if let Some(route) = args.route {
        lines = filter_route(&lines, route);
        println!("route {}: {} records kept", route, lines.len());
    }

    // replay is sequential, one worker slot is enough
    let stats = match replay(train.engine(1), &lines) {
        Ok(stats) => stats,
        Err(e) => bail!("replay of {} failed: {}", args.history.display(), e),
    };

    println!(
        "replayed {} records: {} buys, {} refunds, {} inquiries",
        lines.len(),
        stats.buys,
        stats.refunds,
        stats.inquiries
    );
    println!(
        "{} outcomes differ from the recording",
        stats.recorded_disagreements
    );
    Ok(())
}
