//! Command-line block inspector.
//!
//! Scans every series of one storage block and prints, per series, how
//! many samples fall within an inclusive timestamp range, one JSON
//! object per line on stdout. Any failure aborts with a single
//! diagnostic line on stderr and a non-zero exit; output already
//! written stays.

use std::io::Write;
use std::path::PathBuf;

use blockscan::{scan_block, Block, JsonLineEmitter, ScanError, TimeRange};
use clap::Parser;

/// Counts, per series, the samples of a block within a time range.
#[derive(Parser, Debug)]
#[command(name = "blockscan", version, about)]
struct Cli {
    /// Path to the block directory.
    #[arg(long)]
    block: PathBuf,

    /// Minimum timestamp of samples to be counted; unix time in msec, inclusive.
    #[arg(long, default_value_t = 0)]
    min_timestamp: i64,

    /// Maximum timestamp of samples to be counted; unix time in msec, inclusive.
    #[arg(long, default_value_t = i64::MAX)]
    max_timestamp: i64,
}

fn run(cli: &Cli) -> Result<(), ScanError> {
    let block = Block::open(&cli.block)?;
    let range = TimeRange::new(cli.min_timestamp, cli.max_timestamp);

    let stdout = std::io::stdout().lock();
    let mut emitter = JsonLineEmitter::new(std::io::BufWriter::new(stdout));
    scan_block(&block, range, &mut emitter)?;
    emitter.into_inner().flush().map_err(ScanError::Output)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
