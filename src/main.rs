use clap::Parser;
use std::path::PathBuf;

use datesort::{Config, Granularity};

/// Sort files into date-based subdirectories by modification time
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Sort entries into daily, monthly or yearly buckets
    #[arg(short, long, value_enum, default_value_t = Granularity::Daily)]
    granularity: Granularity,

    /// Don't sort directories
    #[arg(short, long)]
    ignore_dirs: bool,

    /// The directory to move/copy from
    #[arg(short, long, default_value = ".")]
    source: PathBuf,

    /// The directory to put the files into
    #[arg(short, long, default_value = ".")]
    destination: PathBuf,

    /// Copy entries instead of moving them
    #[arg(short, long)]
    copy: bool,

    /// Overwrite entries that already exist at the destination
    #[arg(short, long)]
    force: bool,

    /// Print planned relocations without performing them
    #[arg(long)]
    dry_run: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    datesort::run(&Config {
        granularity: args.granularity,
        ignore_dirs: args.ignore_dirs,
        source: args.source,
        destination: args.destination,
        copy: args.copy,
        force: args.force,
        dry_run: args.dry_run,
    })
}
