use std::path::PathBuf;

use clap::{ArgAction, Parser};
use miette::Result;
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;
use vpk::{ExtractOptions, Package};

mod console;
mod coverage;
mod list;
mod magic;
mod sort;
mod table;

/// List, check and extract VPK archives.
#[derive(Parser)]
#[command(name = "unvpk", version, about, long_about = None)]
#[command(disable_help_flag = true, disable_version_flag = true)]
struct Cli {
    /// An archive file named "*_dir.vpk"
    #[arg(value_name = "ARCHIVE")]
    archive: PathBuf,

    /// Only list/check/extract the given files
    #[arg(value_name = "FILE")]
    filter: Vec<String>,

    /// List archive contents
    #[arg(short, long)]
    list: bool,

    /// Sort the listing by a comma separated list of keys (a|archive,
    /// c|crc32, o|offset, s|size, n|name; prepend - for descending order)
    #[arg(short = 'S', long, value_name = "KEYS")]
    sort: Option<String>,

    /// Use human readable file sizes
    #[arg(short = 'h', long)]
    human_readable: bool,

    /// Check CRC32 sums
    #[arg(short, long)]
    check: bool,

    /// Extract and check CRC32 sums
    #[arg(short, long)]
    xcheck: bool,

    /// Extract files into another directory
    #[arg(short = 'C', long, value_name = "DIR", default_value = ".")]
    directory: PathBuf,

    /// Stop on error
    #[arg(short, long)]
    stop: bool,

    /// Coverage analysis of archive data (archive debugging)
    #[arg(long)]
    coverage: bool,

    /// Dump uncovered areas into files (implies --coverage, archive
    /// debugging)
    #[arg(long)]
    dump_uncovered: bool,

    /// Print help
    #[arg(short = 'H', long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Print version information
    #[arg(short = 'v', long, action = ArgAction::Version)]
    version: Option<bool>,
}

fn main() -> Result<()> {
    better_panic::install();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cli = Cli::parse();

    let sorting = match cli.sort.as_deref() {
        Some(spec) => sort::parse_sort_keys(spec)?,
        None => Vec::new(),
    };

    let mut handler = console::ConsoleHandler::new(cli.filter.clone(), cli.stop);
    let mut package = Package::from_path(&cli.archive, &mut handler)?;

    if !cli.filter.is_empty() {
        for miss in package.filter(&cli.filter) {
            warn!("not found in archive: {miss}");
        }
    }

    if cli.coverage || cli.dump_uncovered {
        coverage::coverage(
            &cli.archive,
            package.index_end(),
            &package,
            cli.dump_uncovered,
            &cli.directory,
            cli.human_readable,
        )?;
    } else if cli.list {
        list::list(&package, cli.human_readable, &sorting)?;
    } else if cli.xcheck {
        let opts = ExtractOptions::builder()
            .directory(cli.directory)
            .verify(true)
            .build();
        package.extract(&opts, &mut handler)?;
    } else if cli.check {
        package.check(&mut handler)?;
    } else {
        let opts = ExtractOptions::builder().directory(cli.directory).build();
        package.extract(&opts, &mut handler)?;
    }

    if !handler.all_ok() {
        std::process::exit(1);
    }
    Ok(())
}
