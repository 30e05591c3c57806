use std::path::PathBuf;

use clap::Parser;
use fuser::MountOption;
use miette::{IntoDiagnostic, Result};
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;
use vpk::error::Error;
use vpk::handler::ProgressHandler;
use vpk::Package;

mod fs;

/// Mount a VPK archive as a read-only filesystem.
#[derive(Parser)]
#[command(name = "vpkfs", version, about, long_about = None)]
struct Cli {
    /// An archive file named "*_dir.vpk"
    #[arg(value_name = "ARCHIVE")]
    archive: PathBuf,

    /// Where to mount the archive
    #[arg(value_name = "MOUNTPOINT")]
    mountpoint: PathBuf,

    /// Comma separated mount options passed to FUSE
    #[arg(short = 'o', value_name = "OPTIONS", value_delimiter = ',')]
    options: Vec<String>,
}

/// Logs archive problems and keeps going; a mount should come up even
/// when the archive name is unconventional.
#[derive(Default)]
struct MountHandler;

impl ProgressHandler for MountHandler {
    fn dir_error(&mut self, error: &Error, path: &str) -> bool {
        warn!(path, %error, "directory error");
        false
    }

    fn file_error(&mut self, error: &Error, path: &str) -> bool {
        warn!(path, %error, "file error");
        false
    }

    fn archive_error(&mut self, error: &Error, path: &str) -> bool {
        warn!(path, %error, "archive error");
        false
    }
}

fn main() -> Result<()> {
    better_panic::install();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cli = Cli::parse();

    let mut handler = MountHandler;
    let package = Package::from_path(&cli.archive, &mut handler)?;
    let filesystem = fs::VpkFs::new(package);

    let mut options = vec![MountOption::RO, MountOption::FSName("vpkfs".to_string())];
    for option in &cli.options {
        options.push(match option.as_str() {
            "allow_other" => MountOption::AllowOther,
            "allow_root" => MountOption::AllowRoot,
            "auto_unmount" => MountOption::AutoUnmount,
            "default_permissions" => MountOption::DefaultPermissions,
            other => MountOption::CUSTOM(other.to_string()),
        });
    }

    fuser::mount2(filesystem, &cli.mountpoint, &options).into_diagnostic()?;
    Ok(())
}
