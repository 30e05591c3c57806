//! Coverage analysis of archive data.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use miette::{Context, IntoDiagnostic, Result};
use vpk::types::{Node, Nodes};
use vpk::{Coverage, Package};

use crate::magic;

/// Which on-disk file a coverage set describes. The directory index file
/// sorts before the numbered data archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Target {
    Index,
    Archive(u16),
}

fn add_slices(nodes: &Nodes, covs: &mut BTreeMap<Target, Coverage>) {
    for node in nodes.values() {
        match node {
            Node::Dir(dir) => add_slices(dir.nodes(), covs),
            Node::File(file) if file.size > 0 => covs
                .entry(Target::Archive(file.archive_index))
                .or_default()
                .add(u64::from(file.offset), u64::from(file.size)),
            Node::File(_) => {}
        }
    }
}

/// Collect `<name>_<DDD+>.vpk` archives next to the directory file so
/// that fully unreferenced archives are reported too.
fn scan_archives(package: &Package, covs: &mut BTreeMap<Target, Coverage>) -> Result<()> {
    let prefix = format!("{}_", package.name().to_ascii_lowercase());
    let entries = fs::read_dir(package.srcdir())
        .into_diagnostic()
        .context(format!("scanning {}", package.srcdir().display()))?;

    for entry in entries {
        let entry = entry.into_diagnostic()?;
        let name = entry.file_name().to_string_lossy().to_ascii_lowercase();
        let Some(digits) = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".vpk"))
        else {
            continue;
        };
        if digits.len() >= 3 && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(index) = digits.parse::<u16>() {
                covs.entry(Target::Archive(index)).or_default();
            }
        }
    }
    Ok(())
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

/// Report referenced and unreferenced byte ranges of every archive file,
/// optionally dumping the unreferenced ranges below `destdir`.
pub fn coverage(
    index_path: &Path,
    index_end: u64,
    package: &Package,
    dump: bool,
    destdir: &Path,
    human_readable: bool,
) -> Result<()> {
    let mut covs: BTreeMap<Target, Coverage> = BTreeMap::new();

    // The directory file is covered by its own index.
    covs.entry(Target::Index).or_default().add(0, index_end);

    scan_archives(package, &mut covs)?;
    add_slices(package.nodes(), &mut covs);

    if dump {
        fs::create_dir_all(destdir)
            .into_diagnostic()
            .context(format!("creating {}", destdir.display()))?;
    }

    let size = |n: u64| {
        if human_readable {
            Coverage::human_readable_size(n)
        } else {
            n.to_string()
        }
    };

    let mut total = 0u64;
    let mut uncovered = 0u64;
    for (target, covered) in &covs {
        let path: PathBuf = match target {
            Target::Index => index_path.to_path_buf(),
            Target::Archive(index) => package.archive_path(*index),
        };
        let file_size = fs::metadata(&path)
            .into_diagnostic()
            .context(format!("sizing {}", path.display()))?
            .len();
        total += file_size;

        let missing = covered.invert(file_size);
        let missing_size = missing.coverage();
        if missing_size == 0 {
            continue;
        }
        uncovered += missing_size;

        let filename = path.file_name().unwrap_or_default().to_string_lossy();
        println!(
            "File: {}\nSize: {}\nCovered: {} ({:.0}%)\nMissing: {}\nMissing Areas:\n\t{}\n",
            filename,
            size(file_size),
            size(covered.coverage()),
            percent(covered.coverage(), file_size),
            size(missing_size),
            missing.format(human_readable),
        );

        if dump {
            dump_slices(&path, &missing, destdir, human_readable)?;
        }
    }

    let covered = total - uncovered;
    println!(
        "Total Size: {}\nTotal Covered: {} ({:.0}%)\nTotal Missing: {}",
        size(total),
        size(covered),
        percent(covered, total),
        size(uncovered),
    );
    Ok(())
}

/// Write each missing slice of `archive` to its own file, named after the
/// slice location and an extension guessed from its leading bytes.
fn dump_slices(
    archive: &Path,
    missing: &Coverage,
    destdir: &Path,
    human_readable: bool,
) -> Result<()> {
    let mut source = File::open(archive)
        .into_diagnostic()
        .context(format!("opening {}", archive.display()))?;
    let prefix = destdir.join(archive.file_name().unwrap_or_default());

    let size = |n: u64| {
        if human_readable {
            Coverage::human_readable_size(n)
        } else {
            n.to_string()
        }
    };

    let mut head = [0u8; magic::MAX_SIGNATURE];
    for &(offset, length) in missing.slices() {
        source
            .seek(SeekFrom::Start(offset))
            .into_diagnostic()
            .context(format!("seeking {}", archive.display()))?;

        let head_len = length.min(magic::MAX_SIGNATURE as u64) as usize;
        source
            .read_exact(&mut head[..head_len])
            .into_diagnostic()
            .context(format!("reading {}", archive.display()))?;

        let extension = magic::extension_of(&head[..head_len]);
        let filename = format!("{}_{}_{}.{}", prefix.display(), offset, length, extension);
        println!("Dumping {} to \"{}\"", size(length), filename);

        let mut out = File::create(&filename)
            .into_diagnostic()
            .context(format!("creating {filename}"))?;
        out.write_all(&head[..head_len]).into_diagnostic()?;
        if (head_len as u64) < length {
            io::copy(&mut Read::by_ref(&mut source).take(length - head_len as u64), &mut out)
                .into_diagnostic()
                .context(format!("dumping {filename}"))?;
        }
    }
    println!();
    Ok(())
}
