//! Archive content listing.

use std::io;

use miette::{IntoDiagnostic, Result};
use vpk::types::{Node, Nodes, NO_ARCHIVE};
use vpk::{Coverage, Package};

use crate::sort::{self, SortKey};
use crate::table::{Alignment, ConsoleTable};

/// One row of the listing.
pub struct ListEntry {
    pub path: String,
    pub archive_index: u16,
    pub crc32: u32,
    pub offset: u32,
    /// Logical size: preload plus bulk.
    pub size: u64,
}

fn collect(nodes: &Nodes, prefix: &mut String, entries: &mut Vec<ListEntry>, dirs: &mut usize) {
    for node in nodes.values() {
        let len = prefix.len();
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(node.name());

        match node {
            Node::Dir(dir) => {
                collect(dir.nodes(), prefix, entries, dirs);
                *dirs += 1;
            }
            Node::File(file) => entries.push(ListEntry {
                path: prefix.clone(),
                archive_index: file.archive_index,
                crc32: file.crc32,
                offset: file.offset,
                size: file.logical_size(),
            }),
        }

        prefix.truncate(len);
    }
}

/// Print the package contents as a table with a totals footer.
pub fn list(package: &Package, human_readable: bool, keys: &[SortKey]) -> Result<()> {
    let mut entries = Vec::new();
    let mut dirs = 0;
    collect(package.nodes(), &mut String::new(), &mut entries, &mut dirs);

    if !keys.is_empty() {
        entries.sort_by(|a, b| sort::compare(a, b, keys));
    }

    let size = |n: u64| {
        if human_readable {
            Coverage::human_readable_size(n)
        } else {
            n.to_string()
        }
    };

    let mut table = ConsoleTable::new(&[
        Alignment::Right,
        Alignment::Right,
        Alignment::Right,
        Alignment::Right,
        Alignment::Left,
    ]);
    table.row(["Archive", "CRC32", "Offset", "Size", "Filename"]);
    for entry in &entries {
        let archive = if entry.archive_index == NO_ARCHIVE {
            "-".to_string()
        } else {
            entry.archive_index.to_string()
        };
        table.row([
            archive,
            format!("{:08x}", entry.crc32),
            entry.offset.to_string(),
            size(entry.size),
            entry.path.clone(),
        ]);
    }
    table.print(&mut io::stdout()).into_diagnostic()?;

    let sum: u64 = entries.iter().map(|entry| entry.size).sum();
    println!(
        "{} {} ({} total size), {} {}",
        entries.len(),
        if entries.len() == 1 { "file" } else { "files" },
        size(sum),
        dirs,
        if dirs == 1 { "directory" } else { "directories" },
    );
    Ok(())
}
