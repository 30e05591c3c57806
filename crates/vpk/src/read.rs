//! Reading the directory index of a VPK archive.

use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use binrw::BinRead;
use tracing::debug;

use crate::error::{Error, Result};
use crate::handler::ProgressHandler;
use crate::io::FileReader;
use crate::types::{
    Dir, FileEntry, Node, Nodes, VpkDirEntry, VpkHeader, ENTRY_TERMINATOR, NO_ARCHIVE, VPK_MAGIC,
};

/// A parsed VPK archive: the directory tree plus everything needed to
/// locate the numbered data archives next to the directory file.
///
/// The tree is immutable after parsing except for [`Package::filter`],
/// which removes whole subtrees.
#[derive(Debug)]
pub struct Package {
    name: String,
    srcdir: PathBuf,
    nodes: Nodes,
    index_end: u64,
}

impl Package {
    /// Open and parse a directory file.
    ///
    /// The filename must end in `_dir.vpk` (matched case-insensitively);
    /// a violation is offered to `handler` as an archive error, and when
    /// the handler elects to continue the package name falls back to the
    /// whole filename.
    pub fn from_path(path: impl AsRef<Path>, handler: &mut dyn ProgressHandler) -> Result<Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let name = match strip_dir_suffix(&filename) {
            Some(stem) => stem.to_string(),
            None => {
                let error = Error::FileFormat(format!(
                    "file does not end in \"_dir.vpk\": \"{}\"",
                    path.display()
                ));
                if handler.archive_error(&error, &filename) {
                    return Err(error);
                }
                filename.clone()
            }
        };

        let srcdir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        Self::from_reader(srcdir, name, File::open(path)?)
    }

    /// Parse a directory index from an arbitrary byte source positioned
    /// at its start.
    pub fn from_reader<R: Read + Seek>(
        srcdir: impl Into<PathBuf>,
        name: impl Into<String>,
        reader: R,
    ) -> Result<Self> {
        let mut reader = FileReader::new(reader);
        let mut package = Package {
            name: name.into(),
            srcdir: srcdir.into(),
            nodes: Nodes::new(),
            index_end: 0,
        };
        package.read_index(&mut reader)?;
        package.index_end = reader.tell()?;
        reader.close();
        Ok(package)
    }

    fn read_index<R: Read + Seek>(&mut self, reader: &mut FileReader<R>) -> Result<()> {
        // Versioned directory files lead with a magic, legacy ones start
        // directly with the first extension string. Trust the first four
        // bytes; a magic appearing mid-stream is not re-checked.
        let magic = reader.read_u32()?;
        reader.seek(SeekFrom::Current(-4))?;
        if magic == VPK_MAGIC {
            let header = VpkHeader::read(reader.stream()?).map_err(Error::from_binrw)?;
            if header.version != 1 {
                return Err(Error::FileFormat(format!(
                    "unexpected vpk version {}",
                    header.version
                )));
            }
            debug!(
                version = header.version,
                index_size = header.index_size,
                "read directory header"
            );
        }

        loop {
            let filetype = reader.read_asciiz()?;
            if filetype.is_empty() {
                break;
            }
            loop {
                let subpath = reader.read_asciiz()?;
                if subpath.is_empty() {
                    break;
                }
                self.read_dir(reader, &subpath, &filetype)?;
            }
        }
        Ok(())
    }

    /// Read one run of file records into the directory named by `subpath`.
    fn read_dir<R: Read + Seek>(
        &mut self,
        reader: &mut FileReader<R>,
        subpath: &str,
        filetype: &str,
    ) -> Result<()> {
        // A subpath of a single space puts entries directly under the root.
        let nodes = if subpath == " " {
            &mut self.nodes
        } else {
            Self::mkpath(&mut self.nodes, subpath)?
        };

        loop {
            let basename = reader.read_asciiz()?;
            if basename.is_empty() {
                break;
            }
            if let Some(file) = Self::read_file(reader, format!("{basename}.{filetype}"))? {
                nodes.insert(file.name.clone(), Node::File(file));
            }
        }
        Ok(())
    }

    /// Read one file record and its preload bytes.
    ///
    /// Returns `None` for records that store nothing at all.
    fn read_file<R: Read + Seek>(
        reader: &mut FileReader<R>,
        name: String,
    ) -> Result<Option<FileEntry>> {
        let entry = VpkDirEntry::read(reader.stream()?).map_err(Error::from_binrw)?;
        if entry.terminator != ENTRY_TERMINATOR {
            return Err(Error::FileFormat("invalid terminator".to_string()));
        }

        let mut preload = vec![0u8; usize::from(entry.preload_len)];
        reader.read_exact(&mut preload)?;

        if entry.size == 0 && preload.is_empty() {
            debug!(name = %name, "skipping entry with no stored bytes");
            return Ok(None);
        }
        if entry.archive_index == NO_ARCHIVE && entry.size != 0 {
            return Err(Error::FileFormat(format!(
                "no data archive for non-preload entry \"{name}\""
            )));
        }

        // An archive index on a pure-preload entry names nothing.
        let archive_index = if entry.size == 0 {
            NO_ARCHIVE
        } else {
            entry.archive_index
        };

        Ok(Some(FileEntry {
            name,
            crc32: entry.crc32,
            preload,
            archive_index,
            offset: entry.offset,
            size: entry.size,
        }))
    }

    /// Descend `path`, creating missing directories along the way, and
    /// return the children map of the final component.
    fn mkpath<'a>(root: &'a mut Nodes, path: &str) -> Result<&'a mut Nodes> {
        if path.is_empty() {
            return Err(Error::EmptyPath);
        }

        let mut nodes = root;
        let mut prefix = String::new();
        for name in path.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(name);

            let entry = nodes
                .entry(name.to_string())
                .or_insert_with(|| Node::Dir(Dir::new(name)));
            match entry {
                Node::Dir(dir) => nodes = dir.nodes_mut(),
                Node::File(_) => return Err(Error::PathIsNotDirectory(prefix)),
            }
        }
        Ok(nodes)
    }

    /// Look up a node by its logical path.
    ///
    /// Returns `None` when any component is absent or when an intermediate
    /// component is a file instead of a directory.
    pub fn get(&self, path: &str) -> Option<&Node> {
        let mut nodes = &self.nodes;
        let mut found = None;
        let mut components = path.split('/').peekable();
        while let Some(name) = components.next() {
            let node = nodes.get(name)?;
            if components.peek().is_some() {
                nodes = node.as_dir()?.nodes();
            }
            found = Some(node);
        }
        found
    }

    /// Prune the tree down to the given paths.
    ///
    /// Returns the subset of `paths` that did not resolve to a node. A
    /// path naming a directory keeps that directory with all of its
    /// descendants; everything else outside the whitelist is removed,
    /// including directories left empty by the pruning.
    pub fn filter(&mut self, paths: &[String]) -> BTreeSet<String> {
        let mut misses = BTreeSet::new();
        let mut keep = HashSet::new();
        for path in paths {
            if self.get(path).is_some() {
                keep.insert(path.clone());
            } else {
                misses.insert(path.clone());
            }
        }

        filter_nodes(&mut self.nodes, &mut String::new(), &keep);

        misses
    }

    /// Number of file leaves in the tree.
    pub fn filecount(&self) -> usize {
        count_files(&self.nodes)
    }

    /// Archive basename with the `_dir.vpk` suffix stripped.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding the directory file and the numbered archives.
    pub fn srcdir(&self) -> &Path {
        &self.srcdir
    }

    /// Children of the package root.
    pub fn nodes(&self) -> &Nodes {
        &self.nodes
    }

    /// Byte position where the directory index ends; bytes beyond it are
    /// not part of the index.
    pub fn index_end(&self) -> u64 {
        self.index_end
    }

    /// Path of the numbered data archive `index` next to the directory
    /// file.
    pub fn archive_path(&self, index: u16) -> PathBuf {
        self.srcdir.join(format!("{}_{:03}.vpk", self.name, index))
    }

    /// Take ownership of the tree, consuming the package.
    pub fn into_nodes(self) -> Nodes {
        self.nodes
    }
}

fn strip_dir_suffix(filename: &str) -> Option<&str> {
    let split = filename.len().checked_sub("_dir.vpk".len())?;
    if !filename.is_char_boundary(split) {
        return None;
    }
    filename[split..]
        .eq_ignore_ascii_case("_dir.vpk")
        .then(|| &filename[..split])
}

fn count_files(nodes: &Nodes) -> usize {
    nodes
        .values()
        .map(|node| match node {
            Node::Dir(dir) => count_files(dir.nodes()),
            Node::File(_) => 1,
        })
        .sum()
}

fn filter_nodes(nodes: &mut Nodes, prefix: &mut String, keep: &HashSet<String>) {
    nodes.retain(|name, node| {
        let len = prefix.len();
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(name);

        let kept = keep.contains(prefix.as_str());
        let retain = match node {
            Node::File(_) => kept,
            Node::Dir(dir) => {
                kept || {
                    filter_nodes(dir.nodes_mut(), prefix, keep);
                    !dir.nodes().is_empty()
                }
            }
        };

        prefix.truncate(len);
        retain
    });
}

#[cfg(test)]
pub(crate) mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::Package;
    use crate::error::Error;
    use crate::types::NO_ARCHIVE;

    /// Assembles directory index bytes section by section.
    pub(crate) struct IndexBuilder {
        buf: Vec<u8>,
    }

    impl IndexBuilder {
        pub fn versioned() -> Self {
            let mut buf = Vec::new();
            buf.extend_from_slice(&0x55AA1234u32.to_le_bytes());
            buf.extend_from_slice(&1u32.to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
            Self { buf }
        }

        pub fn legacy() -> Self {
            Self { buf: Vec::new() }
        }

        pub fn asciiz(mut self, s: &str) -> Self {
            self.buf.extend_from_slice(s.as_bytes());
            self.buf.push(0);
            self
        }

        pub fn record(
            self,
            crc32: u32,
            preload: &[u8],
            archive_index: u16,
            offset: u32,
            size: u32,
        ) -> Self {
            self.terminated_record(crc32, preload, archive_index, offset, size, 0xFFFF)
        }

        pub fn terminated_record(
            mut self,
            crc32: u32,
            preload: &[u8],
            archive_index: u16,
            offset: u32,
            size: u32,
            terminator: u16,
        ) -> Self {
            self.buf.extend_from_slice(&crc32.to_le_bytes());
            self.buf
                .extend_from_slice(&(preload.len() as u16).to_le_bytes());
            self.buf.extend_from_slice(&archive_index.to_le_bytes());
            self.buf.extend_from_slice(&offset.to_le_bytes());
            self.buf.extend_from_slice(&size.to_le_bytes());
            self.buf.extend_from_slice(&terminator.to_le_bytes());
            self.buf.extend_from_slice(preload);
            self
        }

        pub fn bytes(self) -> Vec<u8> {
            self.buf
        }
    }

    fn parse(bytes: Vec<u8>) -> crate::error::Result<Package> {
        Package::from_reader(".", "pkg", Cursor::new(bytes))
    }

    #[test]
    fn minimal_versioned_archive() {
        #[rustfmt::skip]
        let input = vec![
            0x34, 0x12, 0xAA, 0x55,             // magic
            0x01, 0x00, 0x00, 0x00,             // version
            0x1C, 0x00, 0x00, 0x00,             // index size (informational)
            b't', b'x', b't', 0x00,             // type
            b' ', 0x00,                         // subpath: root
            b'a', 0x00,                         // basename
            0x78, 0x56, 0x34, 0x12,             // crc32
            0x03, 0x00,                         // preload length
            0xFF, 0x7F,                         // archive index: no bulk
            0x00, 0x00, 0x00, 0x00,             // offset
            0x00, 0x00, 0x00, 0x00,             // size
            0xFF, 0xFF,                         // terminator
            b'a', b'b', b'c',                   // preload
            0x00,                               // end of basenames
            0x00,                               // end of subpaths
            0x00,                               // end of types
        ];
        let total = input.len() as u64;

        let package = parse(input).unwrap();
        assert_eq!(package.filecount(), 1);
        assert_eq!(package.index_end(), total);

        let file = package.get("a.txt").unwrap().as_file().unwrap();
        assert_eq!(file.name, "a.txt");
        assert_eq!(file.crc32, 0x12345678);
        assert_eq!(file.preload, b"abc");
        assert_eq!(file.archive_index, NO_ARCHIVE);
        assert_eq!(file.size, 0);
    }

    #[test]
    fn legacy_archive_has_no_header() {
        let bytes = IndexBuilder::legacy()
            .asciiz("txt")
            .asciiz(" ")
            .asciiz("a")
            .record(0x352441C2, b"abc", NO_ARCHIVE, 0, 0)
            .asciiz("")
            .asciiz("")
            .asciiz("")
            .bytes();

        let package = parse(bytes).unwrap();
        assert_eq!(package.filecount(), 1);
        assert!(package.get("a.txt").is_some());
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x55AA1234u32.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());

        match parse(bytes) {
            Err(Error::FileFormat(msg)) => assert_eq!(msg, "unexpected vpk version 2"),
            other => panic!("expected FileFormat error, got {other:?}"),
        }
    }

    #[test]
    fn invalid_terminator_aborts_parse() {
        let bytes = IndexBuilder::versioned()
            .asciiz("txt")
            .asciiz(" ")
            .asciiz("a")
            .terminated_record(0, b"abc", NO_ARCHIVE, 0, 0, 0xFFFE)
            .asciiz("")
            .asciiz("")
            .asciiz("")
            .bytes();

        match parse(bytes) {
            Err(Error::FileFormat(msg)) => assert_eq!(msg, "invalid terminator"),
            other => panic!("expected FileFormat error, got {other:?}"),
        }
    }

    #[test]
    fn subpaths_build_intermediate_directories() {
        let bytes = IndexBuilder::versioned()
            .asciiz("vmt")
            .asciiz("materials/concrete")
            .asciiz("floor")
            .record(0xDEADBEEF, b"", 0, 16, 32)
            .asciiz("")
            .asciiz("")
            .asciiz("")
            .bytes();

        let package = parse(bytes).unwrap();
        let file = package
            .get("materials/concrete/floor.vmt")
            .unwrap()
            .as_file()
            .unwrap();
        assert_eq!(file.archive_index, 0);
        assert_eq!(file.offset, 16);
        assert_eq!(file.size, 32);

        assert!(package.get("materials").unwrap().is_dir());
        assert!(package.get("materials/concrete").unwrap().is_dir());
        assert!(package.get("materials/concrete/floor").is_none());
    }

    #[test]
    fn file_component_in_the_middle_of_a_path_misses() {
        let bytes = IndexBuilder::versioned()
            .asciiz("txt")
            .asciiz(" ")
            .asciiz("a")
            .record(0, b"x", NO_ARCHIVE, 0, 0)
            .asciiz("")
            .asciiz("")
            .asciiz("")
            .bytes();

        let package = parse(bytes).unwrap();
        assert!(package.get("a.txt/deeper").is_none());
        assert!(package.get("").is_none());
    }

    #[test]
    fn path_conflicting_with_a_file_is_rejected() {
        // "a.txt" is created as a file first, then used as a directory.
        let bytes = IndexBuilder::versioned()
            .asciiz("txt")
            .asciiz(" ")
            .asciiz("a")
            .record(0, b"x", NO_ARCHIVE, 0, 0)
            .asciiz("")
            .asciiz("a.txt/sub")
            .asciiz("b")
            .record(0, b"y", NO_ARCHIVE, 0, 0)
            .asciiz("")
            .asciiz("")
            .asciiz("")
            .bytes();

        match parse(bytes) {
            Err(Error::PathIsNotDirectory(prefix)) => assert_eq!(prefix, "a.txt"),
            other => panic!("expected PathIsNotDirectory, got {other:?}"),
        }
    }

    #[test]
    fn empty_records_are_skipped() {
        let bytes = IndexBuilder::versioned()
            .asciiz("txt")
            .asciiz(" ")
            .asciiz("empty")
            .record(0, b"", NO_ARCHIVE, 0, 0)
            .asciiz("full")
            .record(0, b"x", NO_ARCHIVE, 0, 0)
            .asciiz("")
            .asciiz("")
            .asciiz("")
            .bytes();

        let package = parse(bytes).unwrap();
        assert_eq!(package.filecount(), 1);
        assert!(package.get("empty.txt").is_none());
        assert!(package.get("full.txt").is_some());
    }

    #[test]
    fn bulk_without_archive_is_rejected() {
        let bytes = IndexBuilder::versioned()
            .asciiz("txt")
            .asciiz(" ")
            .asciiz("a")
            .record(0, b"", NO_ARCHIVE, 0, 5)
            .asciiz("")
            .asciiz("")
            .asciiz("")
            .bytes();

        assert!(matches!(parse(bytes), Err(Error::FileFormat(_))));
    }

    #[test]
    fn archive_index_is_normalized_for_pure_preload() {
        let bytes = IndexBuilder::versioned()
            .asciiz("txt")
            .asciiz(" ")
            .asciiz("a")
            .record(0, b"x", 7, 0, 0)
            .asciiz("")
            .asciiz("")
            .asciiz("")
            .bytes();

        let package = parse(bytes).unwrap();
        let file = package.get("a.txt").unwrap().as_file().unwrap();
        assert_eq!(file.archive_index, NO_ARCHIVE);
    }

    fn three_file_tree() -> Package {
        let bytes = IndexBuilder::versioned()
            .asciiz("txt")
            .asciiz("a/b")
            .asciiz("c")
            .record(1, b"c", NO_ARCHIVE, 0, 0)
            .asciiz("d")
            .record(2, b"d", NO_ARCHIVE, 0, 0)
            .asciiz("")
            .asciiz("e")
            .asciiz("f")
            .record(3, b"f", NO_ARCHIVE, 0, 0)
            .asciiz("")
            .asciiz("")
            .asciiz("")
            .bytes();
        parse(bytes).unwrap()
    }

    #[test]
    fn filter_keeps_named_subtrees() {
        let mut package = three_file_tree();
        assert_eq!(package.filecount(), 3);

        let misses = package.filter(&["a/b".to_string()]);
        assert!(misses.is_empty());

        assert!(package.get("a/b/c.txt").is_some());
        assert!(package.get("a/b/d.txt").is_some());
        assert!(package.get("e/f.txt").is_none());
        assert!(package.get("e").is_none());
        assert_eq!(package.filecount(), 2);
    }

    #[test]
    fn filter_by_file_drops_siblings() {
        let mut package = three_file_tree();
        let misses = package.filter(&["a/b/c.txt".to_string(), "missing".to_string()]);

        assert_eq!(misses.into_iter().collect::<Vec<_>>(), vec!["missing"]);
        assert!(package.get("a/b/c.txt").is_some());
        assert!(package.get("a/b/d.txt").is_none());
        assert!(package.get("e").is_none());
    }

    #[test]
    fn filter_with_no_hits_empties_the_tree() {
        let mut package = three_file_tree();
        let misses = package.filter(&["nowhere".to_string()]);

        assert_eq!(misses.len(), 1);
        assert_eq!(package.filecount(), 0);
        assert!(package.nodes().is_empty());
    }

    #[test]
    fn get_returns_the_node_at_the_path() {
        let package = three_file_tree();
        for path in ["a", "a/b", "a/b/c.txt", "e/f.txt"] {
            let node = package.get(path).unwrap();
            assert_eq!(node.name(), path.rsplit('/').next().unwrap());
        }
    }

    #[test]
    fn multiple_types_share_subpaths() {
        let bytes = IndexBuilder::versioned()
            .asciiz("vmt")
            .asciiz("materials")
            .asciiz("floor")
            .record(1, b"m", NO_ARCHIVE, 0, 0)
            .asciiz("")
            .asciiz("")
            .asciiz("vtf")
            .asciiz("materials")
            .asciiz("floor")
            .record(2, b"t", NO_ARCHIVE, 0, 0)
            .asciiz("")
            .asciiz("")
            .asciiz("")
            .bytes();

        let package = parse(bytes).unwrap();
        assert_eq!(package.filecount(), 2);
        assert!(package.get("materials/floor.vmt").is_some());
        assert!(package.get("materials/floor.vtf").is_some());
    }
}
