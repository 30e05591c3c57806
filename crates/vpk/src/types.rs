//! Base types for the structure of a VPK directory file.

use binrw::BinRead;
use indexmap::IndexMap;

/// Magic leading a versioned directory file. Legacy directory files have
/// no header at all and start directly with the first extension string.
pub const VPK_MAGIC: u32 = 0x55AA1234;

/// Archive index marking an entry with no bulk part (pure preload).
pub const NO_ARCHIVE: u16 = 0x7FFF;

/// Value closing every file record.
pub const ENTRY_TERMINATOR: u16 = 0xFFFF;

/// VPK directory file header
///
/// Present only in versioned directory files; all fields are stored in
/// little endian format.
#[derive(BinRead, Debug, Copy, Clone, PartialEq)]
#[br(little, magic = 0x55AA1234u32)]
pub struct VpkHeader {
    /// Format version; only version 1 is supported
    pub version: u32,

    /// Size of the directory index in bytes. Informational; it is not
    /// required to match the actual index size.
    pub index_size: u32,
}

/// On-disk shape of one file record, minus the trailing preload bytes
#[derive(BinRead, Debug, Copy, Clone, PartialEq)]
#[br(little)]
pub struct VpkDirEntry {
    /// CRC-32 checksum of the whole logical file (preload then bulk)
    pub crc32: u32,

    /// Number of preload bytes following the record
    pub preload_len: u16,

    /// Index of the data archive holding the bulk bytes, or [`NO_ARCHIVE`]
    pub archive_index: u16,

    /// Byte offset of the bulk within the data archive
    pub offset: u32,

    /// Byte length of the bulk within the data archive
    pub size: u32,

    /// Record terminator, always [`ENTRY_TERMINATOR`]
    pub terminator: u16,
}

/// Mapping from child name to owned child node.
///
/// Iteration order is insertion order and stable for an unchanged tree.
pub type Nodes = IndexMap<String, Node>;

/// A node of the in-memory directory tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Dir(Dir),
    File(FileEntry),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Dir(dir) => &dir.name,
            Node::File(file) => &file.name,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Dir(_))
    }

    pub fn as_dir(&self) -> Option<&Dir> {
        match self {
            Node::Dir(dir) => Some(dir),
            Node::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileEntry> {
        match self {
            Node::Dir(_) => None,
            Node::File(file) => Some(file),
        }
    }
}

/// A directory node owning its children
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dir {
    name: String,
    nodes: Nodes,
}

impl Dir {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Nodes::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &Nodes {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut Nodes {
        &mut self.nodes
    }

    /// Take ownership of the children, consuming the directory.
    pub fn into_nodes(self) -> Nodes {
        self.nodes
    }
}

/// A file leaf and its on-disk locator
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    /// Leaf name including the type extension, e.g. `floor.vmt`
    pub name: String,

    /// Expected CRC-32 of preload followed by bulk
    pub crc32: u32,

    /// Inline bytes stored in the directory file's preload area
    pub preload: Vec<u8>,

    /// Data archive index, or [`NO_ARCHIVE`] when the file is pure preload
    pub archive_index: u16,

    /// Bulk byte offset into the data archive
    pub offset: u32,

    /// Bulk byte length in the data archive
    pub size: u32,
}

impl FileEntry {
    /// Size of the whole logical file, preload and bulk together.
    pub fn logical_size(&self) -> u64 {
        self.preload.len() as u64 + u64::from(self.size)
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use binrw::BinRead;
    use pretty_assertions::assert_eq;

    use super::{VpkDirEntry, VpkHeader, ENTRY_TERMINATOR, NO_ARCHIVE};
    use crate::error::Result;

    #[test]
    fn read_header() -> Result<()> {
        #[rustfmt::skip]
        let mut input = Cursor::new(vec![
            0x34, 0x12, 0xAA, 0x55,
            0x01, 0x00, 0x00, 0x00,
            0x1C, 0x00, 0x00, 0x00,
        ]);

        let expected = VpkHeader {
            version: 1,
            index_size: 0x1C,
        };

        assert_eq!(VpkHeader::read(&mut input)?, expected);

        Ok(())
    }

    #[test]
    fn read_header_rejects_wrong_magic() {
        #[rustfmt::skip]
        let mut input = Cursor::new(vec![
            0x35, 0x12, 0xAA, 0x55,
            0x01, 0x00, 0x00, 0x00,
            0x1C, 0x00, 0x00, 0x00,
        ]);

        assert!(VpkHeader::read(&mut input).is_err());
    }

    #[test]
    fn read_dir_entry() -> Result<()> {
        #[rustfmt::skip]
        let mut input = Cursor::new(vec![
            0x78, 0x56, 0x34, 0x12,
            0x03, 0x00,
            0xFF, 0x7F,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0xFF, 0xFF,
        ]);

        let expected = VpkDirEntry {
            crc32: 0x12345678,
            preload_len: 3,
            archive_index: NO_ARCHIVE,
            offset: 0,
            size: 0,
            terminator: ENTRY_TERMINATOR,
        };

        assert_eq!(VpkDirEntry::read(&mut input)?, expected);

        Ok(())
    }
}
