//! This library handles reading, verifying and extracting **VPK** (Valve
//! Pak) version 1 archives.
//!
//! # VPK Archive Format Documentation
//!
//! A VPK archive is split across several files: a *directory file* named
//! `<name>_dir.vpk` holding all metadata plus inline "preload" bytes, and
//! any number of numbered *data archives* named `<name>_NNN.vpk` (the
//! index is zero-padded to at least three decimal digits) holding bulk
//! bytes only. A logical file may live entirely in the preload area,
//! entirely in one data archive, or split between the two.
//!
//! ## Directory File Structure
//!
//! A versioned directory file starts with a header; legacy files have no
//! header and start directly with the index. All multi-byte integers are
//! little endian.
//!
//! | Offset (bytes) | Field        | Description                                  |
//! |----------------|--------------|----------------------------------------------|
//! | 0x0000         | Magic number | 4 bytes: 0x55AA1234                          |
//! | 0x0004         | Version      | 4 bytes: Fixed value 1                       |
//! | 0x0008         | Index Size   | 4 bytes: Size of the index (informational)   |
//!
//! ## Index
//!
//! The index is three nested runs of NUL-terminated strings. The outer
//! run lists file types (extensions), the middle run lists directory
//! paths, the inner run lists basenames; an empty string ends each run. A
//! path of a single space places entries directly under the archive root.
//! Each basename is followed by a fixed file record:
//!
//! | Offset (bytes) | Field          | Description                                |
//! |----------------|----------------|--------------------------------------------|
//! | 0x0000         | CRC32          | 4 bytes: Checksum of preload + bulk bytes  |
//! | 0x0004         | Preload Length | 2 bytes: Inline bytes after the record     |
//! | 0x0006         | Archive Index  | 2 bytes: Data archive, 0x7FFF = none       |
//! | 0x0008         | Offset         | 4 bytes: Bulk offset in the data archive   |
//! | 0x000C         | Size           | 4 bytes: Bulk length in the data archive   |
//! | 0x0010         | Terminator     | 2 bytes: Fixed value 0xFFFF                |
//!
//! The preload bytes follow the record immediately. The logical path of
//! an entry is `<path>/<basename>.<type>`.
//!
//! ## Additional Information
//!
//! - **File Extension**: `.vpk`
//! - **Endianness**: Little-endian for all multi-byte integers
//! - **Checksums**: CRC-32 (ISO HDLC) over preload followed by bulk
//!

pub mod coverage;
pub mod error;
pub mod extract;
pub mod handler;
pub mod io;
pub mod read;
pub mod types;

pub use coverage::Coverage;
pub use error::{Error, Result};
pub use extract::{DataHandler, DataHandlerFactory, ExtractOptions};
pub use handler::{ErrorSource, ProgressHandler, StrictHandler};
pub use read::Package;
