//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent wrapper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(binrw::Error),

    /// Fewer bytes were available than the read required
    #[error("unexpected end of file")]
    ShortRead,

    /// The reader was used after [`crate::io::FileReader::close`]
    #[error("file reader is closed")]
    Closed,

    /// Magic, version, terminator or record shape violation
    #[error("{0}")]
    FileFormat(String),

    /// A path component names a file where a directory was required
    #[error("path is not a directory: {0}")]
    PathIsNotDirectory(String),

    /// A tree operation was handed an empty path
    #[error("empty path")]
    EmptyPath,

    /// The CRC-32 tally disagreed with the directory index
    #[error("checksum mismatch: \"{path}\" (expected {expected:08x}, got {got:08x})")]
    ChecksumMismatch {
        /// Logical path of the failed entry
        path: String,
        /// Checksum recorded in the directory index
        expected: u32,
        /// Checksum of the bytes actually read
        got: u32,
    },

    /// A numbered data archive is absent on disk
    #[error("archive does not exist: \"{0}\"")]
    ArchiveMissing(String),
}

impl Error {
    /// Map a failed read, turning an early EOF into [`Error::ShortRead`].
    pub(crate) fn from_read(error: std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::ShortRead
        } else {
            Error::IOError(error)
        }
    }

    /// Map a failed structure decode, turning an early EOF into
    /// [`Error::ShortRead`].
    pub(crate) fn from_binrw(error: binrw::Error) -> Self {
        match error {
            binrw::Error::Io(io) => Error::from_read(io),
            other => Error::BinRWError(other),
        }
    }
}

impl From<binrw::Error> for Error {
    fn from(error: binrw::Error) -> Self {
        Error::from_binrw(error)
    }
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
