//! Progress and error reporting during a walk.

use crate::error::Error;

/// Which stage of a walk produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    /// Creating a destination directory failed
    Dir,
    /// Processing a single entry failed
    File,
    /// Opening or reading a numbered data archive failed
    Archive,
}

/// Callbacks invoked while a package is parsed, checked or extracted.
///
/// The boolean returned from the error callbacks selects the propagation
/// policy for that failure: `true` aborts the walk with the error,
/// `false` skips the failed item and continues with the next one.
pub trait ProgressHandler {
    /// A walk over `filecount` files is starting.
    fn begin(&mut self, filecount: usize) {
        let _ = filecount;
    }

    /// The walk completed without aborting.
    fn end(&mut self) {}

    /// The entry at `path` is about to be processed.
    fn extract(&mut self, path: &str) {
        let _ = path;
    }

    /// The entry at `path` was fully processed.
    fn success(&mut self, path: &str) {
        let _ = path;
    }

    fn dir_error(&mut self, error: &Error, path: &str) -> bool;

    fn file_error(&mut self, error: &Error, path: &str) -> bool;

    fn archive_error(&mut self, error: &Error, path: &str) -> bool;

    /// Dispatch to one of the error callbacks by `source`.
    fn error(&mut self, source: ErrorSource, error: &Error, path: &str) -> bool {
        match source {
            ErrorSource::Dir => self.dir_error(error, path),
            ErrorSource::File => self.file_error(error, path),
            ErrorSource::Archive => self.archive_error(error, path),
        }
    }
}

/// Handler that reports nothing and aborts on every error.
///
/// Walks driven with this handler fail fast, which is the behavior a
/// caller gets when it has no better idea what to do with a bad entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct StrictHandler;

impl ProgressHandler for StrictHandler {
    fn dir_error(&mut self, _error: &Error, _path: &str) -> bool {
        true
    }

    fn file_error(&mut self, _error: &Error, _path: &str) -> bool {
        true
    }

    fn archive_error(&mut self, _error: &Error, _path: &str) -> bool {
        true
    }
}
