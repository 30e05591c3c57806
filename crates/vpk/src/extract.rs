//! Streaming extraction and verification of package entries.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use bon::Builder;
use crc::{Crc, Digest, CRC_32_ISO_HDLC};
use tracing::instrument;

use crate::error::{Error, Result};
use crate::handler::{ErrorSource, ProgressHandler};
use crate::read::Package;
use crate::types::{FileEntry, Node, Nodes};

/// CRC algorithm used by the VPK directory index.
pub static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Bulk bytes are streamed through the data handler in chunks of this size.
const IO_CHUNK: usize = 8 * 1024;

/// Options for how files are extracted from a package
#[derive(Debug, Clone, Builder)]
pub struct ExtractOptions {
    /// Destination directory for extracted files
    pub directory: PathBuf,

    /// Verify CRC-32 sums while writing
    #[builder(default)]
    pub verify: bool,
}

/// Running CRC-32 tally plus the expected value to compare in `finish`.
pub struct CrcCheck {
    digest: Digest<'static, u32>,
    expected: u32,
    path: String,
}

impl CrcCheck {
    fn new(path: &str, expected: u32) -> Self {
        Self {
            digest: CRC32.digest(),
            expected,
            path: path.to_string(),
        }
    }

    fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    fn finish(self) -> Result<()> {
        let got = self.digest.finalize();
        if got != self.expected {
            return Err(Error::ChecksumMismatch {
                path: self.path,
                expected: self.expected,
                got,
            });
        }
        Ok(())
    }
}

/// Per-entry byte sink: write bytes to disk, or only tally their checksum.
pub enum DataHandler {
    Write {
        out: File,
        check: Option<CrcCheck>,
    },
    Check(CrcCheck),
}

impl DataHandler {
    /// Accept the next chunk of the entry's own bytes, in offset order.
    pub fn process(&mut self, data: &[u8]) -> Result<()> {
        match self {
            DataHandler::Write { out, check } => {
                out.write_all(data)?;
                if let Some(check) = check {
                    check.update(data);
                }
                Ok(())
            }
            DataHandler::Check(check) => {
                check.update(data);
                Ok(())
            }
        }
    }

    /// Tally preload bytes that belong to the logical file but are not
    /// part of the artifact written at the entry's own path. The checksum
    /// covers preload followed by bulk, so this must run before
    /// [`DataHandler::process`] sees any bulk bytes.
    pub fn preload(&mut self, data: &[u8]) {
        match self {
            DataHandler::Write {
                check: Some(check), ..
            } => check.update(data),
            DataHandler::Write { check: None, .. } => {}
            DataHandler::Check(check) => check.update(data),
        }
    }

    /// Signal end of stream and validate the checksum, if one is kept.
    pub fn finish(self) -> Result<()> {
        match self {
            DataHandler::Write { out, check } => {
                drop(out);
                match check {
                    Some(check) => check.finish(),
                    None => Ok(()),
                }
            }
            DataHandler::Check(check) => check.finish(),
        }
    }
}

/// Chooses which [`DataHandler`] variant a walk creates per entry.
pub enum DataHandlerFactory {
    /// Write extracted files below a destination directory
    Write { directory: PathBuf, verify: bool },
    /// Verify checksums without writing anything
    Check,
}

impl DataHandlerFactory {
    /// Create the parent directories `path` will be written into, if this
    /// factory writes at all. Tolerates directories that already exist.
    pub fn prepare(&self, path: &str) -> Result<()> {
        if let DataHandlerFactory::Write { directory, .. } = self {
            if let Some(parent) = directory.join(path).parent() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Create a fresh handler for the entry at `path`.
    pub fn create(&self, path: &str, crc32: u32) -> Result<DataHandler> {
        match self {
            DataHandlerFactory::Write { directory, verify } => Ok(DataHandler::Write {
                out: File::create(directory.join(path))?,
                check: verify.then(|| CrcCheck::new(path, crc32)),
            }),
            DataHandlerFactory::Check => Ok(DataHandler::Check(CrcCheck::new(path, crc32))),
        }
    }

    /// Create a handler that writes `path` without checksum validation,
    /// or `None` if this factory does not produce artifacts.
    fn create_raw(&self, path: &str) -> Result<Option<DataHandler>> {
        match self {
            DataHandlerFactory::Write { directory, .. } => Ok(Some(DataHandler::Write {
                out: File::create(directory.join(path))?,
                check: None,
            })),
            DataHandlerFactory::Check => Ok(None),
        }
    }
}

/// Open data archives for the duration of one walk.
///
/// `None` marks an archive already reported missing, so the error is
/// emitted exactly once and later entries in it are skipped silently.
type Archives = HashMap<u16, Option<File>>;

impl Package {
    /// Extract every file below `opts.directory`, creating directories as
    /// needed.
    ///
    /// Entry paths come straight from the archive; extracting an untrusted
    /// archive into a directory an attacker wants to escape from is unsafe.
    pub fn extract(&self, opts: &ExtractOptions, handler: &mut dyn ProgressHandler) -> Result<()> {
        let factory = DataHandlerFactory::Write {
            directory: opts.directory.clone(),
            verify: opts.verify,
        };
        self.process(&factory, handler)
    }

    /// Verify the CRC-32 of every file without writing anything.
    pub fn check(&self, handler: &mut dyn ProgressHandler) -> Result<()> {
        self.process(&DataHandlerFactory::Check, handler)
    }

    /// Walk the tree feeding every entry through handlers from `factory`.
    #[instrument(skip_all, err)]
    pub fn process(
        &self,
        factory: &DataHandlerFactory,
        handler: &mut dyn ProgressHandler,
    ) -> Result<()> {
        handler.begin(self.filecount());

        let mut archives = Archives::new();
        self.process_nodes(self.nodes(), &mut String::new(), &mut archives, factory, handler)?;

        handler.end();
        Ok(())
    }

    fn process_nodes(
        &self,
        nodes: &Nodes,
        prefix: &mut String,
        archives: &mut Archives,
        factory: &DataHandlerFactory,
        handler: &mut dyn ProgressHandler,
    ) -> Result<()> {
        for node in nodes.values() {
            let len = prefix.len();
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(node.name());

            let result = match node {
                Node::Dir(dir) => {
                    self.process_nodes(dir.nodes(), prefix, archives, factory, handler)
                }
                Node::File(file) => self.process_file(file, prefix, archives, factory, handler),
            };

            prefix.truncate(len);
            result?;
        }
        Ok(())
    }

    /// Process a single entry. `Err` aborts the whole walk; a failure the
    /// handler elected to skip returns `Ok` and the walk moves on.
    fn process_file(
        &self,
        file: &FileEntry,
        path: &str,
        archives: &mut Archives,
        factory: &DataHandlerFactory,
        handler: &mut dyn ProgressHandler,
    ) -> Result<()> {
        handler.extract(path);

        if let Err(error) = factory.prepare(path) {
            if handler.error(ErrorSource::Dir, &error, path) {
                return Err(error);
            }
            return Ok(());
        }

        let mut data_handler = match factory.create(path, file.crc32) {
            Ok(data_handler) => data_handler,
            Err(error) => {
                if handler.error(ErrorSource::File, &error, path) {
                    return Err(error);
                }
                return Ok(());
            }
        };

        if file.size == 0 {
            // The whole file lives in the preload area.
            let result = match data_handler.process(&file.preload) {
                Ok(()) => data_handler.finish(),
                Err(error) => Err(error),
            };
            if let Err(error) = result {
                if handler.error(ErrorSource::File, &error, path) {
                    return Err(error);
                }
                return Ok(());
            }
        } else {
            let archive_path = self.archive_path(file.archive_index);
            let slot = match archives.entry(file.archive_index) {
                Entry::Occupied(slot) => slot.into_mut(),
                Entry::Vacant(slot) => {
                    if !archive_path.exists() {
                        slot.insert(None);
                        let error = Error::ArchiveMissing(archive_path.display().to_string());
                        if handler.error(
                            ErrorSource::Archive,
                            &error,
                            &archive_path.display().to_string(),
                        ) {
                            return Err(error);
                        }
                        return Ok(());
                    }
                    slot.insert(Some(File::open(&archive_path)?))
                }
            };
            let Some(archive) = slot.as_mut() else {
                // Missing archive, reported when first encountered.
                return Ok(());
            };

            // The checksum covers the preload prefix followed by the bulk.
            data_handler.preload(&file.preload);

            archive.seek(SeekFrom::Start(u64::from(file.offset)))?;
            let mut remaining = file.size as usize;
            let mut buf = [0u8; IO_CHUNK];
            while remaining > 0 {
                let count = remaining.min(IO_CHUNK);
                if let Err(error) = archive
                    .read_exact(&mut buf[..count])
                    .map_err(Error::from_read)
                {
                    if handler.error(
                        ErrorSource::Archive,
                        &error,
                        &archive_path.display().to_string(),
                    ) {
                        return Err(error);
                    }
                    return Ok(());
                }
                if let Err(error) = data_handler.process(&buf[..count]) {
                    if handler.error(ErrorSource::File, &error, path) {
                        return Err(error);
                    }
                    return Ok(());
                }
                remaining -= count;
            }

            if let Err(error) = data_handler.finish() {
                if handler.error(ErrorSource::File, &error, path) {
                    return Err(error);
                }
                return Ok(());
            }

            if !file.preload.is_empty() {
                // Split files keep their preload prefix as a separate
                // artifact next to the extracted bulk.
                let smallpath = format!("{path}.smalldata");
                let result = factory.create_raw(&smallpath).and_then(|small| {
                    if let Some(mut small) = small {
                        small.process(&file.preload)?;
                        small.finish()?;
                    }
                    Ok(())
                });
                if let Err(error) = result {
                    if handler.error(ErrorSource::File, &error, &smallpath) {
                        return Err(error);
                    }
                    return Ok(());
                }
            }
        }

        handler.success(path);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use crate::error::Error;
    use crate::handler::ProgressHandler;
    use crate::read::test::IndexBuilder;
    use crate::read::Package;
    use crate::types::NO_ARCHIVE;

    #[derive(Default)]
    pub(crate) struct CollectingHandler {
        pub events: Vec<String>,
        pub stop: bool,
    }

    impl ProgressHandler for CollectingHandler {
        fn begin(&mut self, filecount: usize) {
            self.events.push(format!("begin {filecount}"));
        }

        fn end(&mut self) {
            self.events.push("end".to_string());
        }

        fn extract(&mut self, path: &str) {
            self.events.push(format!("extract {path}"));
        }

        fn success(&mut self, path: &str) {
            self.events.push(format!("success {path}"));
        }

        fn dir_error(&mut self, error: &Error, _path: &str) -> bool {
            self.events.push(format!("dir_error {error}"));
            self.stop
        }

        fn file_error(&mut self, error: &Error, _path: &str) -> bool {
            self.events.push(format!("file_error {error}"));
            self.stop
        }

        fn archive_error(&mut self, error: &Error, _path: &str) -> bool {
            self.events.push(format!("archive_error {error}"));
            self.stop
        }
    }

    fn preload_only_package(crc32: u32) -> Package {
        let bytes = IndexBuilder::versioned()
            .asciiz("txt")
            .asciiz(" ")
            .asciiz("a")
            .record(crc32, b"abc", NO_ARCHIVE, 0, 0)
            .asciiz("")
            .asciiz("")
            .asciiz("")
            .bytes();
        Package::from_reader(".", "pkg", Cursor::new(bytes)).unwrap()
    }

    #[test]
    fn check_passes_on_matching_crc() {
        // CRC-32 of "abc"
        let package = preload_only_package(0x352441C2);
        let mut handler = CollectingHandler::default();

        package.check(&mut handler).unwrap();

        assert_eq!(
            handler.events,
            vec!["begin 1", "extract a.txt", "success a.txt", "end"]
        );
    }

    #[test]
    fn check_reports_mismatch_and_continues() {
        let package = preload_only_package(0x12345678);
        let mut handler = CollectingHandler::default();

        package.check(&mut handler).unwrap();

        assert_eq!(handler.events.len(), 4);
        assert!(handler.events[2].starts_with("file_error checksum mismatch"));
        assert_eq!(handler.events[3], "end");
    }

    #[test]
    fn check_mismatch_aborts_when_handler_stops() {
        let package = preload_only_package(0x12345678);
        let mut handler = CollectingHandler {
            stop: true,
            ..Default::default()
        };

        let result = package.check(&mut handler);

        match result {
            Err(Error::ChecksumMismatch { path, expected, got }) => {
                assert_eq!(path, "a.txt");
                assert_eq!(expected, 0x12345678);
                assert_eq!(got, 0x352441C2);
            }
            other => panic!("expected ChecksumMismatch, got {other:?}"),
        }
        // The walk was aborted before the end callback.
        assert!(!handler.events.contains(&"end".to_string()));
    }
}
