//! Positioned little-endian reads over a seekable byte source.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};

/// Little-endian primitive reader with an explicit closed state.
///
/// Every read that runs off the end of the source fails with
/// [`Error::ShortRead`]; any operation after [`FileReader::close`] fails
/// with [`Error::Closed`]. Closing is idempotent.
pub struct FileReader<R> {
    inner: Option<R>,
}

impl<R: Read + Seek> FileReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner: Some(inner) }
    }

    pub(crate) fn stream(&mut self) -> Result<&mut R> {
        self.inner.as_mut().ok_or(Error::Closed)
    }

    /// Read a little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16> {
        self.stream()?
            .read_u16::<LittleEndian>()
            .map_err(Error::from_read)
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.stream()?
            .read_u32::<LittleEndian>()
            .map_err(Error::from_read)
    }

    /// Read bytes up to and including the first NUL and return the bytes
    /// before it. An empty result is legal; the directory format uses it
    /// to end a section.
    pub fn read_asciiz(&mut self) -> Result<String> {
        let stream = self.stream()?;
        let mut buf = Vec::new();
        loop {
            let byte = stream.read_u8().map_err(Error::from_read)?;
            if byte == 0 {
                break;
            }
            buf.push(byte);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Fill `buf` completely.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.stream()?.read_exact(buf).map_err(Error::from_read)
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.stream()?.seek(pos)?)
    }

    /// Current byte position in the source.
    pub fn tell(&mut self) -> Result<u64> {
        Ok(self.stream()?.stream_position()?)
    }

    /// Drop the underlying source. Idempotent; later reads fail with
    /// [`Error::Closed`].
    pub fn close(&mut self) {
        self.inner = None;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

#[cfg(test)]
mod test {
    use std::io::{Cursor, SeekFrom};

    use pretty_assertions::assert_eq;

    use super::FileReader;
    use crate::error::Error;

    #[test]
    fn read_primitives() {
        let mut r = FileReader::new(Cursor::new(vec![0x34, 0x12, 0x78, 0x56, 0x34, 0x12]));
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_u32().unwrap(), 0x12345678);
        assert_eq!(r.tell().unwrap(), 6);
    }

    #[test]
    fn read_asciiz_stops_at_nul() {
        let mut r = FileReader::new(Cursor::new(b"abc\0\0def\0".to_vec()));
        assert_eq!(r.read_asciiz().unwrap(), "abc");
        assert_eq!(r.read_asciiz().unwrap(), "");
        assert_eq!(r.read_asciiz().unwrap(), "def");
    }

    #[test]
    fn short_reads_are_detected() {
        let mut r = FileReader::new(Cursor::new(vec![0x01]));
        assert!(matches!(r.read_u32(), Err(Error::ShortRead)));

        let mut r = FileReader::new(Cursor::new(b"unterminated".to_vec()));
        assert!(matches!(r.read_asciiz(), Err(Error::ShortRead)));

        let mut r = FileReader::new(Cursor::new(vec![0x01, 0x02]));
        let mut buf = [0u8; 4];
        assert!(matches!(r.read_exact(&mut buf), Err(Error::ShortRead)));
    }

    #[test]
    fn close_is_idempotent_and_sticky() {
        let mut r = FileReader::new(Cursor::new(vec![0x01, 0x02]));
        assert!(!r.is_closed());
        r.close();
        r.close();
        assert!(r.is_closed());
        assert!(matches!(r.read_u16(), Err(Error::Closed)));
        assert!(matches!(r.tell(), Err(Error::Closed)));
        assert!(matches!(r.seek(SeekFrom::Start(0)), Err(Error::Closed)));
    }

    #[test]
    fn seek_and_reread() {
        let mut r = FileReader::new(Cursor::new(vec![0xAA, 0xBB, 0xCC, 0xDD]));
        r.read_u16().unwrap();
        r.seek(SeekFrom::Current(-2)).unwrap();
        assert_eq!(r.read_u32().unwrap(), 0xDDCCBBAA);
    }
}
