//! The seekable byte cursor every construct parses from and builds into.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use crate::error::{Error, Result};

/// A random-access byte sink/source.
///
/// Built on top of `std::io::{Read, Write, Seek}` rather than reinventing them: every
/// construct in this crate is written against this trait, and any `Read + Write + Seek`
/// type (a `Cursor<Vec<u8>>`, a `std::fs::File`) gets it for free via the blanket impl
/// below.
pub trait Stream: Read + Write + Seek {
    /// Current position, counted from the start.
    fn tell(&mut self) -> Result<u64> {
        Ok(self.stream_position()?)
    }

    /// Reads exactly `n` bytes or fails with a field error.
    fn read_exact_n(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::field(n, 0)
            } else {
                Error::Io(e)
            }
        })?;
        Ok(buf)
    }

    /// Reads to EOF and returns everything read.
    fn read_to_end_vec(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Writes `bytes` verbatim.
    fn write_all_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_all(bytes)?;
        Ok(())
    }

    /// Seeks to an absolute offset. A negative offset means "from the end".
    fn seek_abs(&mut self, offset: i64) -> Result<u64> {
        let pos = if offset < 0 {
            self.seek(SeekFrom::End(offset))?
        } else {
            self.seek(SeekFrom::Start(offset as u64))?
        };
        Ok(pos)
    }
}

impl<T: Read + Write + Seek + ?Sized> Stream for T {}

/// Convenience constructor: wraps a byte slice for parsing.
pub fn reader(bytes: &[u8]) -> Cursor<Vec<u8>> {
    Cursor::new(bytes.to_vec())
}

/// Convenience constructor: an empty, growable in-memory stream for building.
pub fn writer() -> Cursor<Vec<u8>> {
    Cursor::new(Vec::new())
}

/// Buffers a non-seekable `Read` fully into memory so it can be used as a [`Stream`].
pub fn buffer_reader(mut source: impl Read) -> Result<Cursor<Vec<u8>>> {
    let mut buf = Vec::new();
    source.read_to_end(&mut buf)?;
    Ok(Cursor::new(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_exact_n_reports_field_error_on_eof() {
        let mut s = reader(&[1, 2]);
        let err = s.read_exact_n(5).unwrap_err();
        assert!(err.is_field_error());
    }

    #[test]
    fn seek_abs_from_end() {
        let mut s = reader(&[1, 2, 3, 4]);
        let pos = s.seek_abs(-2).unwrap();
        assert_eq!(pos, 2);
        assert_eq!(s.read_exact_n(2).unwrap(), vec![3, 4]);
    }
}
