// Random-access byte streams used as decode source and target.
//
// The source is read at arbitrary offsets.  The target is append-only for
// writing, but VCD_TARGET windows read back bytes that earlier windows
// produced, so a target must also support positioned reads that leave the
// append position untouched.

use std::io::{self, Read, Seek, SeekFrom, Write};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Seekable, length-queryable source of bytes for COPY instructions.
pub trait SourceStream {
    /// Total length of the stream in bytes.
    fn length(&mut self) -> io::Result<u64>;

    /// Read bytes at absolute `offset` into `buf`.
    /// Returns the number of bytes read; short only at end of stream.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;
}

/// Append target that can read back its own already-written bytes.
pub trait TargetStream {
    /// Append `data` at the write position.
    fn append(&mut self, data: &[u8]) -> io::Result<()>;

    /// Number of bytes appended so far.
    fn position(&self) -> u64;

    /// Read previously appended bytes at absolute `offset` into `buf`
    /// without moving the write position.
    fn read_back(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Flush buffered output, if any.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: SourceStream + ?Sized> SourceStream for &mut S {
    fn length(&mut self) -> io::Result<u64> {
        (**self).length()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buf)
    }
}

impl<T: TargetStream + ?Sized> TargetStream for &mut T {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).append(data)
    }

    fn position(&self) -> u64 {
        (**self).position()
    }

    fn read_back(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_back(offset, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

// ---------------------------------------------------------------------------
// In-memory streams
// ---------------------------------------------------------------------------

fn copy_from_slice_at(data: &[u8], offset: u64, buf: &mut [u8]) -> usize {
    let Ok(offset) = usize::try_from(offset) else {
        return 0;
    };
    if offset >= data.len() {
        return 0;
    }
    let available = &data[offset..];
    let n = buf.len().min(available.len());
    buf[..n].copy_from_slice(&available[..n]);
    n
}

impl SourceStream for &[u8] {
    fn length(&mut self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        Ok(copy_from_slice_at(self, offset, buf))
    }
}

impl SourceStream for Vec<u8> {
    fn length(&mut self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        Ok(copy_from_slice_at(self, offset, buf))
    }
}

/// Growable in-memory target: the vector is the arena, its length the
/// write cursor.
impl TargetStream for Vec<u8> {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }

    fn position(&self) -> u64 {
        self.len() as u64
    }

    fn read_back(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        Ok(copy_from_slice_at(self, offset, buf))
    }
}

/// Placeholder source for patches decoded without one.
///
/// A window that asks for source data still fails with
/// `DecodeError::SourceRequired`, because the decoder is given `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSource;

impl SourceStream for NoSource {
    fn length(&mut self) -> io::Result<u64> {
        Ok(0)
    }

    fn read_at(&mut self, _offset: u64, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

// ---------------------------------------------------------------------------
// Seekable streams (files, cursors)
// ---------------------------------------------------------------------------

/// Adapter giving any `Read + Seek` value positioned reads, and any
/// `Read + Write + Seek` value the append/read-back target contract.
///
/// Offsets are absolute within the wrapped stream.  As a target, appends
/// start at offset 0 and the append position survives interleaved
/// `read_back` calls.
#[derive(Debug)]
pub struct SeekStream<T> {
    inner: T,
    /// Physical position of `inner`, when known.
    pos: Option<u64>,
    write_pos: u64,
}

impl<T> SeekStream<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            pos: None,
            write_pos: 0,
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Seek> SeekStream<T> {
    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        if self.pos != Some(offset) {
            self.pos = None;
            self.inner.seek(SeekFrom::Start(offset))?;
            self.pos = Some(offset);
        }
        Ok(())
    }
}

impl<T: Read + Seek> SeekStream<T> {
    fn read_from(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.seek_to(offset)?;
        let n = loop {
            match self.inner.read(buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.pos = None;
                    return Err(e);
                }
            }
        };
        self.pos = Some(offset + n as u64);
        Ok(n)
    }
}

impl<T: Read + Seek> SourceStream for SeekStream<T> {
    fn length(&mut self) -> io::Result<u64> {
        self.pos = None;
        let end = self.inner.seek(SeekFrom::End(0))?;
        self.pos = Some(end);
        Ok(end)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.read_from(offset, buf)
    }
}

impl<T: Read + Write + Seek> TargetStream for SeekStream<T> {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.seek_to(self.write_pos)?;
        if let Err(e) = self.inner.write_all(data) {
            self.pos = None;
            return Err(e);
        }
        self.write_pos += data.len() as u64;
        self.pos = Some(self.write_pos);
        Ok(())
    }

    fn position(&self) -> u64 {
        self.write_pos
    }

    fn read_back(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let limit = self.write_pos.saturating_sub(offset);
        let want = buf.len().min(usize::try_from(limit).unwrap_or(usize::MAX));
        self.read_from(offset, &mut buf[..want])
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn slice_source_reads_at_offset() {
        let mut src: &[u8] = b"ABCDEFGHIJKLMNOP";
        let mut buf = [0u8; 8];
        assert_eq!(src.length().unwrap(), 16);
        assert_eq!(src.read_at(4, &mut buf).unwrap(), 8);
        assert_eq!(&buf, b"EFGHIJKL");
        assert_eq!(src.read_at(14, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"OP");
        assert_eq!(src.read_at(16, &mut buf).unwrap(), 0);
        assert_eq!(src.read_at(u64::MAX, &mut buf).unwrap(), 0);
    }

    #[test]
    fn vec_target_reads_back_written_bytes() {
        let mut target = Vec::new();
        TargetStream::append(&mut target, b"hello ").unwrap();
        TargetStream::append(&mut target, b"world").unwrap();
        assert_eq!(TargetStream::position(&target), 11);

        let mut buf = [0u8; 5];
        assert_eq!(target.read_back(6, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"world");
        assert_eq!(target, b"hello world");
    }

    #[test]
    fn seek_stream_read_back_keeps_append_position() {
        let mut target = SeekStream::new(Cursor::new(Vec::new()));
        target.append(b"0123456789").unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(target.read_back(2, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"2345");

        target.append(b"abc").unwrap();
        assert_eq!(target.position(), 13);
        assert_eq!(target.into_inner().into_inner(), b"0123456789abc");
    }

    #[test]
    fn seek_stream_read_back_stops_at_write_position() {
        // Pre-existing bytes past the append position are not visible.
        let mut target = SeekStream::new(Cursor::new(b"stale-contents".to_vec()));
        target.append(b"new").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(target.read_back(0, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"new");
    }

    #[test]
    fn seek_stream_as_source() {
        let mut src = SeekStream::new(Cursor::new(b"The quick brown fox".to_vec()));
        assert_eq!(src.length().unwrap(), 19);
        let mut buf = [0u8; 5];
        assert_eq!(src.read_at(4, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"quick");
        assert_eq!(src.read_at(16, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"fox");
    }

    #[test]
    fn mut_ref_forwards() {
        let mut target = Vec::new();
        {
            let mut r = &mut target;
            TargetStream::append(&mut r, b"xyz").unwrap();
            assert_eq!(TargetStream::position(&r), 3);
        }
        assert_eq!(target, b"xyz");
    }
}
