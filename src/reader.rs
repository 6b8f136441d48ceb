//! The byte-source capability the demuxer reads through.
//!
//! A [`MkvReader`] answers random-access reads over a window that may still be
//! growing (a download in progress, a file being written). The demuxer never
//! assumes the whole source is present: it checks `length()` before reading
//! and surfaces [`MkvError::NeedBytes`] when the window is short.
//!
//! [`MkvError::NeedBytes`]: crate::MkvError::NeedBytes

use crate::error::Result;

/// Random-access byte source with a possibly-growing available window.
pub trait MkvReader {
    /// Read exactly `buf.len()` bytes at absolute offset `pos`.
    ///
    /// Callers only issue reads inside the available window reported by
    /// [`length`](MkvReader::length); a failure here is permanent.
    fn read_into(&self, pos: u64, buf: &mut [u8]) -> Result<()>;

    /// Report `(total, available)` lengths in bytes.
    ///
    /// `total` is `None` while the final length of the source is unknown.
    /// `available` is the extent the reader can satisfy right now; it never
    /// shrinks.
    fn length(&self) -> (Option<u64>, u64);
}

impl<T: MkvReader + ?Sized> MkvReader for &T {
    fn read_into(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_into(pos, buf)
    }

    fn length(&self) -> (Option<u64>, u64) {
        (**self).length()
    }
}

/// A fully-available in-memory source.
#[derive(Debug, Clone)]
pub struct SliceReader<B> {
    data: B,
}

impl<B: AsRef<[u8]>> SliceReader<B> {
    /// Wrap a byte buffer as a fully-available source.
    pub fn new(data: B) -> Self {
        Self { data }
    }

    /// Consume the reader and return the underlying buffer.
    pub fn into_inner(self) -> B {
        self.data
    }
}

impl<B: AsRef<[u8]>> MkvReader for SliceReader<B> {
    fn read_into(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.data.as_ref();
        let start = pos as usize;
        let end = start
            .checked_add(buf.len())
            .filter(|&e| e <= data.len())
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "read past end of source")
            })?;
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn length(&self) -> (Option<u64>, u64) {
        let len = self.data.as_ref().len() as u64;
        (Some(len), len)
    }
}
