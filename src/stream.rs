//! Byte sources and sinks for the codec.
//!
//! The decoder never touches a file or a slice directly. It pulls
//! through a [`DataSource`] and the encoder pushes into a
//! [`Destination`]. This module has the traits and the file-backed
//! implementations; [`crate::memstream`] has the in-memory ones.

use std::fs::File;
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use crate::diag::{CodecError, ErrorContext, Warning};

/// Read size for file-backed sources.
pub const INPUT_BUF_SIZE: usize = 4096;

/// What a source serves once the real data runs out.
pub(crate) const FAKE_EOI: [u8; 2] = [0xFF, 0xD9];

/// Where the decoder gets its bytes.
///
/// The contract follows the usual pull model: the decoder looks at
/// [`buffer`](DataSource::buffer), eats some of it with
/// [`consume`](DataSource::consume) and asks for more with
/// [`fill_input_buffer`](DataSource::fill_input_buffer) once it is empty.
/// A fill never leaves the buffer empty: a source that has run dry warns
/// and serves a fake EOI marker instead, so a truncated file decodes
/// as far as it goes.
pub trait DataSource: Send {
    /// Unconsumed bytes currently buffered.
    fn buffer(&self) -> &[u8];

    /// Mark `n` buffered bytes as consumed. `n` never exceeds `buffer().len()`.
    fn consume(&mut self, n: usize);

    /// Refill the buffer.
    fn fill_input_buffer(&mut self, err: &mut ErrorContext) -> Result<(), CodecError>;

    /// Discard `n` bytes of input, buffered or not.
    fn skip_input_data(&mut self, n: usize, err: &mut ErrorContext) -> Result<(), CodecError>;
}

/// Source over anything readable. Used for files.
pub struct ReaderSource<R> {
    reader: R,
    buf: Box<[u8]>,
    pos: usize,
    len: usize,
    start_of_file: bool,
}

/// File-backed source.
pub type FileSource = ReaderSource<File>;

impl FileSource {
    /// Open `path` for decoding.
    pub fn open(path: &Path) -> Result<Self, CodecError> {
        Ok(Self::new(File::open(path)?))
    }
}

impl<R: Read> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: vec![0u8; INPUT_BUF_SIZE].into_boxed_slice(),
            pos: 0,
            len: 0,
            start_of_file: true,
        }
    }

    fn read_some(&mut self) -> io::Result<usize> {
        loop {
            match self.reader.read(&mut self.buf) {
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }
}

impl<R: Read + Send> DataSource for ReaderSource<R> {
    fn buffer(&self) -> &[u8] {
        &self.buf[self.pos..self.len]
    }

    fn consume(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.len);
    }

    fn fill_input_buffer(&mut self, err: &mut ErrorContext) -> Result<(), CodecError> {
        let n = self.read_some()?;
        if n == 0 {
            if self.start_of_file {
                return Err(CodecError::InputEmpty);
            }
            err.warn(Warning::JpegEof);
            self.buf[..FAKE_EOI.len()].copy_from_slice(&FAKE_EOI);
            self.pos = 0;
            self.len = FAKE_EOI.len();
            return Ok(());
        }
        self.pos = 0;
        self.len = n;
        self.start_of_file = false;
        Ok(())
    }

    fn skip_input_data(&mut self, mut n: usize, err: &mut ErrorContext) -> Result<(), CodecError> {
        while n > self.len - self.pos {
            n -= self.len - self.pos;
            self.pos = self.len;
            // A fake EOI counts as data here; the marker reader sorts it out.
            self.fill_input_buffer(err)?;
        }
        self.pos += n;
        Ok(())
    }
}

/// Where the encoder puts its bytes.
pub trait Destination: Write + Send {
    /// Called once after the last byte. Flushes and releases the sink.
    fn term_destination(&mut self) -> io::Result<()>;
}

/// File-backed destination.
pub struct FileDestination {
    inner: BufWriter<File>,
}

impl FileDestination {
    /// Create (or truncate) `path` for writing.
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self {
            inner: BufWriter::new(File::create(path)?),
        })
    }
}

impl Write for FileDestination {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Destination for FileDestination {
    fn term_destination(&mut self) -> io::Result<()> {
        self.inner.flush()?;
        self.inner.get_ref().sync_all()
    }
}
