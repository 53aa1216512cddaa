//! In-memory source and destination.
//!
//! The memory source keeps its own copy of the input, so the caller's
//! buffer can go away right after open. The memory destination grows in
//! fixed chunks and hands the finished bytes to an [`OutputSlot`] only
//! when encoding completes.

use std::io::{self, Write};
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::diag::{CodecError, ErrorContext, Warning};
use crate::stream::{DataSource, Destination, FAKE_EOI};

/// Growth step of the memory destination.
pub const OUTPUT_CHUNK: usize = 65536;

/// Source over an owned byte buffer.
pub struct MemorySource {
    data: Vec<u8>,
    pos: usize,
    /// Once the data is gone we serve this, over and over.
    fake: bool,
    fake_pos: usize,
}

impl MemorySource {
    /// Take a private copy of `data`.
    pub fn copy_from(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// Use `data` directly.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            fake: false,
            fake_pos: 0,
        }
    }
}

impl DataSource for MemorySource {
    fn buffer(&self) -> &[u8] {
        if self.fake {
            &FAKE_EOI[self.fake_pos..]
        } else {
            &self.data[self.pos..]
        }
    }

    fn consume(&mut self, n: usize) {
        if self.fake {
            self.fake_pos = (self.fake_pos + n).min(FAKE_EOI.len());
        } else {
            self.pos = (self.pos + n).min(self.data.len());
        }
    }

    fn fill_input_buffer(&mut self, err: &mut ErrorContext) -> Result<(), CodecError> {
        if self.data.is_empty() {
            return Err(CodecError::InputEmpty);
        }
        if !self.fake && self.pos < self.data.len() {
            // Still holding real data, nothing to do.
            return Ok(());
        }
        err.warn(Warning::JpegEof);
        self.fake = true;
        self.fake_pos = 0;
        Ok(())
    }

    fn skip_input_data(&mut self, n: usize, _err: &mut ErrorContext) -> Result<(), CodecError> {
        let available = self.buffer().len();
        if n > available {
            return Err(CodecError::SkipOverrun {
                requested: n,
                available,
            });
        }
        self.consume(n);
        Ok(())
    }
}

/// Shared place where a memory-encoded JPEG ends up.
///
/// Cloning the slot gives another handle on the same place. The handle
/// that encodes fills it on success and leaves it alone on failure.
#[derive(Debug, Clone, Default)]
pub struct OutputSlot(Arc<Mutex<Option<Vec<u8>>>>);

impl OutputSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Vec<u8>>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the produced bytes out, leaving the slot empty.
    pub fn take(&self) -> Option<Vec<u8>> {
        self.lock().take()
    }

    /// Whether something has been delivered.
    pub fn is_filled(&self) -> bool {
        self.lock().is_some()
    }

    /// Length of the delivered bytes, if any.
    pub fn len(&self) -> Option<usize> {
        self.lock().as_ref().map(Vec::len)
    }

    /// A copy of the delivered bytes, if any.
    pub fn snapshot(&self) -> Option<Vec<u8>> {
        self.lock().clone()
    }

    pub(crate) fn deliver(&self, data: Vec<u8>) {
        *self.lock() = Some(data);
    }

    /// Run `f` on the delivered buffer in place.
    pub(crate) fn with_buffer<T>(&self, f: impl FnOnce(&mut Vec<u8>) -> T) -> Option<T> {
        self.lock().as_mut().map(f)
    }
}

/// Growable destination that delivers into an [`OutputSlot`].
pub struct MemoryDestination {
    buf: Vec<u8>,
    slot: OutputSlot,
}

impl MemoryDestination {
    pub fn new(slot: OutputSlot) -> Self {
        Self {
            buf: Vec::new(),
            slot,
        }
    }

    /// Bytes written so far.
    pub fn used(&self) -> usize {
        self.buf.len()
    }

    /// Bytes currently allocated.
    pub fn allocated(&self) -> usize {
        self.buf.capacity()
    }
}

impl Write for MemoryDestination {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let need = self.buf.len() + data.len();
        if need > self.buf.capacity() {
            let target = (need + OUTPUT_CHUNK - 1) / OUTPUT_CHUNK * OUTPUT_CHUNK;
            self.buf
                .try_reserve_exact(target - self.buf.len())
                .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Destination for MemoryDestination {
    fn term_destination(&mut self) -> io::Result<()> {
        let mut out = mem::take(&mut self.buf);
        out.shrink_to_fit();
        self.slot.deliver(out);
        Ok(())
    }
}
