//! Growable append-only byte buffer used to assemble one output line at a
//! time.
//!
//! Integers are formatted with itoa so that building a line never allocates
//! once the buffer has been sized. Growth is fallible: an allocation failure
//! surfaces as [`PileupError::ResourceExhausted`] instead of aborting.

use crate::error::{PileupError, Result};
use log::error;
use std::fmt;
use std::io::{self, Write};

/// Reusable byte buffer with amortised growth. Never shrinks.
pub struct LineBuffer {
    buf: Vec<u8>,
    what: &'static str,
}

impl LineBuffer {
    /// Allocate a buffer with at least `capacity` bytes.
    ///
    /// `what` names the buffer in error messages ("line", "events", ...).
    pub fn with_capacity(what: &'static str, capacity: usize) -> Result<Self> {
        let mut buffer = Self {
            buf: Vec::new(),
            what,
        };
        buffer.expand(capacity)?;
        Ok(buffer)
    }

    /// Set the length to zero, keeping the allocation.
    #[inline]
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Make sure the buffer can hold at least `min_capacity` bytes.
    pub fn expand(&mut self, min_capacity: usize) -> Result<()> {
        if self.buf.capacity() >= min_capacity {
            return Ok(());
        }
        let additional = min_capacity - self.buf.len();
        self.buf.try_reserve_exact(additional).map_err(|_| {
            error!("cannot grow {} buffer to {} bytes", self.what, min_capacity);
            PileupError::ResourceExhausted {
                what: self.what,
                requested: min_capacity,
            }
        })
    }

    /// Grow for `additional` more bytes, doubling the capacity when it runs out.
    #[inline]
    fn reserve_for(&mut self, additional: usize) -> Result<()> {
        let needed = self.buf.len() + additional;
        if needed <= self.buf.capacity() {
            return Ok(());
        }
        self.expand(needed.max(self.buf.capacity() * 2))
    }

    /// Append a single byte.
    #[inline]
    pub fn push_byte(&mut self, b: u8) -> Result<()> {
        self.reserve_for(1)?;
        self.buf.push(b);
        Ok(())
    }

    /// Append a byte slice.
    #[inline]
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.reserve_for(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Append a string.
    #[inline]
    pub fn push_str(&mut self, s: &str) -> Result<()> {
        self.push_bytes(s.as_bytes())
    }

    /// Append an integer in decimal.
    #[inline]
    pub fn push_int<I: itoa::Integer>(&mut self, n: I) -> Result<()> {
        let mut digits = itoa::Buffer::new();
        self.push_bytes(digits.format(n).as_bytes())
    }

    /// Append formatted text, e.g. `buf.push_fmt(format_args!("{:x}", v))`.
    pub fn push_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<()> {
        let mut exhausted = None;
        let mut sink = FmtSink {
            buffer: self,
            exhausted: &mut exhausted,
        };
        if fmt::write(&mut sink, args).is_err() {
            return Err(exhausted.unwrap_or(PileupError::InvalidFormat(
                "formatting trait returned an error".to_string(),
            )));
        }
        Ok(())
    }

    /// Mutable access to the byte at `offset` for direct write-back.
    ///
    /// Offsets past the current end extend the buffer with zero bytes.
    pub fn byte_at_mut(&mut self, offset: usize) -> Result<&mut u8> {
        if offset >= self.buf.len() {
            let grow = offset + 1 - self.buf.len();
            self.reserve_for(grow)?;
            self.buf.resize(offset + 1, 0);
        }
        Ok(&mut self.buf[offset])
    }

    /// Number of bytes written since the last reset.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Emit the buffer contents with a single write.
    #[inline]
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&self.buf)
    }
}

impl fmt::Debug for LineBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineBuffer")
            .field("what", &self.what)
            .field("len", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .finish()
    }
}

impl fmt::Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_str(s).map_err(|_| fmt::Error)
    }
}

/// Adapter that remembers the real error behind a `fmt::Error`.
struct FmtSink<'a> {
    buffer: &'a mut LineBuffer,
    exhausted: &'a mut Option<PileupError>,
}

impl fmt::Write for FmtSink<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.buffer.push_str(s).map_err(|e| {
            *self.exhausted = Some(e);
            fmt::Error
        })
    }
}
