//! Little-endian primitive codec.
//!
//! All on-wire values are little-endian with no alignment. [`ReadCursor`]
//! walks a borrowed byte slice; [`WriteCursor`] fills a fixed-capacity
//! buffer. Reads past the end fail with [`WireError::ShortRead`], writes
//! past capacity with [`WireError::BufferFull`]; neither panics.

use crate::error::{Result, WireError};

macro_rules! read_primitive {
    ($name:ident, $ty:ty) => {
        /// Read one little-endian value, advancing the cursor.
        pub fn $name(&mut self) -> Result<$ty> {
            const N: usize = size_of::<$ty>();
            let bytes = self.take(N)?;
            let mut raw = [0u8; N];
            raw.copy_from_slice(bytes);
            Ok(<$ty>::from_le_bytes(raw))
        }
    };
}

macro_rules! write_primitive {
    ($name:ident, $ty:ty) => {
        /// Append one value in little-endian encoding.
        pub fn $name(&mut self, value: $ty) -> Result<()> {
            self.put(&value.to_le_bytes())
        }
    };
}

/// Forward-only reader over a byte slice.
#[derive(Debug, Clone)]
pub struct ReadCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ReadCursor<'a> {
    /// Wrap `buf`, starting at its first byte.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Current offset from the start of the slice.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Look at the next `count` bytes without consuming them.
    pub fn peek(&self, count: usize) -> Result<&'a [u8]> {
        if self.remaining() < count {
            return Err(WireError::ShortRead { needed: count, available: self.remaining() });
        }
        Ok(&self.buf[self.pos..self.pos + count])
    }

    /// Consume and return the next `count` bytes.
    pub fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        let bytes = self.peek(count)?;
        self.pos += count;
        Ok(bytes)
    }

    /// Discard the next `count` bytes.
    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.take(count).map(|_| ())
    }

    read_primitive!(read_u8, u8);
    read_primitive!(read_i8, i8);
    read_primitive!(read_u16, u16);
    read_primitive!(read_i16, i16);
    read_primitive!(read_u32, u32);
    read_primitive!(read_i32, i32);
    read_primitive!(read_u64, u64);
    read_primitive!(read_i64, i64);
    read_primitive!(read_f32, f32);
    read_primitive!(read_f64, f64);
}

/// Forward-only writer over a fixed-capacity buffer.
#[derive(Debug)]
pub struct WriteCursor {
    buf: Vec<u8>,
    capacity: usize,
}

impl WriteCursor {
    /// New writer bounded to `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { buf: Vec::new(), capacity }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Capacity remaining.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Append raw bytes.
    pub fn put(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.remaining() {
            return Err(WireError::BufferFull {
                needed: bytes.len(),
                remaining: self.remaining(),
            });
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Overwrite previously written bytes at `offset`.
    ///
    /// Used to back-patch sizes once a payload length is known.
    pub fn patch(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset + bytes.len();
        if end > self.buf.len() {
            return Err(WireError::BufferFull { needed: end, remaining: self.buf.len() });
        }
        self.buf[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// View the written bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Take ownership of the written bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    write_primitive!(write_u8, u8);
    write_primitive!(write_i8, i8);
    write_primitive!(write_u16, u16);
    write_primitive!(write_i16, i16);
    write_primitive!(write_u32, u32);
    write_primitive!(write_i32, i32);
    write_primitive!(write_u64, u64);
    write_primitive!(write_i64, i64);
    write_primitive!(write_f32, f32);
    write_primitive!(write_f64, f64);
}
