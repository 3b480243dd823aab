//! Payload primitives.
//!
//! Message payloads are built from three field kinds:
//! ```text
//! u32 / u64      Big Endian
//! String         u32 BE byte length ++ UTF-8 bytes
//! Option<String> u8 presence flag (0 | 1) ++ String when present
//! ```
//!
//! [`PayloadReader`] tracks its offset so decode errors can report exactly
//! where a payload stopped making sense.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CubeError, Result};

/// Append a u32 in Big Endian.
#[inline]
pub fn put_u32(buf: &mut BytesMut, value: u32) {
    buf.put_u32(value);
}

/// Append a u64 in Big Endian.
#[inline]
pub fn put_u64(buf: &mut BytesMut, value: u64) {
    buf.put_u64(value);
}

/// Append a length-prefixed UTF-8 string.
///
/// # Panics
///
/// Panics if the string is longer than `u32::MAX` bytes, which cannot be
/// represented on the wire.
pub fn put_string(buf: &mut BytesMut, value: &str) {
    let len = u32::try_from(value.len()).expect("string longer than u32::MAX bytes");
    buf.reserve(4 + value.len());
    buf.put_u32(len);
    buf.put_slice(value.as_bytes());
}

/// Append an optional string with its presence flag.
pub fn put_optional_string(buf: &mut BytesMut, value: Option<&str>) {
    match value {
        Some(value) => {
            buf.put_u8(1);
            put_string(buf, value);
        }
        None => buf.put_u8(0),
    }
}

/// Cursor over a frame payload.
#[derive(Debug)]
pub struct PayloadReader {
    payload: Bytes,
    offset: usize,
    message_type: &'static str,
}

impl PayloadReader {
    /// Create a reader; `message_type` labels errors.
    pub fn new(message_type: &'static str, payload: Bytes) -> Self {
        Self {
            payload,
            offset: 0,
            message_type,
        }
    }

    /// Current offset into the payload.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.offset
    }

    fn truncated(&self, needed: usize) -> CubeError {
        CubeError::MalformedMessage {
            message_type: self.message_type,
            offset: self.offset,
            needed,
            available: self.remaining(),
        }
    }

    /// Take the next `n` bytes (zero-copy).
    pub fn take(&mut self, n: usize) -> Result<Bytes> {
        if self.remaining() < n {
            return Err(self.truncated(n));
        }
        let bytes = self.payload.slice(self.offset..self.offset + n);
        self.offset += n;
        Ok(bytes)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a Big Endian u32.
    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a Big Endian u64.
    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        Ok(u64::from_be_bytes(raw))
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self, field: &'static str) -> Result<String> {
        let len = self.read_u32()? as usize;
        let start = self.offset;
        let bytes = self.take(len)?;
        utf8(field, start, bytes)
    }

    /// Read an optional string; the flag must be 0 or 1.
    pub fn read_optional_string(&mut self, field: &'static str) -> Result<Option<String>> {
        let flag_offset = self.offset;
        match self.read_u8()? {
            0 => Ok(None),
            1 => self.read_string(field).map(Some),
            _ => Err(CubeError::MalformedMessage {
                message_type: self.message_type,
                offset: flag_offset,
                needed: 1,
                available: 1,
            }),
        }
    }

    /// Read everything left as UTF-8 (no length prefix).
    pub fn read_remaining_string(&mut self, field: &'static str) -> Result<String> {
        let start = self.offset;
        let bytes = self.take_remaining();
        utf8(field, start, bytes)
    }

    /// Take everything left (zero-copy).
    pub fn take_remaining(&mut self) -> Bytes {
        let bytes = self.payload.slice(self.offset..);
        self.offset = self.payload.len();
        bytes
    }

    /// Fail if any bytes remain after the last field.
    pub fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(CubeError::MalformedMessage {
                message_type: self.message_type,
                offset: self.offset,
                needed: 0,
                available: self.remaining(),
            });
        }
        Ok(())
    }
}

fn utf8(field: &'static str, offset: usize, bytes: Bytes) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| CubeError::InvalidEncoding {
        field,
        offset: offset + e.utf8_error().valid_up_to(),
    })
}
