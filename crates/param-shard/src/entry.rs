//! Per-key learned state and its fixed-width encoding

use bytes::{Buf, BufMut};
use runtime_core::{Error, Result};

/// Encoded size of one entry: three little-endian f32
pub const ENTRY_SIZE: usize = 3 * std::mem::size_of::<f32>();

/// FTRL state of one key
///
/// All-zero is the canonical untouched value; such entries are never written
/// to snapshot files.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Entry {
    /// Model weight served on pull
    pub w: f32,

    /// Dual (accumulated adjusted gradient)
    pub z: f32,

    /// Square root of the cumulative squared gradient
    pub sq_cum_grad: f32,
}

impl Entry {
    pub fn is_empty(&self) -> bool {
        self.w == 0.0 && self.z == 0.0 && self.sq_cum_grad == 0.0
    }

    /// Append `w, z, sq_cum_grad` to `buf`
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_f32_le(self.w);
        buf.put_f32_le(self.z);
        buf.put_f32_le(self.sq_cum_grad);
    }

    /// Read one entry from the front of `buf`
    ///
    /// # Errors
    /// Returns `Error::Serialization` if fewer than `ENTRY_SIZE` bytes remain
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < ENTRY_SIZE {
            return Err(Error::Serialization(format!(
                "short read: entry needs {} bytes, {} remaining",
                ENTRY_SIZE,
                buf.remaining()
            )));
        }
        Ok(Self {
            w: buf.get_f32_le(),
            z: buf.get_f32_le(),
            sq_cum_grad: buf.get_f32_le(),
        })
    }
}
