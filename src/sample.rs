//! Sample element types stored in pool blocks and written to disk.
//!
//! The SAI delivers 24 bit codec words left aligned in 32 bit slots. Files
//! hold either 16 bit samples (the top 16 bits of each word) or the full 24
//! bits sign extended to 32.

/// 24 bit signed sample as read from the SAI data register.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct S24(i32);

const S24_SIGN: i32 = 0x80_0000;
const S24_MASK: u32 = 0xFF_FFFF;

impl S24 {
    /// Sign extended value in `-2^23..2^23`.
    pub fn value(self) -> i32 {
        self.0
    }
}

impl From<u32> for S24 {
    fn from(x: u32) -> S24 {
        let raw = (x & S24_MASK) as i32;
        S24((raw ^ S24_SIGN) - S24_SIGN)
    }
}

impl From<S24> for i32 {
    fn from(x: S24) -> i32 {
        x.0
    }
}

/// A PCM sample element.
pub trait Sample: Copy + Default + Send + 'static {
    const ZERO: Self;
    /// Bytes per sample on disk.
    const WIDTH: usize;

    fn from_s24(x: S24) -> Self;

    /// Write the little-endian encoding into `out[..WIDTH]`.
    fn put_le(self, out: &mut [u8]);
}

impl Sample for i16 {
    const ZERO: Self = 0;
    const WIDTH: usize = 2;

    fn from_s24(x: S24) -> Self {
        (x.0 >> 8) as i16
    }

    fn put_le(self, out: &mut [u8]) {
        out[..2].copy_from_slice(&self.to_le_bytes());
    }
}

impl Sample for i32 {
    const ZERO: Self = 0;
    const WIDTH: usize = 4;

    fn from_s24(x: S24) -> Self {
        x.0
    }

    fn put_le(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.to_le_bytes());
    }
}
