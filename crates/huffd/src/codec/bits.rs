//! MSB-first bit packing.

use std::ops::Range;

use super::EncodedPayload;

/// Accumulates bits into bytes, most significant bit first.
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bit(&mut self, bit: bool) {
        let offset = self.bit_len % 8;
        if offset == 0 {
            self.bytes.push(0);
        }
        if bit && let Some(last) = self.bytes.last_mut() {
            *last |= 0x80 >> offset;
        }
        self.bit_len += 1;
    }

    /// Append a `'0'`/`'1'` code string.
    pub fn push_code(&mut self, code: &str) {
        for b in code.bytes() {
            self.push_bit(b == b'1');
        }
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Close the stream; the unused tail of the last byte is the padding.
    pub fn finish(self) -> EncodedPayload {
        let padding = ((8 - self.bit_len % 8) % 8) as u8;
        EncodedPayload {
            data: self.bytes,
            padding,
        }
    }
}

/// Iterator over a range of bits in a byte slice, MSB first.
#[derive(Debug, Clone)]
pub struct Bits<'a> {
    data: &'a [u8],
    range: Range<usize>,
}

impl<'a> Bits<'a> {
    pub fn new(data: &'a [u8], range: Range<usize>) -> Self {
        let end = range.end.min(data.len() * 8);
        Self {
            data,
            range: range.start.min(end)..end,
        }
    }
}

impl Iterator for Bits<'_> {
    type Item = bool;

    fn next(&mut self) -> Option<bool> {
        let index = self.range.next()?;
        Some(self.data[index / 8] & (0x80 >> (index % 8)) != 0)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.range.size_hint()
    }
}

impl ExactSizeIterator for Bits<'_> {}
