//! Static Huffman codec.
//!
//! - **table**: frequency counting, tree construction, code assignment
//! - **bits**: MSB-first bit packing and unpacking
//! - **stream**: incremental encoder/decoder, so jobs can work in checkpoints
//!
//! Symbols are Unicode scalar values. Codes are strings of `'0'`/`'1'`, which
//! is also how they travel on the wire.

mod bits;
mod stream;
mod table;

pub use bits::{BitWriter, Bits};
pub use stream::{Decoder, Encoder};
pub use table::CodeTable;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("symbol {0:?} has no code in the table")]
    MissingSymbol(char),

    #[error("code {code:?} for symbol {symbol:?} is not a non-empty bit string")]
    InvalidCode { symbol: char, code: String },

    #[error("code {0:?} is assigned to more than one symbol")]
    DuplicateCode(String),

    #[error("code table is not prefix-free: {prefix:?} is a prefix of {code:?}")]
    NotPrefixFree { prefix: String, code: String },

    #[error("padding of {padding} bits is invalid for a {bits}-bit payload")]
    InvalidPadding { padding: u8, bits: usize },

    #[error("bit run {0:?} does not match any code in the table")]
    UnknownCode(String),

    #[error("trailing bits {0:?} do not resolve to a code")]
    UnresolvedBits(String),
}

/// Packed bit stream plus the number of zero bits appended to byte-align it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedPayload {
    data: Vec<u8>,
    padding: u8,
}

impl EncodedPayload {
    /// Wrap bytes received from a client.
    ///
    /// Padding must be in `0..=7` and cannot exceed the number of bits present.
    pub fn new(data: Vec<u8>, padding: u8) -> Result<Self, CodecError> {
        let bits = data.len() * 8;
        if padding > 7 || usize::from(padding) > bits {
            return Err(CodecError::InvalidPadding { padding, bits });
        }
        Ok(Self { data, padding })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn padding(&self) -> u8 {
        self.padding
    }

    /// Number of meaningful bits (padding excluded).
    pub fn bit_len(&self) -> usize {
        self.data.len() * 8 - usize::from(self.padding)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Meaningful bits in `range`, clamped to `bit_len()`.
    pub fn bits(&self, range: std::ops::Range<usize>) -> Bits<'_> {
        let end = range.end.min(self.bit_len());
        Bits::new(&self.data, range.start.min(end)..end)
    }
}

/// Build the optimal code table for `input`.
pub fn build_code_table(input: &str) -> CodeTable {
    CodeTable::build(input)
}

pub fn encode(input: &str, table: &CodeTable) -> Result<EncodedPayload, CodecError> {
    let mut encoder = Encoder::new(table);
    encoder.push(input.chars())?;
    Ok(encoder.finish())
}

pub fn decode(payload: &EncodedPayload, table: &CodeTable) -> Result<String, CodecError> {
    let mut decoder = Decoder::new(table)?;
    decoder.push_bits(payload.bits(0..payload.bit_len()))?;
    decoder.finish()
}
