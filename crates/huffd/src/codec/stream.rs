//! Incremental encoder and decoder.
//!
//! Jobs feed input in checkpoint-sized chunks and report progress between
//! pushes; the one-shot `encode`/`decode` functions push everything at once.

use std::collections::HashMap;

use super::{BitWriter, CodeTable, CodecError, EncodedPayload};

pub struct Encoder<'t> {
    table: &'t CodeTable,
    writer: BitWriter,
}

impl<'t> Encoder<'t> {
    pub fn new(table: &'t CodeTable) -> Self {
        Self {
            table,
            writer: BitWriter::new(),
        }
    }

    pub fn push(&mut self, symbols: impl IntoIterator<Item = char>) -> Result<(), CodecError> {
        for symbol in symbols {
            let code = self
                .table
                .get(symbol)
                .ok_or(CodecError::MissingSymbol(symbol))?;
            self.writer.push_code(code);
        }
        Ok(())
    }

    pub fn bit_len(&self) -> usize {
        self.writer.bit_len()
    }

    pub fn finish(self) -> EncodedPayload {
        self.writer.finish()
    }
}

/// Greedy prefix decoder.
///
/// Grows a bit run until it matches a code, emits that symbol and starts a
/// new run. The table is validated up front, so a run longer than the
/// longest code can never match and fails immediately.
pub struct Decoder<'t> {
    lookup: HashMap<&'t str, char>,
    max_code_len: usize,
    run: String,
    output: String,
}

impl<'t> Decoder<'t> {
    pub fn new(table: &'t CodeTable) -> Result<Self, CodecError> {
        table.validate()?;
        Ok(Self {
            lookup: table.inverted(),
            max_code_len: table.max_code_len(),
            run: String::new(),
            output: String::new(),
        })
    }

    pub fn push_bits(&mut self, bits: impl IntoIterator<Item = bool>) -> Result<(), CodecError> {
        for bit in bits {
            self.run.push(if bit { '1' } else { '0' });
            if let Some(&symbol) = self.lookup.get(self.run.as_str()) {
                self.output.push(symbol);
                self.run.clear();
            } else if self.run.len() >= self.max_code_len {
                return Err(CodecError::UnknownCode(std::mem::take(&mut self.run)));
            }
        }
        Ok(())
    }

    pub fn finish(self) -> Result<String, CodecError> {
        if self.run.is_empty() {
            Ok(self.output)
        } else {
            Err(CodecError::UnresolvedBits(self.run))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunked_encode_matches_one_shot() {
        let input = "chunked input is encoded identically";
        let table = CodeTable::build(input);
        let symbols: Vec<char> = input.chars().collect();

        let mut encoder = Encoder::new(&table);
        for chunk in symbols.chunks(7) {
            encoder.push(chunk.iter().copied()).unwrap();
        }

        assert_eq!(encoder.finish(), crate::codec::encode(input, &table).unwrap());
    }

    #[test]
    fn decoder_carries_run_across_chunks() {
        let input = "abcabcabcd";
        let table = CodeTable::build(input);
        let payload = crate::codec::encode(input, &table).unwrap();

        let mut decoder = Decoder::new(&table).unwrap();
        // One bit per push forces every multi-bit code to straddle a boundary.
        for i in 0..payload.bit_len() {
            decoder.push_bits(payload.bits(i..i + 1)).unwrap();
        }
        assert_eq!(decoder.finish().unwrap(), input);
    }

    #[test]
    fn decoder_fails_fast_on_unknown_run() {
        let table = CodeTable::from_codes([('a', "00".to_string()), ('b', "01".to_string())].into());
        let mut decoder = Decoder::new(&table).unwrap();
        let err = decoder.push_bits([true, true, false]).unwrap_err();
        assert_eq!(err, CodecError::UnknownCode("11".to_string()));
    }

    #[test]
    fn empty_table_rejects_any_bit() {
        let table = CodeTable::default();
        let mut decoder = Decoder::new(&table).unwrap();
        assert!(decoder.push_bits(std::iter::empty()).is_ok());
        assert!(matches!(
            decoder.push_bits([false]),
            Err(CodecError::UnknownCode(_))
        ));
    }

    #[test]
    fn decoder_refuses_invalid_table() {
        let table = CodeTable::from_codes([('a', "0".to_string()), ('b', "00".to_string())].into());
        assert!(matches!(
            Decoder::new(&table),
            Err(CodecError::NotPrefixFree { .. })
        ));
    }
}
