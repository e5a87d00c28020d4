//! Code table construction and validation.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use serde::{Deserialize, Serialize};

use super::CodecError;

enum Node {
    Leaf(char),
    Internal { left: usize, right: usize },
}

/// Mapping from symbol to its bit-string code.
///
/// Serializes as a JSON object of one-character keys, e.g. `{"a": "0", "b": "1"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeTable {
    codes: BTreeMap<char, String>,
}

impl CodeTable {
    /// Wrap codes received from a client. Not validated; see [`CodeTable::validate`].
    pub fn from_codes(codes: BTreeMap<char, String>) -> Self {
        Self { codes }
    }

    /// Build the Huffman code table for `input`.
    ///
    /// Leaves enter the queue in first-occurrence order and every node carries
    /// its arena index as a tie-breaker, so equal frequencies always merge in
    /// the same order. Codes are assigned with an explicit stack; a skewed
    /// tree is as deep as the alphabet is large.
    pub fn build(input: &str) -> Self {
        let mut order = Vec::new();
        let mut counts: HashMap<char, u64> = HashMap::new();
        for symbol in input.chars() {
            let count = counts.entry(symbol).or_insert_with(|| {
                order.push(symbol);
                0
            });
            *count += 1;
        }

        let mut nodes = Vec::with_capacity(order.len() * 2);
        let mut heap = BinaryHeap::with_capacity(order.len());
        for symbol in order {
            heap.push(Reverse((counts[&symbol], nodes.len())));
            nodes.push(Node::Leaf(symbol));
        }

        while heap.len() > 1 {
            let (Some(Reverse((left_freq, left))), Some(Reverse((right_freq, right)))) =
                (heap.pop(), heap.pop())
            else {
                break;
            };
            heap.push(Reverse((left_freq + right_freq, nodes.len())));
            nodes.push(Node::Internal { left, right });
        }

        let Some(Reverse((_, root))) = heap.pop() else {
            return Self::default();
        };

        let mut codes = BTreeMap::new();
        let mut stack = vec![(root, String::new())];
        while let Some((index, prefix)) = stack.pop() {
            match nodes[index] {
                Node::Leaf(symbol) => {
                    // Lone symbol: the root is a leaf, give it one bit.
                    let code = if prefix.is_empty() {
                        "0".to_string()
                    } else {
                        prefix
                    };
                    codes.insert(symbol, code);
                }
                Node::Internal { left, right } => {
                    let mut right_code = prefix.clone();
                    right_code.push('1');
                    stack.push((right, right_code));

                    let mut left_code = prefix;
                    left_code.push('0');
                    stack.push((left, left_code));
                }
            }
        }

        Self { codes }
    }

    pub fn get(&self, symbol: char) -> Option<&str> {
        self.codes.get(&symbol).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (char, &str)> {
        self.codes.iter().map(|(s, c)| (*s, c.as_str()))
    }

    pub fn max_code_len(&self) -> usize {
        self.codes.values().map(String::len).max().unwrap_or(0)
    }

    /// Check every code is a non-empty bit string, unique, and that no code
    /// is a prefix of another.
    pub fn validate(&self) -> Result<(), CodecError> {
        for (&symbol, code) in &self.codes {
            if code.is_empty() || !code.bytes().all(|b| b == b'0' || b == b'1') {
                return Err(CodecError::InvalidCode {
                    symbol,
                    code: code.clone(),
                });
            }
        }

        // After sorting, a code that prefixes others sorts directly before them.
        let mut sorted: Vec<&str> = self.codes.values().map(String::as_str).collect();
        sorted.sort_unstable();
        for pair in sorted.windows(2) {
            let (shorter, longer) = (pair[0], pair[1]);
            if shorter == longer {
                return Err(CodecError::DuplicateCode(shorter.to_string()));
            }
            if longer.starts_with(shorter) {
                return Err(CodecError::NotPrefixFree {
                    prefix: shorter.to_string(),
                    code: longer.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Code → symbol lookup used by the decoder.
    pub(crate) fn inverted(&self) -> HashMap<&str, char> {
        self.codes.iter().map(|(s, c)| (c.as_str(), *s)).collect()
    }
}
