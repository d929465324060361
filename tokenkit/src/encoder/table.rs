//! Lookup tables between the byte strings of tokens and their integers.
//!
//! Both directions are hashed with `rustc-hash`; keys are short and trusted, which is the case
//! `FxHash` is fast at.
use crate::token::{TokenInt, TokenString};

pub(crate) use rustc_hash::FxHashMap as HashMap;

/// Maps byte strings to the integer the vocabulary assigns them.  Depending on the table that
/// integer is a merge rank or an emitted token id.
///
/// Keys are owned byte strings compared by value.
#[derive(Clone, Debug, Default)]
pub struct TokenEncoder(HashMap<TokenString, TokenInt>);

impl TokenEncoder {
    pub fn new(items: impl IntoIterator<Item = (TokenString, TokenInt)>) -> Self {
        items.into_iter().collect()
    }

    #[inline]
    pub fn get(&self, bytes: &[u8]) -> Option<TokenInt> {
        self.0.get(bytes).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every byte string in the table with its integer, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], TokenInt)> {
        self.0.iter().map(|(bytes, int)| (bytes.as_slice(), *int))
    }

    /// Every byte string in the table, in no particular order
    pub fn byte_strings(&self) -> impl Iterator<Item = &[u8]> {
        self.0.keys().map(Vec::as_slice)
    }
}

impl FromIterator<(TokenString, TokenInt)> for TokenEncoder {
    fn from_iter<I: IntoIterator<Item = (TokenString, TokenInt)>>(items: I) -> Self {
        Self(items.into_iter().collect())
    }
}

/// Maps token integers back to their byte strings.
///
/// All of the byte strings are stored back to back in one buffer and each token maps to its span
/// of it, rather than every token owning an allocation.
#[derive(Clone, Debug, Default)]
pub struct TokenDecoder {
    bytes: Vec<u8>,
    spans: HashMap<TokenInt, (usize, usize)>,
}

impl TokenDecoder {
    #[inline]
    pub fn get(&self, token: TokenInt) -> Option<&[u8]> {
        self.spans
            .get(&token)
            .map(|&(start, end)| &self.bytes[start..end])
    }

    /// The length of the byte string of `token`, without decoding it
    pub fn byte_len(&self, token: TokenInt) -> Option<usize> {
        self.spans.get(&token).map(|(start, end)| end - start)
    }
}

impl From<&TokenEncoder> for TokenDecoder {
    fn from(encoder: &TokenEncoder) -> Self {
        let mut bytes = Vec::with_capacity(encoder.byte_strings().map(<[u8]>::len).sum());
        let mut spans = HashMap::with_capacity_and_hasher(encoder.len(), Default::default());

        for (token_bytes, token) in encoder.iter() {
            let start = bytes.len();
            bytes.extend_from_slice(token_bytes);
            spans.insert(token, (start, bytes.len()));
        }

        Self { bytes, spans }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_compare_bytes_by_value() {
        let encoder = TokenEncoder::new([(b"ab".to_vec(), 7), (b"c".to_vec(), 2)]);

        // A freshly allocated key must find the entry inserted from a different allocation
        let key = String::from("a") + "b";
        assert_eq!(encoder.get(key.as_bytes()), Some(7));
        assert_eq!(encoder.get(b"abc"), None);
        assert_eq!(encoder.get(b""), None);
    }

    #[test]
    fn decoder_reverses_encoder() {
        let encoder = TokenEncoder::new([
            (b"ab".to_vec(), 7),
            (b"c".to_vec(), 2),
            (b"hello".to_vec(), 1000),
        ]);
        let decoder = TokenDecoder::from(&encoder);

        for (bytes, token) in encoder.iter() {
            assert_eq!(decoder.get(token), Some(bytes));
            assert_eq!(decoder.byte_len(token), Some(bytes.len()));
        }
        assert_eq!(decoder.get(8), None);
        assert_eq!(decoder.byte_len(8), None);
    }
}
