//! GPT-2's `encoder.json` and `vocab.bpe` don't store raw bytes.  Each byte is written as a
//! printable unicode character so that the files are readable text: the printable ASCII and
//! Latin-1 bytes stand for themselves, and the remaining 68 bytes (control characters, space,
//! DEL, NBSP and the soft hyphen) are shifted up to U+0100 onwards, in byte order.  That's why
//! a leading space shows up as `Ġ` (U+0120) in those files.
//!
//! The loader undoes this mapping so the rest of the crate only ever sees raw bytes.
use crate::TokenString;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

static BYTE_TO_CHAR: Lazy<[char; 256]> = Lazy::new(|| {
    let printable = |b: u8| matches!(b, b'!'..=b'~' | 0xa1..=0xac | 0xae..=0xff);

    let mut table = ['\0'; 256];
    let mut shifted = 0u32;
    for byte in 0..=u8::MAX {
        table[byte as usize] = if printable(byte) {
            char::from(byte)
        } else {
            shifted += 1;
            // 256 + at most 68 is always a valid scalar value
            char::from_u32(255 + shifted).unwrap_or(char::REPLACEMENT_CHARACTER)
        };
    }
    table
});

static CHAR_TO_BYTE: Lazy<FxHashMap<char, u8>> = Lazy::new(|| {
    BYTE_TO_CHAR
        .iter()
        .enumerate()
        .map(|(byte, c)| (*c, byte as u8))
        .collect()
});

/// Convert a token as written in the GPT-2 vocabulary files into its raw bytes.
///
/// Returns `None` if the string contains a character that doesn't stand for any byte.
pub(crate) fn decode_token(token: &str) -> Option<TokenString> {
    token.chars().map(|c| CHAR_TO_BYTE.get(&c).copied()).collect()
}

/// Render raw bytes the way the GPT-2 vocabulary files write them.
#[cfg(test)]
pub(crate) fn encode_token(bytes: &[u8]) -> String {
    bytes.iter().map(|b| BYTE_TO_CHAR[*b as usize]).collect()
}
