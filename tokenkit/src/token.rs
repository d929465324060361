/// A token output by the tokenizer, in its integer form.
///
/// For vocabularies in the compact `.tiktoken` format this is also the merge rank of the token.
/// The legacy GPT-2 vocabulary keeps the two apart: the id comes from `encoder.json` while the
/// merge priority comes from the line order of `vocab.bpe`.
///
/// Ordinary tokens and special tokens share this one id space.
pub type TokenInt = usize;

/// A token in its byte string form.
///
/// Lookup tables are keyed by the owned bytes, so two equal byte strings always find the same
/// entry no matter where they were allocated.
pub type TokenString = Vec<u8>;
