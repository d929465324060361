//! Byte-level BPE tokenizer producing the same tokens as OpenAI's `tiktoken` for the GPT-2,
//! GPT-3, GPT-3.5/4 and GPT-4o family encodings.
//!
//! ```no_run
//! use tokenkit::{ProfileRegistry, Tokenizer};
//!
//! let registry = ProfileRegistry::embedded();
//! let tokenizer = Tokenizer::for_model(&registry, "gpt-4").unwrap();
//!
//! let tokens = tokenizer.encode_ordinary("hello world");
//! assert_eq!(tokens, vec![15339, 1917]);
//! assert_eq!(tokenizer.decode(&tokens).unwrap(), "hello world");
//! ```
use snafu::{OptionExt, ResultExt};
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;

mod bpe;
mod cache;
mod encoder;
mod error;
mod iterator;
mod model;
mod pretokenize;
mod token;

pub use bpe::*;
pub use cache::MergeCache;
pub use encoder::*;
pub use error::*;
pub use iterator::*;
pub use model::{context_window, encoding_for_model, known_models};
pub use pretokenize::{AllowedSpecial, Chunks, Segment, Segments};
pub use token::*;

pub type Result<T> = std::result::Result<T, TokenkitError>;

/// How [`Tokenizer::encode_with_options`] treats its input
#[derive(Clone, Copy, Debug, Default)]
pub struct EncodeOptions<'a> {
    /// Which special tokens are encoded as their reserved ids
    pub allowed_special: AllowedSpecial<'a>,

    /// Remove every carriage return from the text before encoding it, so that text with Windows
    /// line endings encodes the same as text with Unix line endings
    pub clean_cr: bool,
}

/// An implementation of a specific text encoding used by OpenAI models.
///
/// With this tokenizer, it's possible to tokenize input text into numeric tokens, and to decode
/// numeric tokens back into the text they came from.
///
/// Instances of `Tokenizer` are light weight and can be very cheaply cloned.  They are also thread
/// safe; a single instance can be used to encode or decode text in multiple threads
/// simultaneously, although with Rust ownership rules it's usually more convenient to make a clone
/// of the tokenizer for each thread.  Clones share one merge cache.
#[derive(Clone)]
pub struct Tokenizer {
    profile: Arc<EncodingProfile>,
    cache: Arc<MergeCache>,
}

impl Tokenizer {
    /// Create a tokenizer for an already loaded profile, with a new empty merge cache.
    pub fn new(profile: Arc<EncodingProfile>) -> Self {
        Self {
            profile,
            cache: Arc::new(MergeCache::new()),
        }
    }

    /// Create a tokenizer for the encoding `typ`, loading it through `registry` if needed.
    pub fn for_encoding(registry: &ProfileRegistry, typ: EncodingType) -> Result<Self> {
        Ok(Self::new(registry.load(typ)?))
    }

    /// Create a tokenizer for the encoding named `name`, e.g. `cl100k_base`
    pub fn for_profile(registry: &ProfileRegistry, name: &str) -> Result<Self> {
        Ok(Self::new(registry.load_by_name(name)?))
    }

    /// Create a tokenizer for the encoding used by the OpenAI model `model`, e.g. `gpt-4`.
    ///
    /// See [`encoding_for_model`] for how model names are resolved.
    pub fn for_model(registry: &ProfileRegistry, model: &str) -> Result<Self> {
        Self::for_encoding(registry, encoding_for_model(model)?)
    }

    /// The encoding profile this tokenizer applies
    pub fn profile(&self) -> &EncodingProfile {
        &self.profile
    }

    /// The cache of merged chunks, shared with all clones of this tokenizer
    pub fn merge_cache(&self) -> &MergeCache {
        &self.cache
    }

    /// The special token strings and their corresponding integer ids, for this encoding
    pub fn special_tokens(&self) -> impl Iterator<Item = (&str, TokenInt)> {
        self.profile
            .special_tokens_encode
            .iter()
            .map(|(bytes, token)| {
                let literal = std::str::from_utf8(bytes)
                    .expect("BUG: special tokens are always built from strings");
                (literal, token)
            })
    }

    /// Search the given input text for "special" tokens, returning an iterator that yields all
    /// special tokens in the input text, whether or not they would be allowed when encoding.
    ///
    /// If you just need to know if there are any special tokens in the text, you can call
    /// [`Iterator::any`]
    pub fn find_special_tokens<'me, 'text>(
        &'me self,
        text: &'text str,
    ) -> impl Iterator<Item = &'text str> + 'text
    where
        'me: 'text,
    {
        self.profile
            .special_tokens_finder
            .find_iter(text)
            .map(move |m| &text[m.start()..m.end()])
    }

    /// Make an educated guess as to the number of likely tokens in a given bit of text.
    ///
    /// This is not a precise calculation, but it's a good enough estimate for most purposes.  For
    /// example if you want to pre-allocate a Vec to hold the tokens for a string, this is a good
    /// choice for the target capacity.  It might be slightly off but it's definitely better than no
    /// pre-allocation at all.
    pub fn estimate_num_tokens(&self, text: impl AsRef<str>) -> usize {
        self.profile.estimate_num_tokens(text.as_ref())
    }

    /// Lazily encode `text`, recognizing the special tokens in `allowed_special`.
    pub fn encode_iter<'a>(
        &'a self,
        text: &'a str,
        allowed_special: AllowedSpecial<'a>,
    ) -> EncodeIterator<'a> {
        EncodeIterator::new(&self.profile, &self.cache, text, allowed_special)
    }

    /// Encode the specified text into a sequence of tokens, including encoding those "special"
    /// tokens listed in `allowed_special` into their reserved ids.
    ///
    /// Special tokens that are present in `text` but not listed in `allowed_special` aren't an
    /// error; they're treated like any other text, and broken up into subword tokens.  If you want
    /// to detect text that contains special tokens, to avoid abuse of the model or potentially
    /// unwanted behavior, use [`Self::find_special_tokens`] to scan input for special tokens, and
    /// take whatever action you need if any are found.
    pub fn encode(&self, text: &str, allowed_special: &HashSet<&str>) -> Vec<TokenInt> {
        self.collect_tokens(text, AllowedSpecial::Only(allowed_special))
    }

    /// Encode the specified text into a sequence of tokens, without any special handling for
    /// "special" tokens.  If `text` contains any special tokens, they will not be encoded with the
    /// corresponding `TokenInt` values for special tokens.  Rather, they will be treated like any
    /// other text, and broken up into subword tokens.
    pub fn encode_ordinary(&self, text: &str) -> Vec<TokenInt> {
        self.collect_tokens(text, AllowedSpecial::None)
    }

    /// Encode the specified text into a sequence of tokens, encoding every special token of this
    /// encoding that appears in `text` into its reserved id.
    pub fn encode_with_special_tokens(&self, text: &str) -> Vec<TokenInt> {
        self.collect_tokens(text, AllowedSpecial::All)
    }

    /// Encode the specified text into a sequence of tokens as directed by `options`
    pub fn encode_with_options(&self, text: &str, options: &EncodeOptions<'_>) -> Vec<TokenInt> {
        if options.clean_cr && text.contains('\r') {
            let cleaned = text.replace('\r', "");
            self.collect_tokens(&cleaned, options.allowed_special)
        } else {
            self.collect_tokens(text, options.allowed_special)
        }
    }

    fn collect_tokens(&self, text: &str, allowed_special: AllowedSpecial<'_>) -> Vec<TokenInt> {
        let mut tokens = Vec::with_capacity(self.estimate_num_tokens(text));
        tokens.extend(self.encode_iter(text, allowed_special));
        tokens
    }

    /// Count the tokens in `text`, encoded without regard for special tokens.
    ///
    /// The result is always the length of [`Self::encode_ordinary`], but the tokens themselves
    /// are never collected.
    pub fn count_tokens(&self, text: &str) -> usize {
        self.encode_iter(text, AllowedSpecial::None).count()
    }

    /// Split the input text into two parts: a head of at most `max_tokens` tokens, and all of the
    /// rest (if there is any rest).
    ///
    /// Use this when you don't actually care about the tokens, but you need to keep the input text
    /// under an API-defined token limit.
    ///
    /// The split happens at a token boundary of the ordinary encoding of `text`, moved back as
    /// needed so that both parts are valid strings and the head on its own encodes to no more than
    /// `max_tokens` tokens.  The head and the rest always concatenate back to `text`.
    pub fn truncate<'t>(&self, text: &'t str, max_tokens: usize) -> (&'t str, Option<&'t str>) {
        // Byte offset of the end of each of the first `max_tokens` tokens
        let mut ends = Vec::with_capacity(max_tokens.min(self.estimate_num_tokens(text)));
        let mut end = 0;
        for token in self.encode_iter(text, AllowedSpecial::None).take(max_tokens) {
            end += self
                .profile
                .decode
                .byte_len(token)
                .expect("BUG: encoding produced a token that can't be decoded");
            ends.push(end);
        }

        if end == text.len() {
            return (text, None);
        }

        // Re-encoding a prefix doesn't always produce a prefix of the tokens, since the chunking
        // regex sees a different end of text, so check the candidate and back off if needed
        for end in ends.into_iter().rev() {
            let mut split = end;
            while !text.is_char_boundary(split) {
                split -= 1;
            }

            let head = &text[..split];
            if self.count_tokens(head) <= max_tokens {
                return (head, Some(&text[split..]));
            }
        }

        ("", Some(text))
    }

    /// Decode a set of tokens into the string that they came from.
    ///
    /// Note that encoders can sometimes take a valid UTF-8 string as input, and break it down into
    /// subword tokens such that some of those tokens are not actually valid UTF-8 code points.
    /// Therefore, decoding to a string is a fallible operation.  As long as the input `tokens`
    /// came from a UTF-8 string, and the sequence of tokens has not been modified or truncated,
    /// then this will succeed.
    ///
    /// If you need more robust decoding, use [`Self::decode_bytes`] which will always succeed
    /// unless you pass tokens that are not used by the encoding which is performing the decoding.
    pub fn decode(&self, tokens: &[TokenInt]) -> Result<String> {
        let bytes = self.decode_bytes(tokens)?;

        String::from_utf8(bytes).context(InvalidUtf8Snafu)
    }

    /// Decode a set of tokens into the bytes that they came from.
    ///
    /// This is fallible only in case the tokens passed in to `tokens` came from a different
    /// encoding, and thus the integer representation doesn't correspond to an actual token byte
    /// sequence.
    pub fn decode_bytes(&self, tokens: &[TokenInt]) -> Result<TokenString> {
        let mut bytes = Vec::with_capacity(tokens.len() * self.profile.mean_token_len);

        for &token in tokens {
            let token_bytes = self
                .profile
                .token_bytes(token)
                .context(UnknownTokenSnafu { token })?;
            bytes.extend_from_slice(token_bytes);
        }

        Ok(bytes)
    }
}

impl Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("encoding", &self.profile.name())
            .field("cached_chunks", &self.cache.len())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use once_cell::sync::Lazy;

    static REGISTRY: Lazy<ProfileRegistry> = Lazy::new(ProfileRegistry::embedded);

    fn tokenizer(typ: EncodingType) -> Tokenizer {
        test_helpers::init_test_logging();
        Tokenizer::for_encoding(&REGISTRY, typ).unwrap()
    }

    #[test]
    fn constructors_agree() {
        let by_type = tokenizer(EncodingType::Cl100kBase);
        let by_name = Tokenizer::for_profile(&REGISTRY, "cl100k_base").unwrap();
        let by_model = Tokenizer::for_model(&REGISTRY, "gpt-4-0613").unwrap();

        for t in [&by_name, &by_model] {
            assert_eq!(t.profile().encoding_type(), EncodingType::Cl100kBase);
            assert_eq!(t.encode_ordinary("hello world"), by_type.encode_ordinary("hello world"));
        }

        assert_matches!(
            Tokenizer::for_model(&REGISTRY, "not-a-real-model"),
            Err(TokenkitError::UnknownModel { .. })
        );
        assert_matches!(
            Tokenizer::for_profile(&REGISTRY, "cl200k_base"),
            Err(TokenkitError::UnknownEncoding { .. })
        );
    }

    #[test]
    fn clones_share_the_merge_cache() {
        let tokenizer = tokenizer(EncodingType::R50kBase);
        let clone = tokenizer.clone();
        tokenizer.merge_cache().clear();

        // "<|" isn't a token, so it has to be merged
        tokenizer.encode_ordinary("<|");
        assert!(!clone.merge_cache().is_empty());
        assert_eq!(clone.merge_cache().len(), tokenizer.merge_cache().len());
    }

    #[test]
    fn decode_errors() {
        let tokenizer = tokenizer(EncodingType::Cl100kBase);

        assert_matches!(
            tokenizer.decode(&[15339, 999_999_999]),
            Err(TokenkitError::UnknownToken { token: 999_999_999 })
        );

        // "é" is two bytes, each of which is a token on its own
        let e_acute = "é".as_bytes();
        let tokens = e_acute
            .iter()
            .map(|b| tokenizer.profile().vocabulary().id(&[*b]).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(tokenizer.decode(&tokens).unwrap(), "é");
        assert_matches!(
            tokenizer.decode(&tokens[..1]),
            Err(TokenkitError::InvalidUtf8 { .. })
        );
        assert_eq!(tokenizer.decode_bytes(&tokens[..1]).unwrap(), &e_acute[..1]);
    }

    #[test]
    fn special_tokens_listed() {
        let tokenizer = tokenizer(EncodingType::P50kEdit);
        let mut specials = tokenizer.special_tokens().collect::<Vec<_>>();
        specials.sort_by_key(|(_, token)| *token);

        assert_eq!(
            specials,
            vec![
                (ENDOFTEXT, 50256),
                (FIM_PREFIX, 50281),
                (FIM_MIDDLE, 50282),
                (FIM_SUFFIX, 50283)
            ]
        );
    }

    #[test]
    fn find_special_tokens_ignores_allowed_set() {
        let tokenizer = tokenizer(EncodingType::Cl100kBase);
        let text = format!("a{ENDOFPROMPT} b {ENDOFTEXT}");

        assert_eq!(
            tokenizer.find_special_tokens(&text).collect::<Vec<_>>(),
            vec![ENDOFPROMPT, ENDOFTEXT]
        );
        assert!(!tokenizer.find_special_tokens("no specials").any(|_| true));
    }

    #[test]
    fn clean_cr() {
        let tokenizer = tokenizer(EncodingType::Gpt2);
        let options = EncodeOptions {
            clean_cr: true,
            ..Default::default()
        };

        assert_eq!(
            tokenizer.encode_with_options("Hello, world!\r\n", &options),
            vec![15496, 11, 995, 0, 198]
        );
        assert_eq!(
            tokenizer.encode_with_options("Hello, world!\r\n", &EncodeOptions::default()),
            tokenizer.encode_ordinary("Hello, world!\r\n")
        );
    }

    #[test]
    fn truncate_at_token_boundary() {
        let tokenizer = tokenizer(EncodingType::Gpt2);

        assert_eq!(
            tokenizer.truncate("Hello, world!", 2),
            ("Hello,", Some(" world!"))
        );
        assert_eq!(tokenizer.truncate("Hello, world!", 4), ("Hello, world!", None));
        assert_eq!(tokenizer.truncate("Hello, world!", 100), ("Hello, world!", None));
        assert_eq!(tokenizer.truncate("Hello, world!", 0), ("", Some("Hello, world!")));
        assert_eq!(tokenizer.truncate("", 0), ("", None));
    }

    #[test]
    fn truncate_never_splits_a_character() {
        let tokenizer = tokenizer(EncodingType::Cl100kBase);
        let text = "日本語のテキスト";

        for max_tokens in 0..=tokenizer.count_tokens(text) {
            let (head, tail) = tokenizer.truncate(text, max_tokens);
            assert!(tokenizer.count_tokens(head) <= max_tokens);
            assert_eq!(format!("{head}{}", tail.unwrap_or_default()), text);
        }
    }

    #[test]
    fn estimate_is_reasonable() {
        let tokenizer = tokenizer(EncodingType::Cl100kBase);
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(20);

        let estimate = tokenizer.estimate_num_tokens(&text);
        let actual = tokenizer.count_tokens(&text);
        assert!(estimate > actual / 4 && estimate < actual * 4, "{estimate} vs {actual}");
    }
}
