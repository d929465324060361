use crate::error::InvalidRegexSnafu;
use crate::{Result, TokenInt};
use snafu::ResultExt;
use std::time::Instant;
use strum::{EnumCount, EnumIter, EnumString, EnumVariantNames};
use tracing::*;

mod byte_level;
mod data;
mod registry;
mod table;
mod vocab;

pub use data::{parse_legacy, parse_tiktoken, AssetProvider, EmbeddedAssets, StaticAssets};
pub use registry::ProfileRegistry;
pub(crate) use table::HashMap;
pub use table::{TokenDecoder, TokenEncoder};
pub use vocab::Vocabulary;

use data::VocabularySource;

/// The tokenizer encoding to use to tokenize text.
///
/// Each of these uses a BPE subword tokenizing approach, but with different sets of
/// tokens and corresponding ranks, and with a different regex for breaking up text into
/// approximate word boundaries.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Hash,
    EnumString,
    EnumIter,
    EnumCount,
    EnumVariantNames,
    strum::Display,
    strum::IntoStaticStr,
)]
pub enum EncodingType {
    #[strum(serialize = "gpt2")]
    Gpt2,
    #[strum(serialize = "r50k_base")]
    R50kBase,
    #[strum(serialize = "p50k_base")]
    P50kBase,
    #[strum(serialize = "p50k_edit")]
    P50kEdit,
    #[strum(serialize = "cl100k_base")]
    Cl100kBase,
    #[strum(serialize = "o200k_base")]
    O200kBase,
}

// The following was adapted from the python `openai_public.py` from the `tiktoken` source
pub const ENDOFTEXT: &str = "<|endoftext|>";
pub const FIM_PREFIX: &str = "<|fim_prefix|>";
pub const FIM_MIDDLE: &str = "<|fim_middle|>";
pub const FIM_SUFFIX: &str = "<|fim_suffix|>";
pub const ENDOFPROMPT: &str = "<|endofprompt|>";

/// Word splitting regex shared by GPT-2 and the GPT-3 era encodings
const R50K_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

const CL100K_PATTERN: &str = r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";

const O200K_PATTERN: &str = concat!(
    r"[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]*[\p{Ll}\p{Lm}\p{Lo}\p{M}]+(?i:'s|'t|'re|'ve|'m|'ll|'d)?",
    r"|[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]+[\p{Ll}\p{Lm}\p{Lo}\p{M}]*(?i:'s|'t|'re|'ve|'m|'ll|'d)?",
    r"|\p{N}{1,3}",
    r"| ?[^\s\p{L}\p{N}]+[\r\n/]*",
    r"|\s*[\r\n]+",
    r"|\s+(?!\S)",
    r"|\s+",
);

/// Everything needed to build the profile of one encoding type
struct ProfileSource {
    vocabulary: VocabularySource,
    special_tokens: &'static [(&'static str, TokenInt)],
    pattern: &'static str,

    /// Whether `pattern` ends a whitespace chunk after the last newline in it (`\s*[\r\n]+`)
    newline_chunks: bool,
}

impl EncodingType {
    /// The name of this encoding, as used by `tiktoken`
    pub fn name(&self) -> &'static str {
        self.into()
    }

    fn source(&self) -> ProfileSource {
        const P50K: VocabularySource = VocabularySource::Tiktoken("p50k_base.tiktoken");

        match self {
            EncodingType::Gpt2 => ProfileSource {
                vocabulary: VocabularySource::Legacy {
                    encoder: "gpt2/encoder.json",
                    merges: "gpt2/vocab.bpe",
                },
                special_tokens: &[(ENDOFTEXT, 50256)],
                pattern: R50K_PATTERN,
                newline_chunks: false,
            },
            EncodingType::R50kBase => ProfileSource {
                vocabulary: VocabularySource::Tiktoken("r50k_base.tiktoken"),
                special_tokens: &[(ENDOFTEXT, 50256)],
                pattern: R50K_PATTERN,
                newline_chunks: false,
            },
            EncodingType::P50kBase => ProfileSource {
                vocabulary: P50K,
                special_tokens: &[(ENDOFTEXT, 50256)],
                pattern: R50K_PATTERN,
                newline_chunks: false,
            },
            // p50k_edit and p50k_base share the same tokens
            EncodingType::P50kEdit => ProfileSource {
                vocabulary: P50K,
                special_tokens: &[
                    (ENDOFTEXT, 50256),
                    (FIM_PREFIX, 50281),
                    (FIM_MIDDLE, 50282),
                    (FIM_SUFFIX, 50283),
                ],
                pattern: R50K_PATTERN,
                newline_chunks: false,
            },
            EncodingType::Cl100kBase => ProfileSource {
                vocabulary: VocabularySource::Tiktoken("cl100k_base.tiktoken"),
                special_tokens: &[
                    (ENDOFTEXT, 100257),
                    (FIM_PREFIX, 100258),
                    (FIM_MIDDLE, 100259),
                    (FIM_SUFFIX, 100260),
                    (ENDOFPROMPT, 100276),
                ],
                pattern: CL100K_PATTERN,
                newline_chunks: true,
            },
            EncodingType::O200kBase => ProfileSource {
                vocabulary: VocabularySource::Tiktoken("o200k_base.tiktoken"),
                special_tokens: &[(ENDOFTEXT, 199999), (ENDOFPROMPT, 200018)],
                pattern: O200K_PATTERN,
                newline_chunks: true,
            },
        }
    }
}

/// The description of a particular BPE encoding scheme.
///
/// Profiles are immutable once built, so one instance is shared (behind an `Arc`) by every
/// tokenizer using that encoding, across threads.  Build them through a [`ProfileRegistry`].
pub struct EncodingProfile {
    pub(crate) typ: EncodingType,

    /// Merge ranks and token ids of the ordinary tokens
    pub(crate) vocab: Vocabulary,

    /// Mapping of integer token ids back to byte sequences
    pub(crate) decode: TokenDecoder,

    /// Like [`Self::vocab`] but for "special" tokens.
    ///
    /// These should not be present in `vocab`
    pub(crate) special_tokens_encode: TokenEncoder,

    /// Like [`Self::decode`] but for "special" tokens.
    pub(crate) special_tokens_decode: TokenDecoder,

    /// Regex used to break up text into approximate word boundaries
    ///
    /// Regrettably, the word separator regexes used by many OpenAI models' tokenizers use "fancy"
    /// features like lookahead that are not available in the regular rust `regex` crate.  So this
    /// slower 'fancy' impl is needed
    pub(crate) regex: fancy_regex::Regex,

    /// Whether [`Self::regex`] splits whitespace runs after their last newline.  Used to split
    /// whitespace runs too long for the regex to match.
    pub(crate) newline_chunks: bool,

    /// A/C automaton for finding special tokens in text.
    ///
    /// Leftmost-longest, so that if one special token were a prefix of another the longer one
    /// wins at a given position.
    pub(crate) special_tokens_finder: aho_corasick::AhoCorasick,

    /// The mean length of a token in bytes.
    ///
    /// This is used when we need to estimate how many tokens are likely to be in a string.
    pub(crate) mean_token_len: usize,
}

impl EncodingProfile {
    /// Load the vocabulary for `typ` from `assets` and build its profile.
    ///
    /// This is relatively expensive (hundreds of thousands of table entries are parsed and hashed)
    /// so it's done at most once per registry; see [`ProfileRegistry::load`].
    pub(crate) fn build(typ: EncodingType, assets: &dyn AssetProvider) -> Result<Self> {
        let started = Instant::now();
        let source = typ.source();

        let vocab = data::load_vocabulary(assets, source.vocabulary)?;
        vocab.validate(typ.name())?;

        let profile = Self::new(
            typ,
            vocab,
            source.special_tokens.iter().copied(),
            source.pattern,
            source.newline_chunks,
        )?;

        debug!(
            encoding = %typ,
            tokens = profile.vocab.len(),
            special_tokens = profile.special_tokens_encode.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Built encoding profile"
        );

        Ok(profile)
    }

    fn new<'a>(
        typ: EncodingType,
        vocab: Vocabulary,
        special_tokens: impl Iterator<Item = (&'a str, TokenInt)>,
        pattern: &str,
        newline_chunks: bool,
    ) -> Result<Self> {
        let regex = fancy_regex::Regex::new(pattern).context(InvalidRegexSnafu {
            encoding: typ.name(),
        })?;

        let decoder = vocab.decoder();
        let mean_token_len = vocab.mean_token_len();

        let special_token_encoder =
            TokenEncoder::new(special_tokens.map(|(s, id)| (s.as_bytes().to_vec(), id)));
        let special_token_decoder = TokenDecoder::from(&special_token_encoder);

        // Make an aho-corasick automaton that quickly finds any of the special tokens in text.
        // This is faster than a regex alternation of the same literals
        let special_tokens_finder = aho_corasick::AhoCorasickBuilder::new()
            .match_kind(aho_corasick::MatchKind::LeftmostLongest)
            .dfa(true) // This benchmarks slightly faster than the default NFA
            .build(special_token_encoder.byte_strings());

        Ok(Self {
            typ,
            vocab,
            decode: decoder,
            special_tokens_encode: special_token_encoder,
            special_tokens_decode: special_token_decoder,
            regex,
            newline_chunks,
            special_tokens_finder,
            mean_token_len,
        })
    }

    /// Which encoding this is
    pub fn encoding_type(&self) -> EncodingType {
        self.typ
    }

    /// The encoding's name, e.g. `cl100k_base`
    pub fn name(&self) -> &'static str {
        self.typ.name()
    }

    /// The ordinary vocabulary
    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    /// The word splitting regex pattern
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// The reserved id of the special token `literal`, if it is one
    pub fn special_token(&self, literal: &str) -> Option<TokenInt> {
        self.special_tokens_encode.get(literal.as_bytes())
    }

    /// The byte sequence for `token`, whether it's an ordinary or a special token
    pub fn token_bytes(&self, token: TokenInt) -> Option<&[u8]> {
        self.decode
            .get(token)
            .or_else(|| self.special_tokens_decode.get(token))
    }

    /// Make an educated guess as to the number of likely tokens in a given bit of text.
    pub fn estimate_num_tokens(&self, text: &str) -> usize {
        // Use a dumb strategy: we know the mean length of a token in this encoding, and assume the
        // text is full of the mean tokens.
        (text.len() + self.mean_token_len - 1) / self.mean_token_len
    }
}

impl std::fmt::Debug for EncodingProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodingProfile")
            .field("typ", &self.typ)
            .field("tokens", &self.vocab.len())
            .field("special_tokens", &self.special_tokens_encode.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn names_round_trip() {
        for typ in EncodingType::iter() {
            assert_eq!(EncodingType::from_str(typ.name()).unwrap(), typ);
        }
        assert!(EncodingType::from_str("cl200k_base").is_err());
    }

    #[test]
    fn every_encoding_builds() {
        crate::test_helpers::init_test_logging();

        for typ in EncodingType::iter() {
            println!("Loading encoder {typ}");
            let profile = EncodingProfile::build(typ, &EmbeddedAssets).unwrap();
            assert_eq!(profile.encoding_type(), typ);
            assert!(profile.special_token(ENDOFTEXT).is_some());
            assert!(profile.mean_token_len >= 1);
        }
    }

    #[test]
    fn special_tokens_are_not_ordinary_tokens() {
        let profile = EncodingProfile::build(EncodingType::Cl100kBase, &EmbeddedAssets).unwrap();

        assert_eq!(profile.special_token(FIM_MIDDLE), Some(100259));
        assert_eq!(profile.vocab.id(FIM_MIDDLE.as_bytes()), None);
        assert_eq!(profile.token_bytes(100276), Some(ENDOFPROMPT.as_bytes()));
        assert_eq!(profile.token_bytes(1917), Some(&b" world"[..]));
        assert_eq!(profile.token_bytes(100_000_000), None);
    }

    #[test]
    fn invalid_vocabulary_fails_to_build() {
        // A single token isn't enough: every byte must be encodable
        let assets = StaticAssets::new().with("r50k_base.tiktoken", "SGVsbG8= 0\n");

        assert!(matches!(
            EncodingProfile::build(EncodingType::R50kBase, &assets),
            Err(crate::TokenkitError::IncompleteByteVocabulary { byte: 0, .. })
        ));
    }
}
