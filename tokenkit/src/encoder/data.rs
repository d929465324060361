//! tokenkit embeds the vocabulary files (also called "mergeable ranks" in the tiktoken code) into
//! the Rust binary in release builds.  In debug builds the files are simply loaded from the local
//! filesystem for a faster experience while iteratively developing.
//!
//! Where the bytes come from is abstracted behind [`AssetProvider`], so callers (and tests) can
//! supply their own vocabulary data under the same asset names.
//!
//! Two file formats are understood:
//!
//! - The compact `.tiktoken` format: one `<base64 bytes> <rank>` pair per line.
//! - The legacy GPT-2 format: `encoder.json`, a JSON object mapping byte-level-unicode token
//!   strings to ids, plus `vocab.bpe`, a `#version` header followed by one `left right` merge per
//!   line in priority order.
use super::byte_level;
use super::table::{HashMap, TokenEncoder};
use super::vocab::Vocabulary;
use crate::error::*;
use crate::{Result, TokenInt, TokenString};
use base64::{engine::general_purpose, Engine as _};
use rust_embed::RustEmbed;
use snafu::{OptionExt, ResultExt};
use std::borrow::Cow;
use tracing::*;

/// Resolves an asset name like `cl100k_base.tiktoken` or `gpt2/vocab.bpe` to its contents.
pub trait AssetProvider: Send + Sync {
    /// The raw contents of the named asset, or `None` if this provider doesn't have it.
    fn load(&self, name: &str) -> Option<Cow<'_, [u8]>>;
}

#[derive(RustEmbed)]
#[folder = "tokens/"]
struct Tokens;

/// The vocabulary files bundled with this crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmbeddedAssets;

impl AssetProvider for EmbeddedAssets {
    fn load(&self, name: &str) -> Option<Cow<'_, [u8]>> {
        Tokens::get(name).map(|file| file.data)
    }
}

/// Assets held in memory, keyed by name.
///
/// Useful for tests, or for programs that ship their own copy of a vocabulary.
#[derive(Clone, Debug, Default)]
pub struct StaticAssets(HashMap<String, Vec<u8>>);

impl StaticAssets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the asset `name`
    pub fn with(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.0.insert(name.into(), data.into());
        self
    }
}

impl AssetProvider for StaticAssets {
    fn load(&self, name: &str) -> Option<Cow<'_, [u8]>> {
        self.0.get(name).map(|data| Cow::Borrowed(data.as_slice()))
    }
}

/// Where the vocabulary of an encoding comes from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum VocabularySource {
    Tiktoken(&'static str),
    Legacy {
        encoder: &'static str,
        merges: &'static str,
    },
}

/// Load and parse the vocabulary described by `source`.
pub(crate) fn load_vocabulary(
    provider: &dyn AssetProvider,
    source: VocabularySource,
) -> Result<Vocabulary> {
    match source {
        VocabularySource::Tiktoken(name) => {
            let data = load_asset(provider, name)?;
            Ok(Vocabulary::new(parse_tiktoken(name, &data)?))
        }
        VocabularySource::Legacy { encoder, merges } => {
            let encoder_data = load_asset(provider, encoder)?;
            let merges_data = load_asset(provider, merges)?;
            parse_legacy(encoder, &encoder_data, merges, &merges_data)
        }
    }
}

fn load_asset<'a>(provider: &'a dyn AssetProvider, name: &str) -> Result<Cow<'a, [u8]>> {
    provider.load(name).context(MissingAssetSnafu { name })
}

/// Lines of a vocabulary file with their 1-based line numbers.  Blank lines are skipped and a
/// trailing `\r` is ignored.
fn numbered_lines(data: &[u8]) -> impl Iterator<Item = (usize, &[u8])> {
    data.split(|&b| b == b'\n')
        .enumerate()
        .map(|(index, line)| (index + 1, line.strip_suffix(b"\r").unwrap_or(line)))
        .filter(|(_, line)| !line.is_empty())
}

/// Parse the compact `.tiktoken` format into a table of byte sequences and their ranks.
pub fn parse_tiktoken(name: &str, data: &[u8]) -> Result<TokenEncoder> {
    let mut tokens = Vec::new();

    for (line, text) in numbered_lines(data) {
        // Each line is of the form "<base64 string> <rank>"
        let split = text
            .iter()
            .position(|&b| b == b' ')
            .context(MalformedLineSnafu {
                name,
                line,
                reason: "expected `<base64 token> <rank>`",
            })?;
        let (bytes, rank) = (&text[..split], &text[split + 1..]);

        let bytes = general_purpose::STANDARD
            .decode(bytes)
            .context(InvalidBase64Snafu { name, line })?;
        let rank = parse_rank(name, line, rank)?;

        tokens.push((bytes, rank));
    }

    Ok(TokenEncoder::new(tokens))
}

fn parse_rank(name: &str, line: usize, rank: &[u8]) -> Result<TokenInt> {
    let rank = String::from_utf8_lossy(rank);
    rank.trim().parse::<TokenInt>().context(InvalidRankSnafu {
        name,
        line,
        rank: &*rank,
    })
}

/// Parse the legacy GPT-2 pair of files into a vocabulary with separate ranks and ids.
///
/// The merge on line `n` of `vocab.bpe` (not counting the header) gets rank `256 + n`, and single
/// bytes get their byte value as rank, so the two never collide.  Ids are whatever `encoder.json`
/// says.
pub fn parse_legacy(
    encoder_name: &str,
    encoder_data: &[u8],
    merges_name: &str,
    merges_data: &[u8],
) -> Result<Vocabulary> {
    let raw_ids: HashMap<String, TokenInt> =
        serde_json::from_slice(encoder_data).context(InvalidJsonSnafu { name: encoder_name })?;

    let mut ids = Vec::with_capacity(raw_ids.len());
    for (token, id) in raw_ids {
        let bytes = byte_level::decode_token(&token).context(InvalidMergeTokenSnafu {
            name: encoder_name,
            token: token.as_str(),
        })?;
        ids.push((bytes, id));
    }

    let mut ranks: HashMap<TokenString, TokenInt> = (0..=u8::MAX)
        .map(|byte| (vec![byte], byte as TokenInt))
        .collect();
    let mut merges = 0usize;
    let mut duplicates = 0usize;

    for (line, text) in numbered_lines(merges_data) {
        // The first line is a `#version: ...` header
        if line == 1 && text.starts_with(b"#") {
            continue;
        }

        let text = std::str::from_utf8(text).ok().context(MalformedLineSnafu {
            name: merges_name,
            line,
            reason: "not valid UTF-8",
        })?;
        let (left, right) = text
            .split_once(' ')
            .filter(|(left, right)| !left.is_empty() && !right.is_empty() && !right.contains(' '))
            .context(MalformedLineSnafu {
                name: merges_name,
                line,
                reason: "expected `<left> <right>`",
            })?;

        let mut merged = decode_merge_token(merges_name, left)?;
        merged.extend(decode_merge_token(merges_name, right)?);

        // The first (lowest ranked) occurrence of a merge result wins
        if ranks.contains_key(&merged) {
            duplicates += 1;
        } else {
            ranks.insert(merged, 256 + merges);
        }
        merges += 1;
    }

    if duplicates > 0 {
        warn!(
            asset = merges_name,
            duplicates, "Merge list produces some byte sequences more than once"
        );
    }
    debug!(asset = merges_name, merges, "Loaded legacy merge list");

    Ok(Vocabulary::with_ids(
        TokenEncoder::new(ranks),
        TokenEncoder::new(ids),
    ))
}

fn decode_merge_token(name: &str, token: &str) -> Result<TokenString> {
    byte_level::decode_token(token).context(InvalidMergeTokenSnafu { name, token })
}
