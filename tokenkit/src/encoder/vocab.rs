//! The ordinary (non-special) vocabulary of an encoding: merge ranks and emitted token ids.
use super::table::{TokenDecoder, TokenEncoder};
use crate::error::{IncompleteByteVocabularySnafu, MergeWithoutIdSnafu};
use crate::{Result, TokenInt};
use snafu::ensure;

/// The byte sequences known to an encoding, with the rank that drives merge order and the id that
/// is emitted for each.
///
/// Vocabularies loaded from `.tiktoken` files use one table for both, since the rank of a token is
/// its id.  The legacy GPT-2 files describe merges separately from ids, so in that case `ranks`
/// holds its own table.
#[derive(Clone, Debug)]
pub struct Vocabulary {
    ids: TokenEncoder,
    ranks: Option<TokenEncoder>,
}

impl Vocabulary {
    /// A vocabulary whose merge ranks are also its token ids.
    pub fn new(ranks: TokenEncoder) -> Self {
        Self { ids: ranks, ranks: None }
    }

    /// A vocabulary with a merge priority table distinct from the emitted token ids.
    pub fn with_ids(ranks: TokenEncoder, ids: TokenEncoder) -> Self {
        Self {
            ids,
            ranks: Some(ranks),
        }
    }

    /// The merge rank of `bytes`, if that byte sequence can be produced by a merge.
    #[inline]
    pub fn rank(&self, bytes: &[u8]) -> Option<usize> {
        self.ranks.as_ref().unwrap_or(&self.ids).get(bytes)
    }

    /// The token id emitted for `bytes`, if it is a token.
    #[inline]
    pub fn id(&self, bytes: &[u8]) -> Option<TokenInt> {
        self.ids.get(bytes)
    }

    /// The table of byte sequences and the ids they are emitted as
    pub fn ids(&self) -> &TokenEncoder {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub(crate) fn decoder(&self) -> TokenDecoder {
        TokenDecoder::from(&self.ids)
    }

    /// The mean length of a token in bytes, never less than 1.
    pub(crate) fn mean_token_len(&self) -> usize {
        if self.ids.is_empty() {
            return 1;
        }

        let total = self
            .ids
            .byte_strings()
            .map(|bytes| bytes.len() as u64)
            .sum::<u64>();

        ((total / self.ids.len() as u64) as usize).max(1)
    }

    /// Check the invariants the merge engine relies on:
    ///
    /// - Every possible byte value is a token, so any input can be encoded.
    /// - Every byte sequence a merge can produce has an id, so every merge result can be emitted.
    pub(crate) fn validate(&self, encoding: &str) -> Result<()> {
        for byte in 0..=u8::MAX {
            ensure!(
                self.id(&[byte]).is_some() && self.rank(&[byte]).is_some(),
                IncompleteByteVocabularySnafu { encoding, byte }
            );
        }

        if let Some(ranks) = &self.ranks {
            if let Some(orphan) = ranks
                .byte_strings()
                .find(|bytes| self.ids.get(bytes).is_none())
            {
                return MergeWithoutIdSnafu {
                    encoding,
                    token: lossy(orphan),
                }
                .fail();
            }
        }

        Ok(())
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
