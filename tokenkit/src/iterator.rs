//! Contains the implementation of the bulk of the tokenization logic, implemented as a Rust
//! [`Iterator`].

use crate::cache::MergeCache;
use crate::encoder::EncodingProfile;
use crate::pretokenize::{AllowedSpecial, Chunks, Segment, Segments};
use crate::{bpe, TokenInt};
use std::sync::Arc;

/// The tokens of one chunk of text
enum ChunkTokens {
    /// The whole chunk is a token
    Single(TokenInt),

    /// The chunk had to be broken up into subword tokens
    Merged(Arc<[TokenInt]>),
}

impl ChunkTokens {
    fn len(&self) -> usize {
        match self {
            ChunkTokens::Single(_) => 1,
            ChunkTokens::Merged(tokens) => tokens.len(),
        }
    }
}

/// Encode one chunk.  Either it is itself a token, in which case we're done, or it's not and we
/// need to break the chunk up into subword tokens with the BPE algorithm (or find the result of
/// doing that earlier in the cache).
fn encode_chunk(profile: &EncodingProfile, cache: &MergeCache, chunk: &str) -> ChunkTokens {
    let bytes = chunk.as_bytes();
    if let Some(token) = profile.vocab.id(bytes) {
        ChunkTokens::Single(token)
    } else {
        ChunkTokens::Merged(
            cache.get_or_compute(bytes, || bpe::byte_pair_encode(bytes, &profile.vocab)),
        )
    }
}

/// The iterator which yields the tokens of a string of text, recognizing whichever special
/// tokens are allowed.
///
/// See [`crate::Tokenizer::encode_iter`]
pub struct EncodeIterator<'a> {
    profile: &'a EncodingProfile,
    cache: &'a MergeCache,
    text: &'a str,

    segments: Segments<'a>,

    /// Chunks of the ordinary segment currently being encoded
    chunks: Option<Chunks<'a>>,

    /// Tokens of the current chunk, if the chunk itself didn't map directly to a token, and the
    /// index of the next one to yield
    merged: Option<(Arc<[TokenInt]>, usize)>,
}

impl<'a> EncodeIterator<'a> {
    pub(crate) fn new(
        profile: &'a EncodingProfile,
        cache: &'a MergeCache,
        text: &'a str,
        allowed: AllowedSpecial<'a>,
    ) -> Self {
        Self {
            profile,
            cache,
            text,
            segments: Segments::new(profile, text, allowed),
            chunks: None,
            merged: None,
        }
    }
}

impl<'a> Iterator for EncodeIterator<'a> {
    type Item = TokenInt;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // If there are still tokens left from a previously encoded chunk, use one of them
            if let Some((tokens, next)) = &mut self.merged {
                if let Some(token) = tokens.get(*next) {
                    *next += 1;
                    return Some(*token);
                }
                self.merged = None;
            }

            if let Some(chunk) = self.chunks.as_mut().and_then(Iterator::next) {
                match encode_chunk(self.profile, self.cache, chunk) {
                    ChunkTokens::Single(token) => return Some(token),
                    ChunkTokens::Merged(tokens) => {
                        self.merged = Some((tokens, 0));
                        continue;
                    }
                }
            }

            // The current segment is exhausted; move on to the next one, if any
            match self.segments.next()? {
                Segment::Special { token, .. } => {
                    self.chunks = None;
                    return Some(token);
                }
                Segment::Ordinary(text) => {
                    self.chunks = Some(Chunks::new(self.profile, text));
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        // Every token is at least one byte long.  Use [`EncodingProfile::estimate_num_tokens`]
        // for a more realistic guess.
        (0, Some(self.text.len()))
    }

    /// Count the remaining tokens without yielding them one at a time
    fn count(mut self) -> usize {
        let mut count = self
            .merged
            .take()
            .map(|(tokens, next)| tokens.len() - next)
            .unwrap_or(0);

        let (profile, cache) = (self.profile, self.cache);

        if let Some(chunks) = self.chunks.take() {
            count += count_chunks(profile, cache, chunks);
        }

        for segment in self.segments {
            count += match segment {
                Segment::Special { .. } => 1,
                Segment::Ordinary(text) => count_chunks(profile, cache, Chunks::new(profile, text)),
            };
        }

        count
    }
}

fn count_chunks(profile: &EncodingProfile, cache: &MergeCache, chunks: Chunks<'_>) -> usize {
    chunks
        .map(|chunk| encode_chunk(profile, cache, chunk).len())
        .sum()
}
