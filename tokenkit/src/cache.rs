//! Memo of chunks that needed the BPE merge loop, and the tokens the loop produced for them.
//!
//! Real text repeats the same words over and over, and the merge loop is by far the most
//! expensive part of encoding a word, so remembering its output pays off quickly.  Entries are
//! never evicted.
use crate::encoder::HashMap;
use crate::{TokenInt, TokenString};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::*;

#[derive(Debug, Default)]
pub struct MergeCache {
    entries: RwLock<HashMap<TokenString, Arc<[TokenInt]>>>,
}

impl MergeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tokens previously computed for `chunk`, if any
    pub fn get(&self, chunk: &[u8]) -> Option<Arc<[TokenInt]>> {
        self.read().get(chunk).cloned()
    }

    /// Get the tokens for `chunk`, calling `compute` to produce them if they're not cached yet.
    ///
    /// `compute` runs without any lock held, so two threads that miss on the same chunk at the
    /// same time may both compute it.  Whichever finishes first is stored and returned to both;
    /// the results are identical anyway since encoding is deterministic.
    pub fn get_or_compute(
        &self,
        chunk: &[u8],
        compute: impl FnOnce() -> Vec<TokenInt>,
    ) -> Arc<[TokenInt]> {
        if let Some(tokens) = self.get(chunk) {
            return tokens;
        }

        let tokens: Arc<[TokenInt]> = compute().into();
        trace!(
            chunk_len = chunk.len(),
            tokens = tokens.len(),
            "Merge cache miss"
        );

        self.write()
            .entry(chunk.to_vec())
            .or_insert(tokens)
            .clone()
    }

    /// The number of cached chunks
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    // A panic while holding the lock can't leave the map half-updated (every write is a single
    // insert or clear), so a poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<TokenString, Arc<[TokenInt]>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TokenString, Arc<[TokenInt]>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
