//! Implementation of components of BPE (byte pair encoding) as it relates to encoding text as
//! tokens.
use crate::encoder::Vocabulary;
use crate::TokenInt;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Using the BPE algorithm find the tokens in a word and return their integer form.
///
/// The caller is expected to have already checked whether the whole word is a token; this always
/// runs the merge loop (except for the trivial empty and single byte cases).
pub fn byte_pair_encode(word: &[u8], vocab: &Vocabulary) -> Vec<TokenInt> {
    // Every byte value is a token; profiles that break this invariant fail to load
    if word.len() <= 1 {
        return word
            .iter()
            .map(|byte| {
                vocab
                    .id(std::slice::from_ref(byte))
                    .expect("BUG: expect all possible u8 values to correspond to a token")
            })
            .collect();
    }

    byte_pair_merge(word, vocab, |p| {
        vocab
            .id(&word[p.start..p.end])
            .expect("BUG: expect every merge result to have a token id")
    })
}

/// Using the BPE algorithm, find the tokens in a word and return their byte string form.
///
/// Handy for seeing how a word was split up without having to decode each token.
pub fn byte_pair_split<'a>(word: &'a [u8], vocab: &Vocabulary) -> Vec<&'a [u8]> {
    if word.len() <= 1 {
        return if word.is_empty() { vec![] } else { vec![word] };
    }
    byte_pair_merge(word, vocab, |p| &word[p.start..p.end])
}

/// Words at least this many bytes long are merged with a heap instead of rescanning every part
/// for each merge.
const LARGE_WORD_LEN: usize = 256;

/// Merge bytes within a word together into progressively fewer, longer byte sequences that
/// correspond to tokens in the encoding vocabulary.
///
/// The algorithm works by repeatedly merging the adjacent pair of parts whose concatenation has
/// the lowest merge rank, until all that's left is parts that can't be merged with their
/// neighbors.  A pair whose concatenation isn't in the rank table is never merged.  When several
/// pairs share the lowest rank the leftmost one is merged first.
///
/// `f` is called on each final part's byte range within `word`, and maps it to whatever form the
/// caller wants it in.
fn byte_pair_merge<T>(
    word: &[u8],
    vocab: &Vocabulary,
    f: impl Fn(std::ops::Range<usize>) -> T,
) -> Vec<T> {
    debug_assert!(word.len() > 1);

    let bounds = if word.len() < LARGE_WORD_LEN {
        merge_by_scan(word, vocab)
    } else {
        merge_by_heap(word, vocab)
    };

    bounds.windows(2).map(|part| f(part[0]..part[1])).collect()
}

/// Performs the merges with a linear scan for the lowest rank each time, returning the start of
/// every final part followed by the end of the word.
///
/// Based on the _byte_pair_merge function in the `tiktoken` source.
fn merge_by_scan(word: &[u8], vocab: &Vocabulary) -> Vec<usize> {
    // This is a vector of (start, rank).
    // The rank is of the byte pair starting at position start.
    // The rank of the last item in the vector is not a valid value.
    let mut parts: Vec<(usize, usize)> = (0..word.len() + 1).map(|i| (i, usize::MAX)).collect();

    let get_rank = {
        #[inline(always)]
        |parts: &Vec<(usize, usize)>, start_idx: usize, skip: usize| {
            if (start_idx + skip + 2) < parts.len() {
                vocab.rank(&word[parts[start_idx].0..parts[start_idx + skip + 2].0])
            } else {
                None
            }
        }
    };

    // We look up the ranks once in the beginning and iteratively update
    // them during each merge, which reduces the number of rank lookups.
    for i in 0..parts.len() - 2 {
        if let Some(rank) = get_rank(&parts, i, 0) {
            // usize::MAX is a sentinel value and cannot be a valid rank
            debug_assert!(rank != usize::MAX);
            parts[i].1 = rank;
        }
    }

    // If you have n parts and m merges, this does O(mn) work.  Short words are the common case
    // and the flat vector is very cache friendly; long ones go to `merge_by_heap` instead.
    //
    // Ranks are looked up by the bytes of the merged pair rather than by the pair of parts.  For
    // vocabularies trained by repeatedly merging pairs this is equivalent.
    loop {
        if parts.len() == 1 {
            break;
        }

        // usize::MAX is a sentinel rank value allowing us to
        // take the min more quickly.  The strict `<` keeps the leftmost of equal ranks.
        let mut min_rank: (usize, usize) = (usize::MAX, 0);
        for (i, &(_, rank)) in parts[..parts.len() - 1].iter().enumerate() {
            if rank < min_rank.0 {
                min_rank = (rank, i);
            }
        }

        if min_rank.0 != usize::MAX {
            let i = min_rank.1;

            // NOTE: We are about to remove parts[i + 1]. We do not do it
            // yet because there are cache-locality benefits to updating
            // parts[i] and parts[i-1] before removing, which could thrash
            // the cache. Thus, we update the rank calculation by skipping over
            // parts[i + 1], by invoking `get_rank` with `skip = 1`.
            parts[i].1 = get_rank(&parts, i, 1).unwrap_or(usize::MAX);
            if i > 0 {
                parts[i - 1].1 = get_rank(&parts, i - 1, 1).unwrap_or(usize::MAX);
            }

            parts.remove(i + 1);
        } else {
            break;
        }
    }

    parts.into_iter().map(|(start, _)| start).collect()
}

/// Performs the same merges as [`merge_by_scan`], in the same order, in O(m log n) time.
///
/// Parts form a linked list indexed by their first byte, so ordering heap entries by
/// `(rank, start)` pops the leftmost of several equally ranked pairs first.  Entries are never
/// removed from the heap; one whose part has since been merged away or re-ranked is skipped.
fn merge_by_heap(word: &[u8], vocab: &Vocabulary) -> Vec<usize> {
    const MERGED: usize = usize::MAX;

    let len = word.len();

    // For each part, indexed by its start: where it ends (`MERGED` once absorbed by the part to
    // its left), where the part before it starts, and the rank of merging it with the next part
    let mut ends: Vec<usize> = (1..=len).collect();
    let mut prevs: Vec<Option<usize>> = (0..len).map(|i| i.checked_sub(1)).collect();
    let mut ranks: Vec<usize> = vec![usize::MAX; len];

    let pair_rank = |ends: &[usize], start: usize| {
        let next = ends[start];
        if next < len {
            vocab.rank(&word[start..ends[next]]).unwrap_or(usize::MAX)
        } else {
            usize::MAX
        }
    };

    let mut heap = BinaryHeap::with_capacity(len);
    for start in 0..len - 1 {
        ranks[start] = pair_rank(&ends, start);
        if ranks[start] != usize::MAX {
            heap.push(Reverse((ranks[start], start)));
        }
    }

    while let Some(Reverse((rank, start))) = heap.pop() {
        if ends[start] == MERGED || ranks[start] != rank {
            continue;
        }

        // Absorb the next part
        let next = ends[start];
        ends[start] = ends[next];
        ends[next] = MERGED;
        ranks[next] = usize::MAX;
        if ends[start] < len {
            prevs[ends[start]] = Some(start);
        }

        for part in std::iter::once(start).chain(prevs[start]) {
            ranks[part] = pair_rank(&ends, part);
            if ranks[part] != usize::MAX {
                heap.push(Reverse((ranks[part], part)));
            }
        }
    }

    let mut bounds = vec![0];
    let mut start = 0;
    while start < len {
        start = ends[start];
        bounds.push(start);
    }
    bounds
}
