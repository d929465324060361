//! Breaking input text up into the pieces the BPE algorithm operates on.
//!
//! This happens in two stages.  First the text is split around the special tokens the caller
//! allows, into [`Segment`]s.  Then each ordinary segment is broken into chunks ("words", roughly)
//! with the encoding's regex.  Each chunk is then encoded independently of all the others.
use crate::encoder::EncodingProfile;
use crate::TokenInt;
use std::collections::HashSet;
use tracing::*;

/// Which special tokens are recognized as such when encoding.
///
/// Special tokens that aren't allowed are not an error; they're just encoded like any other text.
#[derive(Clone, Copy, Debug, Default)]
pub enum AllowedSpecial<'a> {
    /// No special tokens are recognized
    #[default]
    None,

    /// Every special token of the encoding is recognized
    All,

    /// Only the listed special tokens are recognized
    Only(&'a HashSet<&'a str>),
}

impl<'a> AllowedSpecial<'a> {
    pub fn allows(&self, literal: &str) -> bool {
        match self {
            AllowedSpecial::None => false,
            AllowedSpecial::All => true,
            AllowedSpecial::Only(allowed) => allowed.contains(literal),
        }
    }
}

impl<'a> From<&'a HashSet<&'a str>> for AllowedSpecial<'a> {
    fn from(allowed: &'a HashSet<&'a str>) -> Self {
        AllowedSpecial::Only(allowed)
    }
}

/// A piece of the input text
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Text that is encoded with BPE
    Ordinary(&'a str),

    /// An allowed special token, which is encoded as its reserved id
    Special { text: &'a str, token: TokenInt },
}

/// Splits text into ordinary text and allowed special tokens, in order.
///
/// Never yields an empty ordinary segment.
#[derive(Clone)]
pub struct Segments<'a> {
    profile: &'a EncodingProfile,
    allowed: AllowedSpecial<'a>,
    text: &'a str,

    /// The offset into `text` where the next segment starts
    pos: usize,

    /// The next allowed special token found in the text, as (start, end, token), if the search
    /// for it has already been done
    next_special: Option<(usize, usize, TokenInt)>,
}

impl<'a> Segments<'a> {
    pub fn new(profile: &'a EncodingProfile, text: &'a str, allowed: AllowedSpecial<'a>) -> Self {
        Self {
            profile,
            allowed,
            text,
            pos: 0,
            next_special: None,
        }
    }

    /// Find the first allowed special token at or after `from`.
    ///
    /// Matches are leftmost-longest over all of the encoding's special tokens.  A match that
    /// isn't allowed doesn't end the search; it continues one byte past the start of that match,
    /// so an allowed token overlapping a disallowed one is still found.
    fn find_allowed_special(&self, from: usize) -> Option<(usize, usize, TokenInt)> {
        if matches!(self.allowed, AllowedSpecial::None) {
            return None;
        }

        let bytes = self.text.as_bytes();
        let mut start = from;
        while start < bytes.len() {
            let m = self.profile.special_tokens_finder.find(&bytes[start..])?;
            let (m_start, m_end) = (start + m.start(), start + m.end());
            let literal = &self.text[m_start..m_end];

            if self.allowed.allows(literal) {
                let token = self
                    .profile
                    .special_tokens_encode
                    .get(literal.as_bytes())
                    .expect("BUG: special token finder matched a string that isn't a special token");
                return Some((m_start, m_end, token));
            }

            start = m_start + 1;
        }

        None
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.text.len() {
            return None;
        }

        if self.next_special.is_none() {
            self.next_special = self.find_allowed_special(self.pos);
        }

        match self.next_special {
            Some((start, end, token)) if start == self.pos => {
                self.next_special = None;
                self.pos = end;
                Some(Segment::Special {
                    text: &self.text[start..end],
                    token,
                })
            }
            Some((start, _, _)) => {
                // Ordinary text up to the special token, which is yielded next time
                let segment = &self.text[self.pos..start];
                self.pos = start;
                Some(Segment::Ordinary(segment))
            }
            None => {
                let segment = &self.text[self.pos..];
                self.pos = self.text.len();
                Some(Segment::Ordinary(segment))
            }
        }
    }
}

/// How much text, in bytes, the regex is given again when matching the whole text failed and the
/// failure wasn't on a whitespace run
const FALLBACK_WINDOW: usize = 4096;

/// Applies the encoding's regex to get the next chunk, as defined by the regex itself.
///
/// The regex only ever sees the text it was given, so lookaheads at the end of an ordinary
/// segment don't see the special token that follows it.
///
/// The regex engine can give up on valid text: very long whitespace runs exhaust its backtracking
/// stack.  Such runs are then split the way the pattern's whitespace alternatives would have
/// split them, so that any text can be chunked.
#[derive(Clone)]
pub struct Chunks<'a> {
    regex: &'a fancy_regex::Regex,
    newline_chunks: bool,
    text: &'a str,

    /// The offset into `text` where the next iteration should start to process
    pos: usize,
}

impl<'a> Chunks<'a> {
    pub fn new(profile: &'a EncodingProfile, text: &'a str) -> Self {
        Self {
            regex: &profile.regex,
            newline_chunks: profile.newline_chunks,
            text,
            pos: 0,
        }
    }

    /// The end of the chunk starting at `self.pos`, found without matching the regex against the
    /// rest of the text.
    ///
    /// A whitespace run of two or more characters is the chunk `\s*[\r\n]+` matches if the
    /// pattern has it and the run contains a newline.  Otherwise it's the chunk `\s+(?!\S)`
    /// matches: the whole run at the end of the text, or all but its last character when more
    /// text follows.  Anything else is matched within a window of the text instead; if even that
    /// fails the chunk is a single character.
    fn fallback_end(&self) -> usize {
        let rest = &self.text[self.pos..];
        let run_len = rest
            .find(|c: char| !c.is_whitespace())
            .unwrap_or(rest.len());
        let run = &rest[..run_len];

        if run.chars().nth(1).is_some() {
            let after_newline = run
                .rfind(|c: char| c == '\r' || c == '\n')
                .filter(|_| self.newline_chunks)
                .map(|newline| newline + 1);

            let len = match after_newline {
                Some(len) => len,
                None if run_len == rest.len() => run_len,
                None => run
                    .char_indices()
                    .next_back()
                    .map_or(run_len, |(last, _)| last),
            };
            return self.pos + len;
        }

        let mut window = rest.len().min(FALLBACK_WINDOW);
        while !rest.is_char_boundary(window) {
            window -= 1;
        }

        match self.regex.find(&rest[..window]) {
            Ok(Some(m)) if m.start() == 0 && m.end() > 0 => self.pos + m.end(),
            _ => self.pos + rest.chars().next().map_or(rest.len(), char::len_utf8),
        }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.text.len() {
            return None;
        }

        let (start, end) = match self.regex.find_from_pos(self.text, self.pos) {
            Ok(m) => {
                let m = m?;
                (m.start(), m.end())
            }
            Err(err) => {
                debug!(pos = self.pos, %err, "Regex failed, splitting the chunk without it");
                (self.pos, self.fallback_end())
            }
        };

        self.pos = end;

        Some(&self.text[start..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{EmbeddedAssets, EncodingType, ENDOFPROMPT, ENDOFTEXT, FIM_PREFIX};
    use once_cell::sync::Lazy;

    static CL100K: Lazy<EncodingProfile> = Lazy::new(|| {
        EncodingProfile::build(EncodingType::Cl100kBase, &EmbeddedAssets).unwrap()
    });

    static R50K: Lazy<EncodingProfile> =
        Lazy::new(|| EncodingProfile::build(EncodingType::R50kBase, &EmbeddedAssets).unwrap());

    fn get_chunks<'a>(profile: &'a EncodingProfile, text: &'a str) -> Vec<&'a str> {
        Chunks::new(profile, text).collect()
    }

    fn get_segments<'a>(text: &'a str, allowed: AllowedSpecial<'a>) -> Vec<Segment<'a>> {
        Segments::new(&CL100K, text, allowed).collect()
    }

    #[test]
    fn chunk_iterator_works() {
        assert!(get_chunks(&CL100K, "").is_empty());
        assert_eq!(&["foo"], get_chunks(&CL100K, "foo").as_slice());
        assert_eq!(
            &["foo", " bar", " baz"],
            get_chunks(&CL100K, "foo bar baz").as_slice()
        );
        assert_eq!(
            &[
                "let",
                " tokenizer",
                " =",
                " Tokenizer",
                "::",
                "for",
                "_encoding",
                "(&",
                "registry",
                ",",
                " EncodingType",
                "::",
                "Cl",
                "100",
                "kBase",
                ");"
            ],
            get_chunks(
                &CL100K,
                r##"let tokenizer = Tokenizer::for_encoding(&registry, EncodingType::Cl100kBase);"##
            )
            .as_slice()
        );
    }

    #[test]
    fn chunking_depends_on_the_encoding() {
        // cl100k groups digits in threes, r50k takes the whole run with its leading space
        assert_eq!(get_chunks(&CL100K, "12345"), vec!["123", "45"]);
        assert_eq!(get_chunks(&R50K, " 12345"), vec![" 12345"]);

        // r50k keeps trailing whitespace apart from the next word's leading space
        assert_eq!(get_chunks(&R50K, "a   b"), vec!["a", "  ", " b"]);
        assert_eq!(get_chunks(&R50K, "Hello, world!\n"), vec!["Hello", ",", " world", "!", "\n"]);
    }

    #[test]
    fn chunks_cover_the_text() {
        let text = "It's 2024!\r\n\tSpaces   and ünïcödé 日本語 text...";
        for profile in [&*CL100K, &*R50K] {
            assert_eq!(get_chunks(profile, text).concat(), text);
        }
    }

    #[test]
    fn long_whitespace_runs_are_chunked() {
        let spaces = " ".repeat(1_000_000);

        for profile in [&*CL100K, &*R50K] {
            let text = format!("{spaces}x");
            let chunks = get_chunks(profile, &text);
            assert_eq!(chunks, vec![&spaces[1..], " x"]);

            let text = format!("a{spaces}");
            assert_eq!(get_chunks(profile, &text), vec!["a", spaces.as_str()]);
        }

        // cl100k ends whitespace chunks at their last newline, r50k doesn't
        let text = format!("{spaces}\n  x");
        assert_eq!(
            get_chunks(&CL100K, &text),
            vec![&text[..spaces.len() + 1], " ", " x"]
        );
        assert_eq!(
            get_chunks(&R50K, &text),
            vec![&text[..spaces.len() + 2], " x"]
        );
    }

    #[test]
    fn fallback_splits_like_the_regex() {
        let texts = [
            "   x",
            "  \n\n  x",
            "\t\n \r\n",
            " \n \u{3000}1",
            "    !",
            "x",
            " x",
            "日本",
            "!!! ",
        ];

        for profile in [&*CL100K, &*R50K] {
            for text in texts {
                let chunks = Chunks::new(profile, text);
                let expected = profile.regex.find(text).unwrap().unwrap().end();

                assert_eq!(chunks.fallback_end(), expected, "{text:?} in {}", profile.name());
            }
        }
    }

    #[test]
    fn no_specials_allowed() {
        let text = format!("a{ENDOFTEXT}b");
        assert_eq!(
            get_segments(&text, AllowedSpecial::None),
            vec![Segment::Ordinary(&text)]
        );
        assert!(get_segments("", AllowedSpecial::All).is_empty());
    }

    #[test]
    fn allowed_specials_are_split_out() {
        let text = format!("{ENDOFTEXT}hello{ENDOFPROMPT}{ENDOFTEXT} world");

        assert_eq!(
            get_segments(&text, AllowedSpecial::All),
            vec![
                Segment::Special {
                    text: ENDOFTEXT,
                    token: 100257
                },
                Segment::Ordinary("hello"),
                Segment::Special {
                    text: ENDOFPROMPT,
                    token: 100276
                },
                Segment::Special {
                    text: ENDOFTEXT,
                    token: 100257
                },
                Segment::Ordinary(" world"),
            ]
        );
    }

    #[test]
    fn disallowed_specials_stay_ordinary() {
        let text = format!("a{FIM_PREFIX}b{ENDOFTEXT}c");
        let allowed = HashSet::from([ENDOFTEXT]);

        assert_eq!(
            get_segments(&text, AllowedSpecial::from(&allowed)),
            vec![
                Segment::Ordinary(&text[..text.find(ENDOFTEXT).unwrap()]),
                Segment::Special {
                    text: ENDOFTEXT,
                    token: 100257
                },
                Segment::Ordinary("c"),
            ]
        );
    }

    #[test]
    fn special_token_at_the_very_end() {
        let text = format!("abc{ENDOFTEXT}");
        let segments = get_segments(&text, AllowedSpecial::All);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0], Segment::Ordinary("abc"));
        assert!(matches!(segments[1], Segment::Special { token: 100257, .. }));
    }

    #[test]
    fn allows() {
        let allowed = HashSet::from([ENDOFTEXT]);

        assert!(!AllowedSpecial::None.allows(ENDOFTEXT));
        assert!(AllowedSpecial::All.allows(FIM_PREFIX));
        assert!(AllowedSpecial::Only(&allowed).allows(ENDOFTEXT));
        assert!(!AllowedSpecial::Only(&allowed).allows(FIM_PREFIX));
    }
}
