use crate::TokenInt;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TokenkitError {
    #[snafu(display("The encoding '{encoding}' isn't one of the supported encodings"))]
    UnknownEncoding { encoding: String },

    #[snafu(display(
        "No encoding is known for model '{model}'; specify the encoding explicitly"
    ))]
    UnknownModel { model: String },

    #[snafu(display("Vocabulary asset '{name}' is missing"))]
    MissingAsset { name: String },

    #[snafu(display("Vocabulary asset '{name}', line {line}: invalid base64 token"))]
    InvalidBase64 {
        name: String,
        line: usize,
        source: base64::DecodeError,
    },

    #[snafu(display("Vocabulary asset '{name}', line {line}: {reason}"))]
    MalformedLine {
        name: String,
        line: usize,
        reason: String,
    },

    #[snafu(display("Vocabulary asset '{name}', line {line}: invalid rank '{rank}'"))]
    InvalidRank {
        name: String,
        line: usize,
        rank: String,
        source: std::num::ParseIntError,
    },

    #[snafu(display("Vocabulary asset '{name}' is not a JSON object of token ids"))]
    InvalidJson {
        name: String,
        source: serde_json::Error,
    },

    #[snafu(display(
        "Vocabulary asset '{name}': token '{token}' has characters outside the byte-level alphabet"
    ))]
    InvalidMergeToken { name: String, token: String },

    #[snafu(display("Encoding '{encoding}' has no token for the single byte {byte:#04x}"))]
    IncompleteByteVocabulary { encoding: String, byte: u8 },

    #[snafu(display("Encoding '{encoding}': merge result {token:?} has no token id"))]
    MergeWithoutId { encoding: String, token: String },

    #[snafu(display("Encoding '{encoding}' has an invalid pre-tokenization regex"))]
    InvalidRegex {
        encoding: String,
        #[snafu(source(from(fancy_regex::Error, Box::new)))]
        source: Box<fancy_regex::Error>,
    },

    #[snafu(display("Token {token} is not part of this encoding"))]
    UnknownToken { token: TokenInt },

    #[snafu(display("The decoded tokens are not valid UTF-8"))]
    InvalidUtf8 { source: std::string::FromUtf8Error },
}
