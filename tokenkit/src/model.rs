//! Mapping OpenAI model names to the encoding their tokenizer uses, and to the size of their
//! context window.
//!
//! Names are resolved by exact match first, then by the longest matching prefix, so dated
//! snapshots (`gpt-4-0613`) and fine tunes (`ft:gpt-3.5-turbo:my-org::abc123`) resolve the same
//! way as the model they derive from.
use crate::encoder::EncodingType;
use crate::error::UnknownModelSnafu;
use crate::Result;
use snafu::OptionExt;

use EncodingType::*;

/// Models whose name maps to an encoding exactly
const MODELS: &[(&str, EncodingType)] = &[
    // chat
    ("gpt-5", O200kBase),
    ("gpt-4.1", O200kBase),
    ("gpt-4.5", O200kBase),
    ("gpt-4o", O200kBase),
    ("chatgpt-4o-latest", O200kBase),
    ("o1", O200kBase),
    ("o3", O200kBase),
    ("o4-mini", O200kBase),
    ("gpt-4", Cl100kBase),
    ("gpt-3.5-turbo", Cl100kBase),
    ("gpt-3.5", Cl100kBase),
    ("gpt-35-turbo", Cl100kBase),
    // base
    ("davinci-002", Cl100kBase),
    ("babbage-002", Cl100kBase),
    // embeddings
    ("text-embedding-ada-002", Cl100kBase),
    ("text-embedding-3-small", Cl100kBase),
    ("text-embedding-3-large", Cl100kBase),
    // DEPRECATED MODELS
    // text (DEPRECATED)
    ("text-davinci-003", P50kBase),
    ("text-davinci-002", P50kBase),
    ("text-davinci-001", R50kBase),
    ("text-curie-001", R50kBase),
    ("text-babbage-001", R50kBase),
    ("text-ada-001", R50kBase),
    ("davinci", R50kBase),
    ("curie", R50kBase),
    ("babbage", R50kBase),
    ("ada", R50kBase),
    // code (DEPRECATED)
    ("code-davinci-002", P50kBase),
    ("code-davinci-001", P50kBase),
    ("code-cushman-002", P50kBase),
    ("code-cushman-001", P50kBase),
    ("davinci-codex", P50kBase),
    ("cushman-codex", P50kBase),
    // edit (DEPRECATED)
    ("text-davinci-edit-001", P50kEdit),
    ("code-davinci-edit-001", P50kEdit),
    // old embeddings (DEPRECATED)
    ("text-similarity-davinci-001", R50kBase),
    ("text-similarity-curie-001", R50kBase),
    ("text-similarity-babbage-001", R50kBase),
    ("text-similarity-ada-001", R50kBase),
    ("text-search-davinci-doc-001", R50kBase),
    ("text-search-curie-doc-001", R50kBase),
    ("text-search-babbage-doc-001", R50kBase),
    ("text-search-ada-doc-001", R50kBase),
    ("code-search-babbage-code-001", R50kBase),
    ("code-search-ada-code-001", R50kBase),
    // open source
    ("gpt2", Gpt2),
    ("gpt-2", Gpt2),
];

/// Model name prefixes, for snapshots and fine tunes of the models above
const MODEL_PREFIXES: &[(&str, EncodingType)] = &[
    ("o1-", O200kBase),
    ("o3-", O200kBase),
    ("o4-mini-", O200kBase),
    ("gpt-5-", O200kBase),
    ("gpt-4.1-", O200kBase),
    ("gpt-4.5-", O200kBase),
    ("gpt-4o-", O200kBase),
    ("chatgpt-4o-", O200kBase),
    ("gpt-4-", Cl100kBase),
    ("gpt-3.5-turbo-", Cl100kBase),
    ("gpt-35-turbo-", Cl100kBase),
    ("ft:gpt-4o", O200kBase),
    ("ft:gpt-4.1", O200kBase),
    ("ft:gpt-4", Cl100kBase),
    ("ft:gpt-3.5-turbo", Cl100kBase),
    ("ft:davinci-002", Cl100kBase),
    ("ft:babbage-002", Cl100kBase),
];

/// Context window sizes in tokens, by model name prefix.  The longest matching prefix wins.
const CONTEXT_WINDOWS: &[(&str, usize)] = &[
    ("gpt-5", 400_000),
    ("gpt-4.1", 1_047_576),
    ("gpt-4.5", 128_000),
    ("gpt-4o", 128_000),
    ("chatgpt-4o", 128_000),
    ("o1", 200_000),
    ("o1-mini", 128_000),
    ("o1-preview", 128_000),
    ("o3", 200_000),
    ("o4-mini", 200_000),
    ("gpt-4", 8_192),
    ("gpt-4-32k", 32_768),
    ("gpt-4-turbo", 128_000),
    ("gpt-4-0125", 128_000),
    ("gpt-4-1106", 128_000),
    ("gpt-4-vision", 128_000),
    ("gpt-3.5", 16_385),
    ("gpt-3.5-turbo-0613", 4_096),
    ("gpt-3.5-turbo-instruct", 4_096),
    ("gpt-35-turbo", 16_385),
    ("davinci-002", 16_384),
    ("babbage-002", 16_384),
    ("text-embedding-ada-002", 8_191),
    ("text-embedding-3", 8_191),
    ("text-davinci-002", 4_097),
    ("text-davinci-003", 4_097),
    ("text-davinci-001", 2_049),
    ("text-curie-001", 2_049),
    ("text-babbage-001", 2_049),
    ("text-ada-001", 2_049),
    ("davinci", 2_049),
    ("curie", 2_049),
    ("babbage", 2_049),
    ("ada", 2_049),
    ("code-davinci-002", 8_001),
    ("code-cushman-001", 2_048),
    ("gpt2", 1_024),
    ("gpt-2", 1_024),
];

/// The encoding used by `model`.
///
/// Fails with [`crate::TokenkitError::UnknownModel`] if the model isn't recognized; there's no
/// fallback encoding, because silently guessing wrong gives wrong token counts.
pub fn encoding_for_model(model: &str) -> Result<EncodingType> {
    MODELS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, typ)| *typ)
        .or_else(|| longest_prefix(MODEL_PREFIXES, model).copied())
        .context(UnknownModelSnafu { model })
}

/// The maximum number of tokens `model` accepts (prompt and completion together), if known.
///
/// Fine tunes (`ft:<base>:...`) report the context window of their base model.
pub fn context_window(model: &str) -> Option<usize> {
    let model = match model.strip_prefix("ft:") {
        Some(fine_tune) => fine_tune.split(':').next().unwrap_or(fine_tune),
        None => model,
    };

    longest_prefix(CONTEXT_WINDOWS, model).copied()
}

/// All model names with a known encoding, not counting those only matched by prefix
pub fn known_models() -> impl Iterator<Item = (&'static str, EncodingType)> {
    MODELS.iter().copied()
}

fn longest_prefix<'a, T>(table: &'a [(&'static str, T)], model: &str) -> Option<&'a T> {
    table
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TokenkitError;
    use assert_matches::assert_matches;

    #[test]
    fn exact_names() {
        assert_eq!(encoding_for_model("gpt-4").unwrap(), Cl100kBase);
        assert_eq!(encoding_for_model("gpt-4o").unwrap(), O200kBase);
        assert_eq!(encoding_for_model("text-davinci-003").unwrap(), P50kBase);
        assert_eq!(encoding_for_model("text-davinci-edit-001").unwrap(), P50kEdit);
        assert_eq!(encoding_for_model("davinci").unwrap(), R50kBase);
        assert_eq!(encoding_for_model("davinci-002").unwrap(), Cl100kBase);
        assert_eq!(encoding_for_model("gpt2").unwrap(), Gpt2);
    }

    #[test]
    fn snapshots_resolve_like_their_model() {
        assert_eq!(
            encoding_for_model("gpt-4-0613").unwrap(),
            encoding_for_model("gpt-4").unwrap()
        );
        assert_eq!(encoding_for_model("gpt-4-32k-0314").unwrap(), Cl100kBase);
        assert_eq!(encoding_for_model("gpt-3.5-turbo-0125").unwrap(), Cl100kBase);
        assert_eq!(encoding_for_model("gpt-4o-2024-05-13").unwrap(), O200kBase);
        assert_eq!(encoding_for_model("gpt-4o-mini").unwrap(), O200kBase);
        assert_eq!(encoding_for_model("gpt-4.1-nano").unwrap(), O200kBase);
        assert_eq!(encoding_for_model("o3-mini").unwrap(), O200kBase);
    }

    #[test]
    fn longest_prefix_wins() {
        // Both "ft:gpt-4" and "ft:gpt-4o" match
        assert_eq!(
            encoding_for_model("ft:gpt-4o-2024-08-06:my-org::abc123").unwrap(),
            O200kBase
        );
        assert_eq!(
            encoding_for_model("ft:gpt-3.5-turbo:my-org:custom:id").unwrap(),
            Cl100kBase
        );
        assert_eq!(encoding_for_model("ft:gpt-4-0613:my-org::x").unwrap(), Cl100kBase);
    }

    #[test]
    fn unknown_models_are_errors() {
        assert_matches!(
            encoding_for_model("not-a-real-model"),
            Err(TokenkitError::UnknownModel { model }) if model == "not-a-real-model"
        );
        // A prefix only matches at the start of the name
        assert!(encoding_for_model("my-gpt-4-clone").is_err());
        assert!(encoding_for_model("").is_err());
    }

    #[test]
    fn context_windows() {
        assert_eq!(context_window("gpt-4"), Some(8_192));
        assert_eq!(context_window("gpt-4-0613"), Some(8_192));
        assert_eq!(context_window("gpt-4-32k-0613"), Some(32_768));
        assert_eq!(context_window("gpt-4-turbo-2024-04-09"), Some(128_000));
        assert_eq!(context_window("gpt-4o-mini"), Some(128_000));
        assert_eq!(context_window("gpt-3.5-turbo-instruct"), Some(4_096));
        assert_eq!(context_window("text-davinci-003"), Some(4_097));
        assert_eq!(context_window("ft:gpt-3.5-turbo:my-org::abc"), Some(16_385));
        assert_eq!(context_window("not-a-real-model"), None);
    }

    #[test]
    fn every_known_model_has_a_context_window() {
        for (model, _) in known_models() {
            // The retired code, edit, search and similarity models aren't listed
            if model.starts_with("code-") || model.starts_with("text-s") {
                continue;
            }
            if model.ends_with("-codex") || model.contains("-edit-") {
                continue;
            }
            assert!(context_window(model).is_some(), "{model} has no context window");
        }
    }
}
