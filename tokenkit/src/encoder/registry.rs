//! Owner of the built encoding profiles.
//!
//! Building a profile parses a large vocabulary file, so each encoding is built lazily on first
//! use, and only once: concurrent first users of the same encoding wait for a single build rather
//! than racing.  After that the profile is held for as long as the registry lives and handed out
//! as a cheap `Arc` clone.
//!
//! There's deliberately no process-wide registry hidden in a static.  A program creates one
//! (usually at startup) and passes it to whatever needs to construct tokenizers; tests can create
//! their own, possibly with their own [`AssetProvider`].
use super::{AssetProvider, EmbeddedAssets, EncodingProfile, EncodingType};
use crate::error::UnknownEncodingSnafu;
use crate::Result;
use once_cell::sync::OnceCell;
use snafu::OptionExt;
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;
use strum::{EnumCount, IntoEnumIterator};

pub struct ProfileRegistry {
    assets: Box<dyn AssetProvider>,
    profiles: [OnceCell<Arc<EncodingProfile>>; EncodingType::COUNT],
}

impl ProfileRegistry {
    /// A registry that builds profiles from the vocabulary files bundled with this crate.
    pub fn embedded() -> Self {
        Self::new(EmbeddedAssets)
    }

    /// A registry that builds profiles from the vocabulary files served by `assets`.
    pub fn new(assets: impl AssetProvider + 'static) -> Self {
        Self {
            assets: Box::new(assets),
            profiles: Default::default(),
        }
    }

    /// Get the profile for the given encoding type, building it if this is the first request.
    ///
    /// A failed build isn't remembered; the error is returned to this caller and the next call
    /// will try again.
    pub fn load(&self, typ: EncodingType) -> Result<Arc<EncodingProfile>> {
        self.profiles[typ as usize]
            .get_or_try_init(|| EncodingProfile::build(typ, self.assets.as_ref()).map(Arc::new))
            .cloned()
    }

    /// Like [`Self::load`], looking the encoding up by name (e.g. `cl100k_base`)
    pub fn load_by_name(&self, name: &str) -> Result<Arc<EncodingProfile>> {
        let typ = EncodingType::from_str(name)
            .ok()
            .context(UnknownEncodingSnafu { encoding: name })?;

        self.load(typ)
    }

    /// Whether the profile for `typ` has already been built
    pub fn is_loaded(&self, typ: EncodingType) -> bool {
        self.profiles[typ as usize].get().is_some()
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::embedded()
    }
}

impl Debug for ProfileRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        for (slot, typ) in self.profiles.iter().zip(EncodingType::iter()) {
            if slot.get().is_some() {
                list.entry(&typ);
            }
        }
        list.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StaticAssets, TokenkitError};
    use assert_matches::assert_matches;
    use std::sync::Barrier;

    #[test]
    fn profiles_are_built_once() {
        let registry = ProfileRegistry::embedded();
        assert!(!registry.is_loaded(EncodingType::R50kBase));

        let first = registry.load(EncodingType::R50kBase).unwrap();
        let second = registry.load_by_name("r50k_base").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.is_loaded(EncodingType::R50kBase));
        assert!(!registry.is_loaded(EncodingType::Cl100kBase));
    }

    #[test]
    fn concurrent_first_use_builds_one_profile() {
        const THREADS: usize = 8;
        let registry = ProfileRegistry::embedded();
        let barrier = Barrier::new(THREADS);

        let profiles = std::thread::scope(|scope| {
            let handles = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        registry.load(EncodingType::P50kBase).unwrap()
                    })
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect::<Vec<_>>()
        });

        for profile in &profiles[1..] {
            assert!(Arc::ptr_eq(&profiles[0], profile));
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        let registry = ProfileRegistry::embedded();

        assert_matches!(
            registry.load_by_name("gpt-4"),
            Err(TokenkitError::UnknownEncoding { encoding }) if encoding == "gpt-4"
        );
    }

    #[test]
    fn load_errors_are_not_cached() {
        let registry = ProfileRegistry::new(StaticAssets::new());

        for _ in 0..2 {
            assert_matches!(
                registry.load(EncodingType::Cl100kBase),
                Err(TokenkitError::MissingAsset { .. })
            );
        }
        assert!(!registry.is_loaded(EncodingType::Cl100kBase));
    }
}
