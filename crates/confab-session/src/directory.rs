//! Process-wide registry of published key bundles.
//!
//! Stands in for the server a deployed system would publish bundles to.
//! Publication is an unconditional upsert and lookups are pure reads; the
//! directory performs no validation of bundle contents; consumers verify
//! the signed prekey signature when they use a bundle.

use std::collections::HashMap;

use confab_crypto::PreKeyBundle;
use parking_lot::RwLock;

/// Mapping from party name to its published [`PreKeyBundle`].
#[derive(Default)]
pub struct KeyDirectory {
    bundles: RwLock<HashMap<String, PreKeyBundle>>,
}

impl KeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a bundle, overwriting any prior bundle for the name.
    pub fn publish(&self, name: &str, bundle: PreKeyBundle) {
        tracing::debug!(
            party = name,
            registration_id = bundle.registration_id,
            "key bundle published"
        );
        self.bundles.write().insert(name.to_string(), bundle);
    }

    /// Look up a party's bundle; `None` when no identity was created yet.
    pub fn bundle(&self, name: &str) -> Option<PreKeyBundle> {
        self.bundles.read().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use confab_crypto::{OneTimePreKeyPublic, SignedPreKeyPublic};
    use proptest::prelude::*;

    use super::*;

    fn bundle_strategy() -> impl Strategy<Value = PreKeyBundle> {
        (
            any::<u32>(),
            proptest::collection::vec(any::<u8>(), 32),
            any::<u32>(),
            proptest::collection::vec(any::<u8>(), 32),
            proptest::collection::vec(any::<u8>(), 64),
            proptest::collection::vec((any::<u32>(), proptest::collection::vec(any::<u8>(), 32)), 0..3),
        )
            .prop_map(
                |(registration_id, identity_key, spk_id, spk_public, signature, otpks)| {
                    PreKeyBundle {
                        registration_id,
                        identity_key,
                        signed_pre_key: SignedPreKeyPublic {
                            id: spk_id,
                            public_key: spk_public,
                            signature,
                        },
                        one_time_pre_keys: otpks
                            .into_iter()
                            .map(|(id, public_key)| OneTimePreKeyPublic { id, public_key })
                            .collect(),
                    }
                },
            )
    }

    proptest! {
        #[test]
        fn publish_then_lookup_round_trips(name in "[a-z]{1,12}", bundle in bundle_strategy()) {
            let directory = KeyDirectory::new();
            directory.publish(&name, bundle.clone());
            prop_assert_eq!(directory.bundle(&name), Some(bundle));
        }
    }

    #[test]
    fn lookup_before_publication_is_absent() {
        let directory = KeyDirectory::new();
        assert!(directory.bundle("duvan").is_none());
    }

    fn fixed_bundle(registration_id: u32) -> PreKeyBundle {
        PreKeyBundle {
            registration_id,
            identity_key: vec![1; 32],
            signed_pre_key: SignedPreKeyPublic {
                id: 1,
                public_key: vec![2; 32],
                signature: vec![3; 64],
            },
            one_time_pre_keys: vec![OneTimePreKeyPublic {
                id: 100,
                public_key: vec![4; 32],
            }],
        }
    }

    #[test]
    fn republication_overwrites() {
        let directory = KeyDirectory::new();
        directory.publish("sebastian", fixed_bundle(10));
        directory.publish("sebastian", fixed_bundle(20));

        let bundle = directory.bundle("sebastian").unwrap();
        assert_eq!(bundle.registration_id, 20);
    }
}
