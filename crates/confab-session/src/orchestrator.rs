//! Identity creation and handshake sequencing.
//!
//! The orchestrator owns each party's [`ProtocolStore`] and mutates it
//! through the [`ProtocolEngine`]: identity creation stores the private
//! halves locally and publishes the public projection to the
//! [`KeyDirectory`]; session establishment fetches the peer's bundle and
//! runs the initiator handshake against the caller's own store.

use std::collections::HashMap;
use std::sync::Arc;

use confab_crypto::{
    CiphertextPayload, OneTimePreKeyPublic, PreKeyBundle, ProtocolAddress, ProtocolEngine,
    ProtocolStore, SignedPreKeyPublic,
};
use parking_lot::RwLock;
use rand::Rng;

use crate::directory::KeyDirectory;
use crate::error::SessionError;

/// Every party in this simulation runs on a single device.
pub(crate) const DEFAULT_DEVICE_ID: u32 = 1;

pub(crate) fn party_address(name: &str) -> ProtocolAddress {
    ProtocolAddress::new(name, DEFAULT_DEVICE_ID)
}

pub struct SessionOrchestrator {
    engine: Arc<dyn ProtocolEngine>,
    directory: Arc<KeyDirectory>,
    parties: RwLock<HashMap<String, Arc<ProtocolStore>>>,
}

impl SessionOrchestrator {
    pub fn new(engine: Arc<dyn ProtocolEngine>, directory: Arc<KeyDirectory>) -> Self {
        Self {
            engine,
            directory,
            parties: RwLock::new(HashMap::new()),
        }
    }

    /// Create an identity for `name` and publish its key bundle.
    ///
    /// Generates a registration id, identity key pair, one signed prekey
    /// and one one-time prekey. Calling this again for the same name
    /// replaces the identity wholesale: any session a peer negotiated with
    /// the old identity becomes unusable.
    ///
    /// Returns the new registration id.
    pub fn create_identity(&self, name: &str) -> u32 {
        let registration_id = self.engine.generate_registration_id();
        let identity = self.engine.generate_identity_key_pair();

        let mut rng = rand::thread_rng();
        let pre_key = self.engine.generate_pre_key(rng.gen_range(1..10_000));
        let signed_pre_key = self
            .engine
            .generate_signed_pre_key(&identity, rng.gen_range(1..10_000));

        let bundle = PreKeyBundle {
            registration_id,
            identity_key: identity.public_key_bytes().to_vec(),
            signed_pre_key: SignedPreKeyPublic {
                id: signed_pre_key.id(),
                public_key: signed_pre_key.public_key().to_vec(),
                signature: signed_pre_key.signature().to_vec(),
            },
            one_time_pre_keys: vec![OneTimePreKeyPublic {
                id: pre_key.id(),
                public_key: pre_key.public_key().to_vec(),
            }],
        };

        let store = ProtocolStore::new();
        store.set_registration_id(registration_id);
        store.set_identity_key_pair(identity);
        store.store_pre_key(pre_key);
        store.store_signed_pre_key(signed_pre_key);

        let replaced = self
            .parties
            .write()
            .insert(name.to_string(), Arc::new(store))
            .is_some();
        if replaced {
            tracing::warn!(
                party = name,
                "identity recreated; sessions peers negotiated with the old identity are unusable"
            );
        }

        self.directory.publish(name, bundle);
        tracing::debug!(party = name, registration_id, "identity created");
        registration_id
    }

    /// Establish a session from `local` to `peer` using the peer's
    /// published bundle.
    ///
    /// Both parties must have created identities. Re-establishing replaces
    /// the existing session record without negotiation; an in-flight
    /// ratchet with the peer will desynchronize.
    pub async fn establish_session(&self, local: &str, peer: &str) -> Result<(), SessionError> {
        let store = self
            .store(local)
            .ok_or_else(|| SessionError::IdentityNotFound(local.to_string()))?;
        let bundle = self
            .directory
            .bundle(peer)
            .ok_or_else(|| SessionError::IdentityNotFound(peer.to_string()))?;

        let peer_address = party_address(peer);
        if store.has_session(&peer_address) {
            tracing::warn!(local, peer, "replacing an existing session for this address");
        }

        self.engine
            .begin_handshake(&store, &peer_address, &bundle)
            .await?;
        tracing::debug!(local, peer, "handshake complete");
        Ok(())
    }

    /// Encrypt a message from `from` addressed to `to` over the standing
    /// session (the send path; the result is handed to the pipeline).
    pub async fn encrypt_message(
        &self,
        from: &str,
        to: &str,
        plaintext: &[u8],
    ) -> Result<CiphertextPayload, SessionError> {
        let store = self
            .store(from)
            .ok_or_else(|| SessionError::IdentityNotFound(from.to_string()))?;
        Ok(self
            .engine
            .encrypt(&store, &party_address(to), plaintext)
            .await?)
    }

    pub fn has_identity(&self, name: &str) -> bool {
        self.parties.read().contains_key(name)
    }

    pub fn has_session(&self, local: &str, peer: &str) -> bool {
        self.store(local)
            .is_some_and(|store| store.has_session(&party_address(peer)))
    }

    pub fn registration_id(&self, name: &str) -> Option<u32> {
        self.store(name).map(|store| store.registration_id())
    }

    pub(crate) fn store(&self, name: &str) -> Option<Arc<ProtocolStore>> {
        self.parties.read().get(name).cloned()
    }

    pub(crate) fn engine(&self) -> Arc<dyn ProtocolEngine> {
        Arc::clone(&self.engine)
    }
}

#[cfg(test)]
mod tests {
    use confab_crypto::RatchetEngine;

    use super::*;

    fn orchestrator() -> SessionOrchestrator {
        SessionOrchestrator::new(Arc::new(RatchetEngine::new()), Arc::new(KeyDirectory::new()))
    }

    #[test]
    fn create_identity_publishes_bundle() {
        let orch = orchestrator();
        assert!(!orch.has_identity("duvan"));

        let registration_id = orch.create_identity("duvan");
        assert!(orch.has_identity("duvan"));
        assert_eq!(orch.registration_id("duvan"), Some(registration_id));
        assert!(orch.directory.bundle("duvan").is_some());
    }

    #[test]
    fn recreation_replaces_identity() {
        let orch = orchestrator();
        let _first = orch.create_identity("duvan");
        let second = orch.create_identity("duvan");
        assert_eq!(orch.registration_id("duvan"), Some(second));
    }

    #[tokio::test]
    async fn establish_requires_both_identities() {
        let orch = orchestrator();
        orch.create_identity("duvan");

        let result = orch.establish_session("duvan", "sebastian").await;
        assert!(matches!(result, Err(SessionError::IdentityNotFound(name)) if name == "sebastian"));

        let result = orch.establish_session("sebastian", "duvan").await;
        assert!(matches!(result, Err(SessionError::IdentityNotFound(name)) if name == "sebastian"));
    }

    #[tokio::test]
    async fn establish_records_session() {
        let orch = orchestrator();
        orch.create_identity("duvan");
        orch.create_identity("sebastian");
        assert!(!orch.has_session("duvan", "sebastian"));

        orch.establish_session("duvan", "sebastian").await.unwrap();
        assert!(orch.has_session("duvan", "sebastian"));
        // Establishment is one-sided until a handshake message is drained.
        assert!(!orch.has_session("sebastian", "duvan"));
    }
}
