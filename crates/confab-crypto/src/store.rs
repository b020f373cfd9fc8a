//! Per-party identity store.
//!
//! Holds a party's long-term key material, prekeys, negotiated sessions,
//! and the identity keys it has trusted for each peer address (TOFU).
//! Everything is in-memory and owned exclusively by one party; queries
//! return deterministic defaults when material is absent so presentation
//! code can safely inspect state before an identity exists.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use crate::address::ProtocolAddress;
use crate::keys::{IdentityKeyPair, PreKeyPair, SignedPreKeyPair};
use crate::ratchet::SessionState;

struct SessionRecord {
    state: SessionState,
    /// Set when a drain classified a decrypt failure as ratchet
    /// corruption; cleared by the next session establishment.
    poisoned: bool,
}

/// A party's durable record of its own cryptographic material and sessions.
#[derive(Default)]
pub struct ProtocolStore {
    registration_id: Mutex<Option<u32>>,
    identity: RwLock<Option<IdentityKeyPair>>,
    pre_keys: Mutex<HashMap<u32, PreKeyPair>>,
    signed_pre_keys: Mutex<HashMap<u32, SignedPreKeyPair>>,
    sessions: Mutex<HashMap<ProtocolAddress, SessionRecord>>,
    trusted: Mutex<HashMap<ProtocolAddress, Vec<u8>>>,
}

impl ProtocolStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_registration_id(&self, id: u32) {
        *self.registration_id.lock() = Some(id);
    }

    /// The party's registration id, or 0 before an identity exists.
    pub fn registration_id(&self) -> u32 {
        self.registration_id.lock().unwrap_or(0)
    }

    pub fn set_identity_key_pair(&self, identity: IdentityKeyPair) {
        *self.identity.write() = Some(identity);
    }

    pub fn identity_key_pair(&self) -> Option<IdentityKeyPair> {
        self.identity.read().clone()
    }

    pub fn store_pre_key(&self, pre_key: PreKeyPair) {
        self.pre_keys.lock().insert(pre_key.id(), pre_key);
    }

    /// Remove and return a one-time prekey, consuming it.
    pub fn take_pre_key(&self, id: u32) -> Option<PreKeyPair> {
        self.pre_keys.lock().remove(&id)
    }

    pub fn has_pre_key(&self, id: u32) -> bool {
        self.pre_keys.lock().contains_key(&id)
    }

    pub fn store_signed_pre_key(&self, signed_pre_key: SignedPreKeyPair) {
        self.signed_pre_keys
            .lock()
            .insert(signed_pre_key.id(), signed_pre_key);
    }

    pub fn signed_pre_key(&self, id: u32) -> Option<SignedPreKeyPair> {
        self.signed_pre_keys.lock().get(&id).cloned()
    }

    /// Record a freshly established session, replacing any prior record
    /// for the address and clearing its poison flag.
    pub fn store_session(&self, address: &ProtocolAddress, state: SessionState) {
        self.sessions.lock().insert(
            address.clone(),
            SessionRecord {
                state,
                poisoned: false,
            },
        );
    }

    /// Write back ratchet state advanced by an encrypt/decrypt call.
    ///
    /// Unlike [`ProtocolStore::store_session`] this preserves the poison
    /// flag; only a new establishment clears it.
    pub fn update_session(&self, address: &ProtocolAddress, state: SessionState) {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(address) {
            Some(record) => record.state = state,
            None => {
                sessions.insert(
                    address.clone(),
                    SessionRecord {
                        state,
                        poisoned: false,
                    },
                );
            }
        }
    }

    pub fn session(&self, address: &ProtocolAddress) -> Option<SessionState> {
        self.sessions
            .lock()
            .get(address)
            .map(|record| record.state.clone())
    }

    pub fn has_session(&self, address: &ProtocolAddress) -> bool {
        self.sessions.lock().contains_key(address)
    }

    /// Mark a session as corrupted so further traffic fails fast until it
    /// is re-established.
    pub fn poison_session(&self, address: &ProtocolAddress) {
        if let Some(record) = self.sessions.lock().get_mut(address) {
            record.poisoned = true;
        }
    }

    pub fn is_session_poisoned(&self, address: &ProtocolAddress) -> bool {
        self.sessions
            .lock()
            .get(address)
            .is_some_and(|record| record.poisoned)
    }

    /// Check a peer's identity key against the trusted record.
    ///
    /// Trust-on-first-use: an address with no recorded key is trusted.
    pub fn is_trusted_identity(&self, address: &ProtocolAddress, identity_key: &[u8]) -> bool {
        match self.trusted.lock().get(address) {
            Some(stored) => stored == identity_key,
            None => true,
        }
    }

    pub fn trust_identity(&self, address: &ProtocolAddress, identity_key: &[u8]) {
        self.trusted
            .lock()
            .insert(address.clone(), identity_key.to_vec());
    }
}
