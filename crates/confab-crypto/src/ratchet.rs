//! Default [`ProtocolEngine`]: X3DH handshake plus a symmetric ratchet.
//!
//! Session establishment derives sending/receiving chain keys from the
//! X3DH shared secret via HKDF-SHA256. Each message advances its chain by
//! one step and is encrypted with AES-256-GCM under a key derived from the
//! current chain key, so decryption is strictly order-dependent: applying
//! message N+1 before N desynchronizes the receiving chain. Preserving
//! arrival order is the message pipeline's job, not the engine's.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use hkdf::Hkdf;
use rand::Rng;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::address::ProtocolAddress;
use crate::engine::ProtocolEngine;
use crate::error::CryptoError;
use crate::keys::{peer_identity_to_x25519, verify_signature};
use crate::keys::{IdentityKeyPair, PreKeyPair, SignedPreKeyPair};
use crate::message::{CiphertextPayload, HandshakeHeader};
use crate::prekeys::PreKeyBundle;
use crate::store::ProtocolStore;

const X3DH_INFO: &[u8] = b"ConfabX3DH";
const MESSAGE_KEY_INFO: &[u8] = b"ConfabMessageKey";
const CHAIN_KEY_INFO: &[u8] = b"ConfabChainKey";

/// Counter prefix (8 bytes) plus the minimum AES-GCM output (16-byte tag).
const MIN_BODY_LEN: usize = 24;

/// Handshake material the initiator keeps until the peer acknowledges the
/// session, replayed in the header of every outgoing prekey message.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub(crate) struct PendingHandshake {
    ephemeral_public: [u8; 32],
    identity_key: [u8; 32],
    registration_id: u32,
    signed_pre_key_id: u32,
    one_time_pre_key_id: Option<u32>,
}

/// An established session's ratchet state.
///
/// Owned by exactly one party's [`ProtocolStore`], mutated in place by
/// every encrypt/decrypt call, never shared across parties.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct SessionState {
    sending_chain_key: [u8; 32],
    receiving_chain_key: [u8; 32],
    send_counter: u64,
    recv_counter: u64,
    /// Set on the initiator until the first inbound decrypt succeeds.
    pending: Option<PendingHandshake>,
    /// On the responder, the initiator ephemeral this session was derived
    /// from; lets repeated prekey messages reuse the session instead of
    /// re-running the handshake.
    remote_ephemeral: Option<[u8; 32]>,
}

/// Stateless engine; all session state lives in the caller's store.
#[derive(Debug, Default, Clone, Copy)]
pub struct RatchetEngine;

impl RatchetEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProtocolEngine for RatchetEngine {
    fn generate_registration_id(&self) -> u32 {
        rand::thread_rng().gen_range(1..16_384)
    }

    fn generate_identity_key_pair(&self) -> IdentityKeyPair {
        IdentityKeyPair::generate()
    }

    fn generate_pre_key(&self, id: u32) -> PreKeyPair {
        PreKeyPair::generate(id)
    }

    fn generate_signed_pre_key(&self, identity: &IdentityKeyPair, id: u32) -> SignedPreKeyPair {
        SignedPreKeyPair::generate(identity, id)
    }

    async fn begin_handshake(
        &self,
        store: &ProtocolStore,
        peer: &ProtocolAddress,
        bundle: &PreKeyBundle,
    ) -> Result<(), CryptoError> {
        let identity_key = validate_bundle(bundle)?;

        if !store.is_trusted_identity(peer, &bundle.identity_key) {
            return Err(CryptoError::IdentityMismatch {
                address: peer.to_string(),
            });
        }

        let our_identity = store
            .identity_key_pair()
            .ok_or_else(|| CryptoError::Session("local identity not created".into()))?;

        let their_identity = peer_identity_to_x25519(&identity_key)
            .map_err(|_| CryptoError::MalformedBundle("identity key is not a valid point".into()))?;
        let their_signed_pre_key = X25519Public::from(
            <[u8; 32]>::try_from(bundle.signed_pre_key.public_key.as_slice()).map_err(|_| {
                CryptoError::MalformedBundle("signed prekey has wrong length".into())
            })?,
        );

        let ephemeral = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let our_identity_x25519 = our_identity.to_x25519_secret();

        // X3DH: DH1 = DH(IK_a, SPK_b), DH2 = DH(EK_a, IK_b),
        // DH3 = DH(EK_a, SPK_b), DH4 = DH(EK_a, OPK_b) when available.
        let mut ikm = Vec::with_capacity(128);
        ikm.extend_from_slice(our_identity_x25519.diffie_hellman(&their_signed_pre_key).as_bytes());
        ikm.extend_from_slice(ephemeral.diffie_hellman(&their_identity).as_bytes());
        ikm.extend_from_slice(ephemeral.diffie_hellman(&their_signed_pre_key).as_bytes());

        let one_time_pre_key = bundle.one_time_pre_keys.first();
        if let Some(otpk) = one_time_pre_key {
            let their_one_time = X25519Public::from(
                <[u8; 32]>::try_from(otpk.public_key.as_slice()).map_err(|_| {
                    CryptoError::MalformedBundle("one-time prekey has wrong length".into())
                })?,
            );
            ikm.extend_from_slice(ephemeral.diffie_hellman(&their_one_time).as_bytes());
        }

        let (sending_chain_key, receiving_chain_key) = derive_chain_keys(&ikm)?;

        let state = SessionState {
            sending_chain_key,
            receiving_chain_key,
            send_counter: 0,
            recv_counter: 0,
            pending: Some(PendingHandshake {
                ephemeral_public: X25519Public::from(&ephemeral).to_bytes(),
                identity_key: our_identity.public_key_bytes(),
                registration_id: store.registration_id(),
                signed_pre_key_id: bundle.signed_pre_key.id,
                one_time_pre_key_id: one_time_pre_key.map(|k| k.id),
            }),
            remote_ephemeral: None,
        };

        store.store_session(peer, state);
        store.trust_identity(peer, &bundle.identity_key);
        tracing::debug!(peer = %peer, "session established as initiator");
        Ok(())
    }

    async fn encrypt(
        &self,
        store: &ProtocolStore,
        peer: &ProtocolAddress,
        plaintext: &[u8],
    ) -> Result<CiphertextPayload, CryptoError> {
        let mut state = store.session(peer).ok_or_else(|| CryptoError::NoSession {
            address: peer.to_string(),
        })?;

        let (message_key, next_chain_key) = derive_message_key(&state.sending_chain_key)?;
        state.sending_chain_key = next_chain_key;
        state.send_counter += 1;

        let cipher = Aes256Gcm::new_from_slice(&message_key)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;
        let nonce_bytes = counter_nonce(state.send_counter);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut body = Vec::with_capacity(8 + ciphertext.len());
        body.extend_from_slice(&state.send_counter.to_le_bytes());
        body.extend_from_slice(&ciphertext);

        let payload = match &state.pending {
            Some(pending) => CiphertextPayload::handshake(
                HandshakeHeader {
                    identity_key: pending.identity_key.to_vec(),
                    ephemeral_key: pending.ephemeral_public.to_vec(),
                    registration_id: pending.registration_id,
                    signed_pre_key_id: pending.signed_pre_key_id,
                    one_time_pre_key_id: pending.one_time_pre_key_id,
                },
                body,
            ),
            None => CiphertextPayload::ordinary(body),
        };

        store.update_session(peer, state);
        Ok(payload)
    }

    async fn decrypt_handshake_message(
        &self,
        store: &ProtocolStore,
        peer: &ProtocolAddress,
        payload: &CiphertextPayload,
    ) -> Result<Vec<u8>, CryptoError> {
        let header = payload
            .handshake
            .as_ref()
            .ok_or_else(|| CryptoError::Decryption("handshake payload missing header".into()))?;
        let ephemeral: [u8; 32] = header
            .ephemeral_key
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("ephemeral key has wrong length".into()))?;

        // Repeated prekey messages from the same handshake reuse the
        // session; a different ephemeral is a new handshake and replaces it.
        let established = store
            .session(peer)
            .is_some_and(|s| s.remote_ephemeral == Some(ephemeral));
        if !established {
            let state = respond_to_handshake(store, peer, header, ephemeral)?;
            store.store_session(peer, state);
            store.trust_identity(peer, &header.identity_key);
            tracing::debug!(
                peer = %peer,
                registration_id = header.registration_id,
                "session finalized as responder"
            );
        }

        let mut state = store.session(peer).ok_or_else(|| CryptoError::NoSession {
            address: peer.to_string(),
        })?;
        let plaintext = advance_decrypt(&mut state, &payload.body)?;
        store.update_session(peer, state);
        Ok(plaintext)
    }

    async fn decrypt_ordinary_message(
        &self,
        store: &ProtocolStore,
        peer: &ProtocolAddress,
        payload: &CiphertextPayload,
    ) -> Result<Vec<u8>, CryptoError> {
        let mut state = store.session(peer).ok_or_else(|| CryptoError::NoSession {
            address: peer.to_string(),
        })?;
        let plaintext = advance_decrypt(&mut state, &payload.body)?;
        store.update_session(peer, state);
        Ok(plaintext)
    }
}

/// Run the responder side of X3DH from a prekey message header.
///
/// Consumes the referenced one-time prekey; a second handshake against the
/// same bundle entry fails with [`CryptoError::PreKey`].
fn respond_to_handshake(
    store: &ProtocolStore,
    peer: &ProtocolAddress,
    header: &HandshakeHeader,
    ephemeral: [u8; 32],
) -> Result<SessionState, CryptoError> {
    if !store.is_trusted_identity(peer, &header.identity_key) {
        return Err(CryptoError::IdentityMismatch {
            address: peer.to_string(),
        });
    }

    let our_identity = store
        .identity_key_pair()
        .ok_or_else(|| CryptoError::Session("local identity not created".into()))?;
    let signed_pre_key = store
        .signed_pre_key(header.signed_pre_key_id)
        .ok_or_else(|| {
            CryptoError::PreKey(format!("unknown signed prekey id {}", header.signed_pre_key_id))
        })?;
    let one_time_pre_key = header
        .one_time_pre_key_id
        .map(|id| {
            store.take_pre_key(id).ok_or_else(|| {
                CryptoError::PreKey(format!("one-time prekey {id} unknown or already consumed"))
            })
        })
        .transpose()?;

    let identity_key: [u8; 32] = header
        .identity_key
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("identity key has wrong length".into()))?;
    let their_identity = peer_identity_to_x25519(&identity_key)?;
    let their_ephemeral = X25519Public::from(ephemeral);

    // Mirror of the initiator's DH1..DH4.
    let mut ikm = Vec::with_capacity(128);
    ikm.extend_from_slice(signed_pre_key.secret().diffie_hellman(&their_identity).as_bytes());
    ikm.extend_from_slice(
        our_identity
            .to_x25519_secret()
            .diffie_hellman(&their_ephemeral)
            .as_bytes(),
    );
    ikm.extend_from_slice(signed_pre_key.secret().diffie_hellman(&their_ephemeral).as_bytes());
    if let Some(otpk) = one_time_pre_key {
        ikm.extend_from_slice(otpk.secret().diffie_hellman(&their_ephemeral).as_bytes());
    }

    // The responder's receiving chain is the initiator's sending chain.
    let (their_sending, our_sending) = derive_chain_keys(&ikm)?;

    Ok(SessionState {
        sending_chain_key: our_sending,
        receiving_chain_key: their_sending,
        send_counter: 0,
        recv_counter: 0,
        pending: None,
        remote_ephemeral: Some(ephemeral),
    })
}

/// Structural checks on a published bundle; returns the identity key.
fn validate_bundle(bundle: &PreKeyBundle) -> Result<[u8; 32], CryptoError> {
    let identity_key: [u8; 32] = bundle
        .identity_key
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::MalformedBundle("identity key has wrong length".into()))?;
    let signature: [u8; 64] = bundle
        .signed_pre_key
        .signature
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::MalformedBundle("signed prekey signature wrong length".into()))?;

    verify_signature(&identity_key, &bundle.signed_pre_key.public_key, &signature)
        .map_err(|_| CryptoError::MalformedBundle("signed prekey signature invalid".into()))?;

    Ok(identity_key)
}

/// Decrypt a message body against the receiving chain, advancing it.
///
/// A successful inbound decrypt also acknowledges the session: any pending
/// handshake material is dropped, so later messages go out as ordinary.
fn advance_decrypt(state: &mut SessionState, body: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if body.len() < MIN_BODY_LEN {
        return Err(CryptoError::Decryption("message body too short".into()));
    }
    let counter = u64::from_le_bytes(
        body[..8]
            .try_into()
            .map_err(|_| CryptoError::Decryption("invalid message counter".into()))?,
    );
    let expected = state.recv_counter + 1;
    if counter != expected {
        return Err(CryptoError::Decryption(format!(
            "message counter {counter} out of order (expected {expected})"
        )));
    }

    let (message_key, next_chain_key) = derive_message_key(&state.receiving_chain_key)?;
    let cipher = Aes256Gcm::new_from_slice(&message_key)
        .map_err(|e| CryptoError::Decryption(e.to_string()))?;
    let nonce_bytes = counter_nonce(counter);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), &body[8..])
        .map_err(|e| CryptoError::Decryption(e.to_string()))?;

    state.receiving_chain_key = next_chain_key;
    state.recv_counter += 1;
    state.pending = None;
    Ok(plaintext)
}

/// Derive (initiator-sending, initiator-receiving) chain keys from the
/// X3DH shared secret material.
fn derive_chain_keys(ikm: &[u8]) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; 64];
    hk.expand(X3DH_INFO, &mut okm)
        .map_err(|e| CryptoError::Session(format!("HKDF expand failed: {e}")))?;

    let mut sending = [0u8; 32];
    let mut receiving = [0u8; 32];
    sending.copy_from_slice(&okm[..32]);
    receiving.copy_from_slice(&okm[32..]);
    Ok((sending, receiving))
}

/// Derive the per-message AEAD key and the next chain key.
fn derive_message_key(chain_key: &[u8; 32]) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, chain_key);
    let mut message_key = [0u8; 32];
    let mut next_chain_key = [0u8; 32];
    hk.expand(MESSAGE_KEY_INFO, &mut message_key)
        .map_err(|e| CryptoError::Session(format!("HKDF expand failed: {e}")))?;
    hk.expand(CHAIN_KEY_INFO, &mut next_chain_key)
        .map_err(|e| CryptoError::Session(format!("HKDF expand failed: {e}")))?;
    Ok((message_key, next_chain_key))
}

fn counter_nonce(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&counter.to_le_bytes());
    nonce
}
