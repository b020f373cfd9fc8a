use async_trait::async_trait;

use crate::address::ProtocolAddress;
use crate::error::CryptoError;
use crate::keys::{IdentityKeyPair, PreKeyPair, SignedPreKeyPair};
use crate::message::CiphertextPayload;
use crate::prekeys::PreKeyBundle;
use crate::store::ProtocolStore;

/// The cryptographic capability consumed by the session layer.
///
/// Every operation runs against the calling party's own [`ProtocolStore`];
/// the engine is the only writer of session ratchet state, and callers
/// must never invoke it concurrently for the same peer address.
/// Handshake and cipher calls are async because an engine may perform its
/// key-derivation work off-thread.
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    /// Generate a fresh registration id.
    fn generate_registration_id(&self) -> u32;

    /// Generate a long-term identity key pair.
    fn generate_identity_key_pair(&self) -> IdentityKeyPair;

    /// Generate a one-time prekey pair.
    fn generate_pre_key(&self, id: u32) -> PreKeyPair;

    /// Generate a signed prekey pair, signed by `identity`.
    fn generate_signed_pre_key(&self, identity: &IdentityKeyPair, id: u32) -> SignedPreKeyPair;

    /// Run the initiator side of the handshake against a peer's published
    /// bundle, writing the new session into `store`.
    ///
    /// Fails with [`CryptoError::IdentityMismatch`] when the bundle's
    /// identity key differs from a previously trusted key for `peer`, or
    /// [`CryptoError::MalformedBundle`] when the bundle is invalid.
    async fn begin_handshake(
        &self,
        store: &ProtocolStore,
        peer: &ProtocolAddress,
        bundle: &PreKeyBundle,
    ) -> Result<(), CryptoError>;

    /// Encrypt a message for `peer`, advancing the session's sending chain.
    async fn encrypt(
        &self,
        store: &ProtocolStore,
        peer: &ProtocolAddress,
        plaintext: &[u8],
    ) -> Result<CiphertextPayload, CryptoError>;

    /// Decrypt a prekey-handshake message from `peer`, finalizing the
    /// responder session on first use.
    async fn decrypt_handshake_message(
        &self,
        store: &ProtocolStore,
        peer: &ProtocolAddress,
        payload: &CiphertextPayload,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt an ordinary message from `peer` against the standing
    /// session, advancing its receiving chain.
    async fn decrypt_ordinary_message(
        &self,
        store: &ProtocolStore,
        peer: &ProtocolAddress,
        payload: &CiphertextPayload,
    ) -> Result<Vec<u8>, CryptoError>;
}
