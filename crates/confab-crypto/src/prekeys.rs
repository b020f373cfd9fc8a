//! Published prekey bundle records.
//!
//! A bundle is the public-only projection of an identity, published to the
//! key directory so that peers can initiate a handshake asynchronously. It
//! carries no private material and is immutable once published.

use serde::{Deserialize, Serialize};

/// Public half of a signed prekey, with the identity's signature over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreKeyPublic {
    pub id: u32,
    /// X25519 public key (32 bytes).
    pub public_key: Vec<u8>,
    /// Ed25519 signature by the identity key (64 bytes).
    pub signature: Vec<u8>,
}

/// Public half of a one-time prekey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimePreKeyPublic {
    pub id: u32,
    /// X25519 public key (32 bytes).
    pub public_key: Vec<u8>,
}

/// A published key bundle for session establishment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyBundle {
    pub registration_id: u32,
    /// Ed25519 identity public key (32 bytes).
    pub identity_key: Vec<u8>,
    pub signed_pre_key: SignedPreKeyPublic,
    /// Ordered one-time prekeys; each is intended for a single handshake.
    pub one_time_pre_keys: Vec<OneTimePreKeyPublic>,
}
