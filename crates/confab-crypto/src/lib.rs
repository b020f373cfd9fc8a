//! Cryptographic protocol engine for Confab 1:1 messaging.
//!
//! Provides the key material types, the per-party [`ProtocolStore`], the
//! [`ProtocolEngine`] capability trait consumed by the session layer, and
//! [`RatchetEngine`], an X3DH + symmetric-ratchet implementation of it.

pub mod address;
pub mod engine;
pub mod error;
pub mod keys;
pub mod message;
pub mod prekeys;
pub mod ratchet;
pub mod store;

pub use address::ProtocolAddress;
pub use engine::ProtocolEngine;
pub use error::CryptoError;
pub use keys::{IdentityKeyPair, PreKeyPair, SignedPreKeyPair};
pub use message::{
    CiphertextPayload, HandshakeHeader, PayloadKind, ORDINARY_MESSAGE_TAG, PREKEY_MESSAGE_TAG,
};
pub use prekeys::{OneTimePreKeyPublic, PreKeyBundle, SignedPreKeyPublic};
pub use ratchet::RatchetEngine;
pub use store::ProtocolStore;
