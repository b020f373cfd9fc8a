//! Ciphertext payloads exchanged between parties.
//!
//! Payloads carry a numeric tag on the wire-facing boundary: tag 3 is a
//! prekey-handshake message (the initiator's messages until the session is
//! acknowledged), tag 1 an ordinary session message. Any other tag must be
//! reported as unknown by the consumer, never treated as empty plaintext.

/// Tag for an ordinary session message.
pub const ORDINARY_MESSAGE_TAG: u8 = 1;

/// Tag for a prekey-handshake message.
pub const PREKEY_MESSAGE_TAG: u8 = 3;

/// The recognized payload kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Carries a [`HandshakeHeader`]; decryption finalizes the responder
    /// session on first use.
    Handshake,
    /// Decrypted against a standing session.
    Ordinary,
}

impl PayloadKind {
    /// Map a raw tag to a kind; `None` for unrecognized tags.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            PREKEY_MESSAGE_TAG => Some(Self::Handshake),
            ORDINARY_MESSAGE_TAG => Some(Self::Ordinary),
            _ => None,
        }
    }
}

/// Handshake material prepended to the initiator's messages until the
/// peer has acknowledged the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeHeader {
    /// Initiator's Ed25519 identity public key.
    pub identity_key: Vec<u8>,
    /// Initiator's ephemeral X25519 public key.
    pub ephemeral_key: Vec<u8>,
    /// Initiator's registration id.
    pub registration_id: u32,
    /// Id of the responder's signed prekey used in the handshake.
    pub signed_pre_key_id: u32,
    /// Id of the responder's one-time prekey used, if any.
    pub one_time_pre_key_id: Option<u32>,
}

/// An opaque encrypted message plus its payload discriminant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiphertextPayload {
    pub tag: u8,
    /// Present exactly when `tag` is [`PREKEY_MESSAGE_TAG`].
    pub handshake: Option<HandshakeHeader>,
    /// Message counter (8 bytes LE) followed by the AEAD ciphertext.
    pub body: Vec<u8>,
}

impl CiphertextPayload {
    pub fn ordinary(body: Vec<u8>) -> Self {
        Self {
            tag: ORDINARY_MESSAGE_TAG,
            handshake: None,
            body,
        }
    }

    pub fn handshake(header: HandshakeHeader, body: Vec<u8>) -> Self {
        Self {
            tag: PREKEY_MESSAGE_TAG,
            handshake: Some(header),
            body,
        }
    }
}
