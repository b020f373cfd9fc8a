use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CryptoError {
    #[error("peer identity key for {address} differs from the previously trusted key")]
    IdentityMismatch { address: String },

    #[error("malformed prekey bundle: {0}")]
    MalformedBundle(String),

    #[error("no session established with {address}")]
    NoSession { address: String },

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("prekey error: {0}")]
    PreKey(String),

    #[error("session error: {0}")]
    Session(String),
}
