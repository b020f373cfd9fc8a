use confab_crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// A directory or party lookup was made before an identity exists.
    #[error("no identity exists for {0}")]
    IdentityNotFound(String),

    /// A payload carried a discriminant the pipeline does not recognize.
    /// Reported explicitly; never treated as empty plaintext.
    #[error("unknown payload kind tag {0}")]
    UnknownPayloadKind(u8),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
