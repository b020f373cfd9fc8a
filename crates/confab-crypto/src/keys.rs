use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// A party's long-term Ed25519 identity key pair.
///
/// The private half never leaves the owning [`crate::ProtocolStore`]. The
/// public half is the party's identity on the directory and doubles as the
/// X3DH identity key via the Edwards→Montgomery map.
#[derive(Clone, ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    signing_key: SigningKey,
}

impl IdentityKeyPair {
    /// Generate a new random identity key pair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Public key as raw bytes (32 bytes).
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign a message with the identity's private key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Derive the X25519 static secret for Diffie-Hellman.
    ///
    /// Uses the SHA-512-expanded scalar (the same scalar Ed25519 uses
    /// internally) so it matches [`peer_identity_to_x25519`] applied to our
    /// own public key.
    pub fn to_x25519_secret(&self) -> StaticSecret {
        StaticSecret::from(self.signing_key.to_scalar_bytes())
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish()
    }
}

/// Convert a peer's Ed25519 public key bytes to an X25519 public key via
/// the standard Edwards→Montgomery birational map (RFC 7748).
pub fn peer_identity_to_x25519(
    ed25519_public_bytes: &[u8; 32],
) -> Result<X25519Public, CryptoError> {
    let verifying_key = VerifyingKey::from_bytes(ed25519_public_bytes)
        .map_err(|e| CryptoError::InvalidKey(format!("invalid Ed25519 public key: {e}")))?;
    Ok(X25519Public::from(verifying_key.to_montgomery().to_bytes()))
}

/// Verify an Ed25519 signature made by the holder of `public_key_bytes`.
pub fn verify_signature(
    public_key_bytes: &[u8; 32],
    message: &[u8],
    signature_bytes: &[u8; 64],
) -> Result<(), CryptoError> {
    let verifying_key = VerifyingKey::from_bytes(public_key_bytes)
        .map_err(|e| CryptoError::InvalidKey(format!("invalid Ed25519 public key: {e}")))?;
    let signature = Signature::from_bytes(signature_bytes);
    verifying_key
        .verify(message, &signature)
        .map_err(|e| CryptoError::InvalidKey(format!("signature verification failed: {e}")))
}

/// A one-time X25519 prekey pair, intended for a single handshake.
#[derive(Clone)]
pub struct PreKeyPair {
    id: u32,
    secret: StaticSecret,
}

impl PreKeyPair {
    pub fn generate(id: u32) -> Self {
        Self {
            id,
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn public_key(&self) -> [u8; 32] {
        X25519Public::from(&self.secret).to_bytes()
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

/// A signed X25519 prekey pair: the key plus the identity's signature over
/// its public half.
#[derive(Clone)]
pub struct SignedPreKeyPair {
    id: u32,
    secret: StaticSecret,
    signature: [u8; 64],
}

impl SignedPreKeyPair {
    /// Generate a signed prekey, signing the public half with `identity`.
    pub fn generate(identity: &IdentityKeyPair, id: u32) -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        let signature = identity.sign(public.as_bytes()).to_bytes();
        Self {
            id,
            secret,
            signature,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn public_key(&self) -> [u8; 32] {
        X25519Public::from(&self.secret).to_bytes()
    }

    pub fn signature(&self) -> &[u8; 64] {
        &self.signature
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_prekey_signature_verifies() {
        let identity = IdentityKeyPair::generate();
        let signed = SignedPreKeyPair::generate(&identity, 42);

        assert!(verify_signature(
            &identity.public_key_bytes(),
            &signed.public_key(),
            signed.signature(),
        )
        .is_ok());
    }

    #[test]
    fn signature_from_other_identity_rejected() {
        let identity = IdentityKeyPair::generate();
        let other = IdentityKeyPair::generate();
        let signed = SignedPreKeyPair::generate(&identity, 1);

        assert!(verify_signature(
            &other.public_key_bytes(),
            &signed.public_key(),
            signed.signature(),
        )
        .is_err());
    }

    #[test]
    fn peer_conversion_matches_own_derivation() {
        let identity = IdentityKeyPair::generate();
        let from_secret = X25519Public::from(&identity.to_x25519_secret());
        let from_public = peer_identity_to_x25519(&identity.public_key_bytes()).unwrap();
        assert_eq!(from_secret.as_bytes(), from_public.as_bytes());
    }

    #[test]
    fn peer_x25519_agreement() {
        let alice = IdentityKeyPair::generate();
        let bob = IdentityKeyPair::generate();

        let shared_a = alice
            .to_x25519_secret()
            .diffie_hellman(&peer_identity_to_x25519(&bob.public_key_bytes()).unwrap());
        let shared_b = bob
            .to_x25519_secret()
            .diffie_hellman(&peer_identity_to_x25519(&alice.public_key_bytes()).unwrap());

        assert_eq!(shared_a.as_bytes(), shared_b.as_bytes());
    }
}
