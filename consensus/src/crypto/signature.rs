/// Per-replica partial signatures (secp256k1 / ECDSA).
///
/// Each replica signs a quorum certificate's object hash independently;
/// `quorum_cert::QuorumCert` collects these until quorum rather than
/// combining them into a single aggregate, so the individual signature
/// bytes must round-trip through `to_bytes`/`from_bytes`.
use k256::ecdsa::{
    signature::{Signer, Verifier},
    Signature as K256Signature, SigningKey, VerifyingKey,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("invalid signature bytes")]
    InvalidSignature,
    #[error("invalid key bytes")]
    InvalidKey,
}

/// This replica's signing key.
#[derive(Clone)]
pub struct ReplicaSigningKey {
    inner: SigningKey,
}

impl ReplicaSigningKey {
    pub fn generate() -> Self {
        Self {
            inner: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        let inner = SigningKey::from_bytes(bytes.into()).map_err(|_| SignatureError::InvalidKey)?;
        Ok(Self { inner })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.to_bytes().to_vec()
    }

    pub fn public_key(&self) -> ReplicaPublicKey {
        ReplicaPublicKey {
            inner: *self.inner.verifying_key(),
        }
    }
}

/// A peer's verifying key, as listed in the replica directory.
#[derive(Clone, Debug)]
pub struct ReplicaPublicKey {
    inner: VerifyingKey,
}

impl ReplicaPublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        let inner = VerifyingKey::from_sec1_bytes(bytes).map_err(|_| SignatureError::InvalidKey)?;
        Ok(Self { inner })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.to_sec1_bytes().to_vec()
    }
}

/// One replica's partial signature over a quorum certificate's object hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartialSignature {
    inner: Vec<u8>,
}

impl PartialSignature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        // Round-trip through k256's fixed-size representation to reject
        // malformed signatures eagerly, but retain DER-free fixed bytes for
        // the wire format.
        K256Signature::from_bytes(bytes.into()).map_err(|_| SignatureError::InvalidSignature)?;
        Ok(Self {
            inner: bytes.to_vec(),
        })
    }

    pub fn to_bytes(&self) -> &[u8] {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// An empty stand-in for a signature this replica never itself
    /// verified bytes for: reconstructing a remote block's justify-QC only
    /// needs its signer set, never the underlying signature bytes, since
    /// that QC is never re-serialized or re-checked locally.
    pub(crate) fn placeholder() -> Self {
        Self { inner: Vec::new() }
    }
}

/// Sign `message` (a 32-byte object hash) with this replica's key.
pub fn sign(key: &ReplicaSigningKey, message: &[u8]) -> PartialSignature {
    let signature: K256Signature = key.inner.sign(message);
    PartialSignature {
        inner: signature.to_bytes().to_vec(),
    }
}

/// Verify a partial signature against the signer's public key.
pub fn verify(
    public_key: &ReplicaPublicKey,
    message: &[u8],
    signature: &PartialSignature,
) -> Result<bool, SignatureError> {
    let sig = K256Signature::from_bytes(signature.inner.as_slice().into())
        .map_err(|_| SignatureError::InvalidSignature)?;
    Ok(public_key.inner.verify(message, &sig).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_succeeds() {
        let key = ReplicaSigningKey::generate();
        let public = key.public_key();
        let message = [7u8; 32];

        let signature = sign(&key, &message);
        assert!(verify(&public, &message, &signature).unwrap());
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let key = ReplicaSigningKey::generate();
        let public = key.public_key();
        let signature = sign(&key, &[1u8; 32]);

        assert!(!verify(&public, &[2u8; 32], &signature).unwrap());
    }

    #[test]
    fn public_key_round_trips_through_bytes() {
        let key = ReplicaSigningKey::generate();
        let public = key.public_key();
        let restored = ReplicaPublicKey::from_bytes(&public.to_bytes()).unwrap();

        let message = [9u8; 32];
        let signature = sign(&key, &message);
        assert!(verify(&restored, &message, &signature).unwrap());
    }

    #[test]
    fn partial_signature_round_trips_through_bytes() {
        let key = ReplicaSigningKey::generate();
        let signature = sign(&key, &[3u8; 32]);
        let restored = PartialSignature::from_bytes(signature.to_bytes()).unwrap();
        assert_eq!(signature, restored);
    }
}
