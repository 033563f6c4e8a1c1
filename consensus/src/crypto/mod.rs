/// Cryptographic primitives used by the consensus core.
///
/// Hashing and per-replica partial signatures. There is no threshold/BLS
/// aggregation here: the quorum certificate wire format requires recovering
/// each individual signer's signature bytes, so partial signatures are kept
/// distinct rather than combined into one constant-size aggregate.
pub mod hash;
pub mod signature;

pub use hash::{hash_data, Hash, HashFunction};
pub use signature::{sign, verify, PartialSignature, ReplicaPublicKey, ReplicaSigningKey, SignatureError};
