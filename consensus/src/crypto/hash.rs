/// Content hashing for blocks and command identifiers.
///
/// Supports SHA-256 (wide compatibility) and BLAKE3 (the default, faster on
/// large inputs).
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const HASH_SIZE: usize = 32;

#[derive(Error, Debug)]
pub enum HashError {
    #[error("Invalid hash size")]
    InvalidSize,
}

/// Hash output (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    pub fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, HashError> {
        if slice.len() != HASH_SIZE {
            return Err(HashError::InvalidSize);
        }
        let mut bytes = [0u8; HASH_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Genesis hash (all zeros)
    pub fn genesis() -> Self {
        Self([0u8; HASH_SIZE])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(&self.0))
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Hash function selection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashFunction {
    /// SHA-256 (compatibility)
    Sha256,
    /// BLAKE3 (performance)
    Blake3,
}

impl Default for HashFunction {
    fn default() -> Self {
        // Default to BLAKE3 for performance
        Self::Blake3
    }
}

/// Hash arbitrary data
pub fn hash_data(data: &[u8]) -> Hash {
    hash_data_with(data, HashFunction::default())
}

/// Hash data with specific function
pub fn hash_data_with(data: &[u8], function: HashFunction) -> Hash {
    match function {
        HashFunction::Sha256 => {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(data);
            let result = hasher.finalize();
            Hash::new(result.into())
        }
        HashFunction::Blake3 => {
            let result = blake3::hash(data);
            Hash::new(*result.as_bytes())
        }
    }
}
