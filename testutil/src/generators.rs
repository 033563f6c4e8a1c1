/// Test data generators
use consensus::crypto::Hash;
use rand::Rng;

/// Generate random bytes
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

/// Generate random message for testing
pub fn random_message() -> Vec<u8> {
    random_bytes(32)
}

/// A random 32-byte command identifier.
pub fn random_command_id() -> Hash {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    Hash::new(bytes)
}

