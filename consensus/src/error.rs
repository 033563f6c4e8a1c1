/// Error taxonomy for the consensus core.
///
/// Most variants are handled per-event (the offending proposal or vote is
/// dropped and the replica keeps running). `SafetyBreach` is the one
/// variant callers should treat as fatal: it means the commit path did not
/// land on `b_exec`, which under the assumed fault threshold can only mean
/// a Byzantine supermajority has equivocated.
use crate::crypto::Hash;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("safety breach: commit path did not land on b_exec (expected {expected}, found {found})")]
    SafetyBreach { expected: Hash, found: Hash },

    #[error("block {0} not found in storage")]
    BlockNotFound(Hash),

    #[error("block {0} already delivered")]
    DoubleDelivery(Hash),

    #[error("signature error: {0}")]
    Signature(#[from] crate::crypto::SignatureError),

    #[error("hash error: {0}")]
    Hash(#[from] crate::crypto::hash::HashError),

    #[error("quorum certificate error: {0}")]
    QuorumCert(#[from] crate::quorum_cert::QcError),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
