/// BFT consensus core derived from three-phase HotStuff.
///
/// This crate implements the block DAG, the pipelined voting and commit
/// rule, quorum-certificate aggregation, and the Coordinator bridge that
/// asks an external ledger process whether a proposed command batch is
/// admissible before the replica votes on it. View-change/pacemaker logic,
/// disk persistence of the DAG, and inter-replica networking are left as
/// collaborator traits the core depends on rather than concrete code.
pub mod block;
pub mod config;
pub mod coordinator_bridge;
pub mod core;
pub mod crypto;
pub mod error;
pub mod promise;
pub mod quorum_cert;
pub mod storage;
pub mod types;

pub use block::Block;
pub use config::ReplicaConfig;
pub use core::{ConsensusCore, ConsensusHooks};
pub use crypto::Hash;
pub use error::ConsensusError;
pub use quorum_cert::QuorumCert;
pub use types::{Finality, ReplicaId, Vote};
