/// Static quorum parameters and the peer directory, loaded from a TOML
/// file the same way the rest of the workspace loads its configuration:
/// `serde` derives with `#[serde(default)]` on fields that have a sane
/// fallback, read through `std::fs` rather than a bespoke parser.
use crate::crypto::signature::ReplicaPublicKey;
use crate::error::ConsensusError;
use crate::types::ReplicaId;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerInfo {
    pub rid: ReplicaId,
    pub address: String,
    pub public_key: String,
}

impl PeerInfo {
    pub fn public_key(&self) -> Result<ReplicaPublicKey, ConsensusError> {
        let bytes = hex::decode(&self.public_key)
            .map_err(|e| ConsensusError::Config(format!("invalid public_key hex: {e}")))?;
        ReplicaPublicKey::from_bytes(&bytes).map_err(ConsensusError::Signature)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicaConfig {
    pub replica_id: ReplicaId,
    pub nreplicas: u16,
    pub nfaulty: u16,
    #[serde(default)]
    pub replica_directory: Vec<PeerInfo>,
    pub private_key: String,
    pub coordinator_listen_port: u16,
    pub coordinator_send_port: u16,
    pub iri_send_port: u16,
    pub iri_listen_port: u16,
    #[serde(default)]
    pub two_step_mode: bool,
    #[serde(default)]
    pub vote_disabled: bool,
    /// Staleness window, in block heights, retained behind `b_exec` before
    /// `ConsensusCore::prune` detaches a block. Not part of the original
    /// wire/config contract but needed to drive pruning from the replica
    /// binary; defaults to a generous window.
    #[serde(default = "default_staleness")]
    pub staleness: u64,
    /// Which replica proposes. Static for the lifetime of a run; there is
    /// no pacemaker/view-change here to rotate it.
    #[serde(default)]
    pub leader_id: ReplicaId,
}

fn default_staleness() -> u64 {
    10
}

impl ReplicaConfig {
    /// `nreplicas - nfaulty`: the number of votes required for quorum.
    pub fn nmajority(&self) -> usize {
        (self.nreplicas - self.nfaulty) as usize
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConsensusError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConsensusError> {
        toml::from_str(contents).map_err(|e| ConsensusError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nmajority_is_nreplicas_minus_nfaulty() {
        let cfg = ReplicaConfig {
            replica_id: 0,
            nreplicas: 4,
            nfaulty: 1,
            replica_directory: Vec::new(),
            private_key: String::new(),
            coordinator_listen_port: 10000,
            coordinator_send_port: 10001,
            iri_send_port: 10002,
            iri_listen_port: 10003,
            two_step_mode: false,
            vote_disabled: false,
            staleness: 10,
            leader_id: 0,
        };
        assert_eq!(cfg.nmajority(), 3);
    }

    #[test]
    fn parses_minimal_toml() {
        let toml = r#"
            replica_id = 0
            nreplicas = 4
            nfaulty = 1
            private_key = "00"
            coordinator_listen_port = 10000
            coordinator_send_port = 10001
            iri_send_port = 10002
            iri_listen_port = 10003
        "#;
        let cfg = ReplicaConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.nmajority(), 3);
        assert!(!cfg.two_step_mode);
        assert_eq!(cfg.staleness, 10);
    }

    #[test]
    fn from_toml_file_reads_a_config_off_disk() {
        let toml = r#"
            replica_id = 2
            nreplicas = 4
            nfaulty = 1
            private_key = "00"
            coordinator_listen_port = 10000
            coordinator_send_port = 10001
            iri_send_port = 10002
            iri_listen_port = 10003
            leader_id = 0

            [[replica_directory]]
            rid = 0
            address = "127.0.0.1:9000"
            public_key = "abcd"
        "#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, toml.as_bytes()).unwrap();

        let cfg = ReplicaConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(cfg.replica_id, 2);
        assert_eq!(cfg.replica_directory.len(), 1);
        assert_eq!(cfg.replica_directory[0].rid, 0);
    }
}
