/// Test doubles and cluster-construction helpers for exercising
/// `ConsensusCore` without a real Coordinator, network, or ledger.
use async_trait::async_trait;
use consensus::config::{PeerInfo, ReplicaConfig};
use consensus::core::ConsensusHooks;
use consensus::crypto::{Hash, ReplicaSigningKey};
use consensus::types::{CommandId, Finality, ReplicaId, Vote};
use consensus::Block;
use std::sync::Mutex;

/// A `ConsensusHooks` implementation that records every call instead of
/// touching a socket. `check_cmds` returns `legal` for every batch unless
/// overridden per test, modeling the ledger validator's yes/no answer.
pub struct NullHooks {
    pub broadcasts: Mutex<Vec<Hash>>,
    pub votes: Mutex<Vec<Vote>>,
    pub decisions: Mutex<Vec<Finality>>,
    pub acks: Mutex<u32>,
    pub qc_frames: Mutex<Vec<Vec<u8>>>,
    pub legal: Mutex<bool>,
}

impl Default for NullHooks {
    fn default() -> Self {
        Self {
            broadcasts: Mutex::new(Vec::new()),
            votes: Mutex::new(Vec::new()),
            decisions: Mutex::new(Vec::new()),
            acks: Mutex::new(0),
            qc_frames: Mutex::new(Vec::new()),
            legal: Mutex::new(true),
        }
    }
}

impl NullHooks {
    pub fn reject_commands(&self) {
        *self.legal.lock().unwrap() = false;
    }

    pub fn take_broadcasts(&self) -> Vec<Hash> {
        std::mem::take(&mut self.broadcasts.lock().unwrap())
    }

    pub fn take_votes(&self) -> Vec<Vote> {
        std::mem::take(&mut self.votes.lock().unwrap())
    }

    pub fn decided_blocks(&self) -> Vec<Hash> {
        self.decisions.lock().unwrap().iter().map(|f| f.block_hash).collect()
    }
}

#[async_trait]
impl ConsensusHooks for NullHooks {
    async fn do_broadcast_proposal(&self, block: &Block) {
        self.broadcasts.lock().unwrap().push(block.hash());
    }

    async fn do_vote(&self, vote: Vote) {
        self.votes.lock().unwrap().push(vote);
    }

    fn do_consensus(&self, _block: &Block) {}

    fn do_decide(&self, finality: Finality) {
        self.decisions.lock().unwrap().push(finality);
    }

    async fn check_cmds(&self, _commands: &[CommandId]) -> bool {
        *self.legal.lock().unwrap()
    }

    async fn notify_coordinator_ack(&self) {
        *self.acks.lock().unwrap() += 1;
    }

    async fn notify_coordinator_qc(&self, bytes: Vec<u8>) {
        self.qc_frames.lock().unwrap().push(bytes);
    }
}

/// One simulated replica: its signing key plus the `ReplicaConfig` it would
/// load from TOML, with `replica_directory` already populated from the
/// whole cluster's public keys.
pub struct ClusterMember {
    pub config: ReplicaConfig,
    pub signing_key: ReplicaSigningKey,
}

/// Build `nreplicas` configs sharing one quorum (`nmajority = nreplicas -
/// nfaulty`), each with a freshly generated signing key and the full peer
/// directory populated. Port numbers are placeholders; nothing in these
/// tests binds a socket.
pub fn build_cluster(nreplicas: u16, nfaulty: u16) -> Vec<ClusterMember> {
    let keys: Vec<ReplicaSigningKey> = (0..nreplicas).map(|_| ReplicaSigningKey::generate()).collect();
    let directory: Vec<PeerInfo> = keys
        .iter()
        .enumerate()
        .map(|(i, key)| PeerInfo {
            rid: i as ReplicaId,
            address: format!("127.0.0.1:{}", 20000 + i),
            public_key: hex::encode(key.public_key().to_bytes()),
        })
        .collect();

    keys.into_iter()
        .enumerate()
        .map(|(i, signing_key)| ClusterMember {
            config: ReplicaConfig {
                replica_id: i as ReplicaId,
                nreplicas,
                nfaulty,
                replica_directory: directory.clone(),
                private_key: hex::encode(signing_key.to_bytes()),
                coordinator_listen_port: 0,
                coordinator_send_port: 0,
                iri_send_port: 0,
                iri_listen_port: 0,
                two_step_mode: false,
                vote_disabled: false,
                staleness: 10,
                leader_id: 0,
            },
            signing_key,
        })
        .collect()
}

/// A proposal's command batch is, by protocol convention, exactly six
/// 32-byte identifiers; the sixth carries only a 2-byte tag.
pub fn six_commands(seed: u8) -> Vec<CommandId> {
    (0..6u8).map(|i| Hash::new([seed.wrapping_add(i); 32])).collect()
}
