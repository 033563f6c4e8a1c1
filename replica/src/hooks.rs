/// Wires `ConsensusCore`'s collaborator trait to the two concrete network
/// surfaces a running replica has: the Coordinator bridge and the
/// peer-to-peer link to the rest of the validator set.
use async_trait::async_trait;
use consensus::core::ConsensusHooks;
use consensus::coordinator_bridge::CoordinatorBridge;
use consensus::types::{CommandId, Finality, ReplicaId, Vote};
use consensus::Block;

use crate::network::{BlockWire, PeerMessage, PeerSender};

pub struct ReplicaHooks {
    bridge: CoordinatorBridge,
    peers: PeerSender,
    leader_id: ReplicaId,
}

impl ReplicaHooks {
    pub fn new(bridge: CoordinatorBridge, peers: PeerSender, leader_id: ReplicaId) -> Self {
        Self { bridge, peers, leader_id }
    }
}

#[async_trait]
impl ConsensusHooks for ReplicaHooks {
    async fn do_broadcast_proposal(&self, block: &Block) {
        let message = PeerMessage::Proposal(BlockWire::from_block(block));
        self.peers.broadcast(&message).await;
    }

    async fn do_vote(&self, vote: Vote) {
        self.peers.send_to_peer(self.leader_id, &PeerMessage::Vote(vote)).await;
    }

    fn do_consensus(&self, block: &Block) {
        tracing::info!(block = %block.hash(), height = block.height, "committed");
    }

    fn do_decide(&self, finality: Finality) {
        tracing::info!(
            block = %finality.block_hash,
            cmd = %finality.cmd,
            cmd_index = finality.cmd_index,
            height = finality.height,
            "decided command"
        );
    }

    async fn check_cmds(&self, commands: &[CommandId]) -> bool {
        self.bridge.check_cmds(commands).await
    }

    async fn notify_coordinator_ack(&self) {
        if let Err(error) = self.bridge.send_ack().await {
            tracing::warn!(%error, "failed to acknowledge committing proposal to coordinator");
        }
    }

    async fn notify_coordinator_qc(&self, bytes: Vec<u8>) {
        if let Err(error) = self.bridge.send_qc(bytes).await {
            tracing::warn!(%error, "failed to forward completed quorum certificate to coordinator");
        }
    }
}
