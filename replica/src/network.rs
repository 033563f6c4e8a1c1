/// Inter-replica networking: proposal and vote delivery between peers.
///
/// The consensus core only ever consumes networking through
/// `ConsensusHooks`; this module is the ambient CLI wiring that gives the
/// `replica` binary something concrete to drive those hooks with. Framing
/// mirrors `coordinator_bridge`'s connect-per-message style, generalized
/// with a 4-byte length prefix since peer messages are variable-length
/// (a block's command list) unlike the Coordinator's fixed frames.
use consensus::crypto::{Hash, ReplicaPublicKey};
use consensus::quorum_cert::QuorumCert;
use consensus::types::{CommandId, ReplicaId, Vote};
use consensus::Block;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Wire form of a `Block`: every field `ConsensusCore::insert_external_block`
/// needs to reconstruct it, plus the justify-QC's signer set. A QC received
/// this way is always already complete (its proposer would not have
/// embedded it otherwise), so the wire form only needs to carry who signed,
/// not their signature bytes — `QuorumCert::from_remote_signers` rebuilds a
/// certificate that is honest about having no verifiable bytes behind it.
#[derive(Clone, Serialize, Deserialize)]
pub struct BlockWire {
    pub parent_hashes: Vec<Hash>,
    pub commands: Vec<CommandId>,
    pub qc_obj_hash: Option<Hash>,
    pub qc_signers: Vec<ReplicaId>,
    pub qc_ref: Option<Hash>,
    pub extra: Vec<u8>,
    pub height: u64,
}

impl BlockWire {
    pub fn from_block(block: &Block) -> Self {
        let qc_obj_hash = block.qc.as_ref().map(|qc| qc.obj_hash());
        let qc_signers = block
            .qc
            .as_ref()
            .map(|qc| qc.signers().collect::<Vec<_>>())
            .unwrap_or_default();
        Self {
            parent_hashes: block.parent_hashes.clone(),
            commands: block.commands.clone(),
            qc_obj_hash,
            qc_signers,
            qc_ref: block.qc_ref,
            extra: block.extra.clone(),
            height: block.height,
        }
    }

    /// Rebuild the justify-QC this frame carried, if any.
    pub fn qc(&self) -> Option<QuorumCert> {
        self.qc_obj_hash.map(|obj_hash| QuorumCert::from_remote_signers(obj_hash, self.qc_signers.clone()))
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub enum PeerMessage {
    Proposal(BlockWire),
    Vote(Vote),
}

/// A peer's network address and public key, resolved from the replica
/// directory in config.
#[derive(Clone)]
pub struct Peer {
    pub id: ReplicaId,
    pub address: String,
    #[allow(dead_code)]
    pub public_key: ReplicaPublicKey,
}

/// Outbound half: connects fresh per message, matching
/// `CoordinatorBridge::send_bytes` — no connection pool, no shared
/// descriptor to synchronize over.
pub struct PeerSender {
    peers: Vec<Peer>,
}

impl PeerSender {
    pub fn new(peers: Vec<Peer>) -> Self {
        Self { peers }
    }

    pub async fn broadcast(&self, message: &PeerMessage) {
        let bytes = bincode::serialize(message).expect("PeerMessage is always serializable");
        for peer in &self.peers {
            if let Err(error) = Self::send_to(&peer.address, &bytes).await {
                tracing::warn!(peer = peer.id, %error, "failed to deliver peer message");
            }
        }
    }

    /// Send to a single peer, for vote routing: a vote only ever goes back
    /// to the block's proposer, never to the whole set.
    pub async fn send_to_peer(&self, rid: ReplicaId, message: &PeerMessage) {
        let Some(peer) = self.peers.iter().find(|p| p.id == rid) else {
            tracing::warn!(rid, "no known address for peer, dropping message");
            return;
        };
        let bytes = bincode::serialize(message).expect("PeerMessage is always serializable");
        if let Err(error) = Self::send_to(&peer.address, &bytes).await {
            tracing::warn!(peer = peer.id, %error, "failed to deliver peer message");
        }
    }

    async fn send_to(address: &str, bytes: &[u8]) -> std::io::Result<()> {
        let mut stream = TcpStream::connect(address).await?;
        stream.write_u32(bytes.len() as u32).await?;
        stream.write_all(bytes).await?;
        Ok(())
    }
}

/// Inbound half: accepts connections on `listen_addr` and forwards decoded
/// messages over `tx`. Runs as its own task, never touching consensus state
/// directly — mirrors the inbound Coordinator listener's separation.
pub async fn run_peer_listener(listen_addr: String, tx: mpsc::Sender<PeerMessage>) -> std::io::Result<()> {
    let listener = TcpListener::bind(&listen_addr).await?;
    loop {
        let (mut stream, _) = listener.accept().await?;
        let tx = tx.clone();
        tokio::spawn(async move {
            let len = match stream.read_u32().await {
                Ok(len) => len as usize,
                Err(_) => return,
            };
            let mut buf = vec![0u8; len];
            if stream.read_exact(&mut buf).await.is_err() {
                tracing::warn!("peer connection closed before a full message arrived");
                return;
            }
            match bincode::deserialize::<PeerMessage>(&buf) {
                Ok(message) => {
                    let _ = tx.send(message).await;
                }
                Err(error) => tracing::warn!(%error, "dropping malformed peer message"),
            }
        });
    }
}
