/// A node in the consensus DAG.
///
/// Blocks do not hold references to their parents or justify-QC target;
/// every edge is a `Hash` resolved through `EntityStorage`. That sidesteps
/// the reference-cycle problem a `Rc`/`Arc`-based DAG would otherwise
/// create, at the cost of a storage lookup per traversal hop.
use crate::crypto::{hash_data, Hash};
use crate::quorum_cert::QuorumCert;
use crate::types::{CommandId, ReplicaId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Clone, Serialize, Deserialize)]
struct BlockContent {
    parent_hashes: Vec<Hash>,
    commands: Vec<CommandId>,
    qc_obj_hash: Option<Hash>,
    qc_signers: Vec<ReplicaId>,
    extra: Vec<u8>,
    height: u64,
}

#[derive(Clone)]
pub struct Block {
    hash: Hash,
    pub parent_hashes: Vec<Hash>,
    /// Resolved parent hashes; populated once the block is delivered.
    /// `parents[0]` is the primary parent used by the commit rule.
    pub parents: Vec<Hash>,
    pub commands: Vec<CommandId>,
    /// The justify-QC embedded in this block, justifying `parents[0]`.
    /// `None` only for genesis.
    pub qc: Option<QuorumCert>,
    /// The block referenced by `qc` (the block whose hash `qc` signs),
    /// resolved once delivered.
    pub qc_ref: Option<Hash>,
    /// Accumulates votes cast for this block; starts empty.
    pub self_qc: Option<QuorumCert>,
    pub voted: HashSet<ReplicaId>,
    pub height: u64,
    pub delivered: bool,
    pub decision: bool,
    pub extra: Vec<u8>,
}

impl Block {
    /// Construct a fresh, undelivered block. `height` and `hash` are
    /// derived from the given fields; `qc_ref`/`parents` are left empty
    /// until `deliver` resolves them.
    pub fn new(
        parent_hashes: Vec<Hash>,
        commands: Vec<CommandId>,
        qc: Option<QuorumCert>,
        extra: Vec<u8>,
        height: u64,
    ) -> Self {
        let content = BlockContent {
            parent_hashes: parent_hashes.clone(),
            commands: commands.clone(),
            qc_obj_hash: qc.as_ref().map(|q| q.obj_hash()),
            qc_signers: qc
                .as_ref()
                .map(|q| q.signers().collect())
                .unwrap_or_default(),
            extra: extra.clone(),
            height,
        };
        let bytes = bincode::serialize(&content).expect("block content is always serializable");
        let hash = hash_data(&bytes);

        Self {
            hash,
            parent_hashes,
            parents: Vec::new(),
            commands,
            qc,
            qc_ref: None,
            self_qc: None,
            voted: HashSet::new(),
            height,
            delivered: false,
            decision: false,
            extra,
        }
    }

    /// The single genesis block: height 1, no parents, pre-voted by every
    /// replica already present in the replica directory at registration
    /// time (the caller is expected to populate `voted` accordingly, as
    /// the original `add_replica` does).
    pub fn genesis() -> Self {
        let mut b0 = Self::new(Vec::new(), Vec::new(), None, Vec::new(), 1);
        b0.delivered = true;
        b0
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// The object this block's QC logic signs: the first command's hash
    /// if any command is present, else the block's own hash. Applied
    /// identically at QC construction, vote signing, and finalization.
    pub fn qc_obj_hash(&self) -> Hash {
        self.commands.first().copied().unwrap_or(self.hash)
    }
}
