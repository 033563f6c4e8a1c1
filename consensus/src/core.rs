/// The consensus state machine: block delivery, the pipelined voting
/// opinion rule, quorum-certificate aggregation, and the three-chain
/// commit rule.
///
/// `ConsensusCore` is generic over `ConsensusHooks` so that it never
/// touches a raw socket, the peer-to-peer network, or a concrete
/// signature scheme directly — those live behind the trait, provided by
/// `coordinator_bridge` and whatever network layer wires replicas
/// together. This mirrors `HotStuffCore` being an abstract base class
/// with `do_broadcast_proposal`/`do_vote`/`do_consensus`/`do_decide` as
/// pure virtuals in the implementation this crate is derived from.
use crate::block::Block;
use crate::config::ReplicaConfig;
use crate::crypto::{sign, Hash, ReplicaSigningKey};
use crate::error::ConsensusError;
use crate::promise::{QcWaitingRegistry, ReplaceOnFire};
use crate::quorum_cert::QuorumCert;
use crate::storage::EntityStorage;
use crate::types::{CommandId, Finality, ReplicaId, Vote};
use std::collections::{HashMap, HashSet};

/// The four application/network touch points the core calls out to, plus
/// the ledger legality check. None of these are implemented here; see
/// `coordinator_bridge` for the concrete Coordinator-facing half and the
/// `testutil` crate for an in-memory double used by tests.
#[async_trait::async_trait]
pub trait ConsensusHooks: Send + Sync {
    /// Broadcast a freshly proposed block to the other replicas.
    async fn do_broadcast_proposal(&self, block: &Block);

    /// Send a vote to whichever replica should collect it (ordinarily the
    /// block's proposer). Routing is the network layer's responsibility;
    /// the core does not track proposer identity on `Block`.
    async fn do_vote(&self, vote: Vote);

    /// Invoked once per block, in commit order, as it is decided.
    fn do_consensus(&self, block: &Block);

    /// Invoked once per command in a decided block, in commit order.
    fn do_decide(&self, finality: Finality);

    /// Ask the Coordinator's ledger validator whether `commands` is a
    /// semantically admissible batch. A blocking round-trip in the
    /// original design; implementations are expected to document that to
    /// operators even when expressed as an async call here.
    async fn check_cmds(&self, commands: &[CommandId]) -> bool;

    /// A committing proposal carrying commands has been received while a
    /// decision is pending; acknowledge it to the Coordinator.
    async fn notify_coordinator_ack(&self);

    /// A block's quorum certificate just completed; forward its wire
    /// encoding to the Coordinator.
    async fn notify_coordinator_qc(&self, bytes: Vec<u8>);
}

pub struct ConsensusCore<H: ConsensusHooks> {
    storage: EntityStorage,
    config: ReplicaConfig,
    signing_key: ReplicaSigningKey,
    hooks: H,

    b0: Hash,
    b_lock: Hash,
    b_exec: Hash,
    hqc: (Hash, QuorumCert),
    vheight: u64,
    tails: HashSet<Hash>,

    qc_waiting: QcWaitingRegistry,
    propose_waiting: ReplaceOnFire<Hash>,
    receive_proposal_waiting: ReplaceOnFire<Hash>,
    hqc_update_waiting: ReplaceOnFire<Hash>,
    /// Keyed by a proposal's first command; value is the tag the
    /// Coordinator sent alongside it, used only to decide whether a
    /// completion belongs to an in-flight Coordinator request.
    decision_waiting_with_none_client: HashMap<Hash, Vec<u8>>,

    vote_disabled: bool,
    id: ReplicaId,
}

impl<H: ConsensusHooks> ConsensusCore<H> {
    pub fn new(config: ReplicaConfig, signing_key: ReplicaSigningKey, hooks: H) -> Self {
        let mut genesis = Block::genesis();
        let genesis_qc = QuorumCert::genesis(genesis.hash());
        genesis.qc = Some(genesis_qc.clone());
        genesis.qc_ref = Some(genesis.hash());
        genesis.self_qc = Some(genesis_qc.clone());
        // Every replica already in the directory at boot is treated as
        // having pre-voted for genesis, mirroring `add_replica` inserting
        // `rid` into `b0->voted` at registration time.
        for peer in &config.replica_directory {
            genesis.voted.insert(peer.rid);
        }
        genesis.voted.insert(config.replica_id);

        let genesis_hash = genesis.hash();
        let mut storage = EntityStorage::new();
        storage.add_blk(genesis);

        let mut tails = HashSet::new();
        tails.insert(genesis_hash);

        let vote_disabled = config.vote_disabled;
        let id = config.replica_id;

        Self {
            storage,
            config,
            signing_key,
            hooks,
            b0: genesis_hash,
            b_lock: genesis_hash,
            b_exec: genesis_hash,
            hqc: (genesis_hash, genesis_qc),
            vheight: 0,
            tails,
            qc_waiting: QcWaitingRegistry::new(),
            propose_waiting: ReplaceOnFire::new(),
            receive_proposal_waiting: ReplaceOnFire::new(),
            hqc_update_waiting: ReplaceOnFire::new(),
            decision_waiting_with_none_client: HashMap::new(),
            vote_disabled,
            id,
        }
    }

    pub fn b_exec(&self) -> Hash {
        self.b_exec
    }

    pub fn b_lock(&self) -> Hash {
        self.b_lock
    }

    pub fn hqc(&self) -> Hash {
        self.hqc.0
    }

    pub fn vheight(&self) -> u64 {
        self.vheight
    }

    pub fn find_blk(&self, hash: &Hash) -> Option<&Block> {
        self.storage.find_blk(hash)
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    fn height_of(&self, hash: &Hash) -> u64 {
        self.storage.find_blk(hash).map(|b| b.height).unwrap_or(0)
    }

    /// Insert an already-constructed block (from this replica's own
    /// `on_propose`, or reconstructed by an external network layer from a
    /// peer's proposal) and resolve its parent/qc_ref edges. Returns
    /// `false` without altering `tails` if the block was already
    /// delivered — a double delivery is logged and ignored rather than
    /// treated as an error.
    pub fn deliver_blk(&mut self, hash: Hash) -> Result<bool, ConsensusError> {
        let (parent_hashes, qc_ref, already_delivered) = {
            let block = self
                .storage
                .find_blk(&hash)
                .ok_or(ConsensusError::BlockNotFound(hash))?;
            (block.parent_hashes.clone(), block.qc_ref, block.delivered)
        };

        if already_delivered {
            tracing::warn!(%hash, "duplicate delivery of block");
            return Ok(false);
        }

        for parent in &parent_hashes {
            let parent_delivered = self.storage.find_blk(parent).map(|b| b.delivered).unwrap_or(false);
            if !parent_delivered {
                return Err(ConsensusError::ProtocolViolation(format!(
                    "parent {parent} of block {hash} not delivered"
                )));
            }
        }
        if let Some(qc_ref) = qc_ref {
            let qc_ref_delivered = self.storage.find_blk(&qc_ref).map(|b| b.delivered).unwrap_or(false);
            if !qc_ref_delivered {
                return Err(ConsensusError::ProtocolViolation(format!(
                    "qc_ref {qc_ref} of block {hash} not delivered"
                )));
            }
        }

        for parent in &parent_hashes {
            self.tails.remove(parent);
        }
        self.tails.insert(hash);

        let block = self.storage.find_blk_mut(&hash).expect("just looked up above");
        block.parents = parent_hashes;
        block.delivered = true;

        Ok(true)
    }

    /// Reconstruct a block received from a peer over the network and insert
    /// it into storage, canonicalized like any other block. Does not
    /// deliver it — the caller still needs to call `deliver_blk` once the
    /// wire layer is done decoding, matching the "synthesized... from a
    /// network message" lifecycle note: construction and delivery are two
    /// distinct steps so a block whose parents haven't arrived yet can sit
    /// in storage undelivered.
    pub fn insert_external_block(
        &mut self,
        parent_hashes: Vec<Hash>,
        commands: Vec<CommandId>,
        qc: Option<QuorumCert>,
        qc_ref: Option<Hash>,
        extra: Vec<u8>,
        height: u64,
    ) -> Hash {
        let mut block = Block::new(parent_hashes, commands, qc, extra, height);
        block.qc_ref = qc_ref;
        self.storage.add_blk(block)
    }

    /// Leader-side proposal: build a new block extending `parents`,
    /// deliver it, run the commit rule, self-vote, and broadcast.
    pub async fn on_propose(
        &mut self,
        commands: Vec<CommandId>,
        parents: Vec<Hash>,
        extra: Vec<u8>,
    ) -> Result<Hash, ConsensusError> {
        if parents.is_empty() {
            return Err(ConsensusError::ProtocolViolation(
                "on_propose requires at least one parent".into(),
            ));
        }
        for parent in &parents {
            self.tails.remove(parent);
        }

        let parent_height = self.height_of(&parents[0]);
        let justify_qc = self.hqc.1.clone();
        let qc_ref = self.hqc.0;

        let mut block = Block::new(parents, commands, Some(justify_qc), extra, parent_height + 1);
        block.qc_ref = Some(qc_ref);
        block.self_qc = Some(QuorumCert::new(block.qc_obj_hash()));

        let hash = self.storage.add_blk(block);
        self.deliver_blk(hash)?;
        self.update(hash)?;
        self.vheight = self.height_of(&hash);

        let qc_obj = self
            .storage
            .find_blk(&hash)
            .expect("just delivered")
            .qc_obj_hash();
        let partial_sig = sign(&self.signing_key, qc_obj.as_bytes());
        self.on_receive_vote(Vote::new(self.id, hash, partial_sig)).await?;

        self.propose_waiting.fire(hash);
        let block = self.storage.find_blk(&hash).expect("just delivered");
        self.hooks.do_broadcast_proposal(block).await;

        Ok(hash)
    }

    /// Follower-side: `block_hash` must already be delivered (by whatever
    /// external mechanism reconstructed it from a peer's proposal
    /// message). Runs the commit rule, decides the voting opinion, and
    /// casts a vote if the opinion holds and voting is enabled.
    pub async fn on_receive_proposal(&mut self, block_hash: Hash) -> Result<(), ConsensusError> {
        let delivered = self
            .storage
            .find_blk(&block_hash)
            .ok_or(ConsensusError::BlockNotFound(block_hash))?
            .delivered;
        if !delivered {
            return Err(ConsensusError::ProtocolViolation(format!(
                "on_receive_proposal requires block {block_hash} to be delivered"
            )));
        }

        self.update(block_hash)?;

        let (height, qc_ref, commands, qc_obj) = {
            let block = self.storage.find_blk(&block_hash).expect("checked above");
            (
                block.height,
                block.qc_ref,
                block.commands.clone(),
                block.qc_obj_hash(),
            )
        };

        let mut opinion = false;
        if height > self.vheight {
            if let Some(qc_ref) = qc_ref {
                if self.height_of(&qc_ref) > self.height_of(&self.b_lock) {
                    // Liveness: the proposal's justify-QC outranks our lock.
                    opinion = true;
                }
            }
            if !opinion && self.extends_locked_branch(block_hash) {
                // Safety: the proposal extends the branch we're locked on.
                opinion = true;
            }
            if opinion {
                self.vheight = height;
            }
        }

        if let Some(qc_ref) = qc_ref {
            self.qc_waiting.resolve(qc_ref);
        }
        self.receive_proposal_waiting.fire(block_hash);

        if !self.decision_waiting_with_none_client.is_empty() && !commands.is_empty() {
            self.hooks.notify_coordinator_ack().await;
            self.decision_waiting_with_none_client.clear();
        }

        if opinion && !self.vote_disabled {
            let should_vote = if commands.is_empty() {
                true
            } else {
                self.hooks.check_cmds(&commands).await
            };
            if should_vote {
                let partial_sig = sign(&self.signing_key, qc_obj.as_bytes());
                let vote = Vote::new(self.id, block_hash, partial_sig);
                self.hooks.do_vote(vote).await;
            }
        }

        Ok(())
    }

    /// `true` if the ancestor of `block_hash` at `b_lock`'s height, found
    /// by always following the primary (`parents[0]`) edge, is `b_lock`
    /// itself.
    fn extends_locked_branch(&self, block_hash: Hash) -> bool {
        let lock_height = self.height_of(&self.b_lock);
        let mut cursor = block_hash;
        loop {
            let block = match self.storage.find_blk(&cursor) {
                Some(b) => b,
                None => return false,
            };
            if block.height == lock_height {
                return cursor == self.b_lock;
            }
            if block.height < lock_height {
                return false;
            }
            match block.parents.first() {
                Some(parent) => cursor = *parent,
                None => return false,
            }
        }
    }

    pub async fn on_receive_vote(&mut self, vote: Vote) -> Result<(), ConsensusError> {
        let nmajority = self.config.nmajority();

        let already_final = {
            let blk = self
                .storage
                .find_blk(&vote.block_hash)
                .ok_or(ConsensusError::BlockNotFound(vote.block_hash))?;
            blk.voted.len() >= nmajority
        };
        if already_final {
            return Ok(());
        }

        let duplicate = self
            .storage
            .find_blk(&vote.block_hash)
            .expect("checked above")
            .voted
            .contains(&vote.voter);
        if duplicate {
            tracing::warn!(voter = vote.voter, block = %vote.block_hash, "duplicate vote dropped");
            return Ok(());
        }

        let reached_quorum = {
            let blk = self.storage.find_blk_mut(&vote.block_hash).expect("checked above");
            let qc_obj = blk.qc_obj_hash();
            let self_qc = blk.self_qc.get_or_insert_with(|| QuorumCert::new(qc_obj));
            self_qc.add_part(vote.voter, vote.partial_sig.clone());
            blk.voted.insert(vote.voter);
            blk.voted.len() == nmajority
        };

        if !reached_quorum {
            return Ok(());
        }

        let (first_command, qc_bytes, block_height) = {
            let blk = self.storage.find_blk_mut(&vote.block_hash).expect("checked above");
            let self_qc = blk.self_qc.as_mut().expect("just inserted above");
            self_qc.compute(nmajority)?;
            (blk.commands.first().copied(), self_qc.serialize(), blk.height)
        };

        if let Some(first_command) = first_command {
            if self.decision_waiting_with_none_client.contains_key(&first_command) {
                self.hooks.notify_coordinator_qc(qc_bytes).await;
            }
        }

        if block_height > self.height_of(&self.hqc.0) {
            let self_qc = self
                .storage
                .find_blk(&vote.block_hash)
                .expect("checked above")
                .self_qc
                .clone()
                .expect("just computed above");
            self.hqc = (vote.block_hash, self_qc);
            self.hqc_update_waiting.fire(vote.block_hash);
        }
        self.qc_waiting.resolve(vote.block_hash);

        Ok(())
    }

    /// The pipelined three-chain commit rule. `nblk`'s embedded QC
    /// references `b2`, whose own QC references `b1`, whose QC
    /// references `chain_root`. If the three sit on a single direct-parent
    /// chain, everything from `chain_root` down to (but not including) the
    /// current `b_exec` commits.
    pub fn update(&mut self, nblk: Hash) -> Result<(), ConsensusError> {
        let b2 = match self.storage.find_blk(&nblk).and_then(|b| b.qc_ref) {
            Some(h) => h,
            None => return Ok(()),
        };
        if self.is_decided(&b2) {
            return Ok(());
        }
        let b1 = match self.storage.find_blk(&b2).and_then(|b| b.qc_ref) {
            Some(h) => h,
            None => return Ok(()),
        };
        if self.is_decided(&b1) {
            return Ok(());
        }

        let nblk_qc = self
            .storage
            .find_blk(&nblk)
            .and_then(|b| b.qc.clone())
            .expect("nblk has a qc_ref so it has a qc");
        self.update_hqc(b2, nblk_qc);

        if self.height_of(&b1) > self.height_of(&self.b_lock) {
            self.b_lock = b1;
        }

        let chain_root = if self.config.two_step_mode {
            b1
        } else {
            match self.storage.find_blk(&b1).and_then(|b| b.qc_ref) {
                Some(h) => h,
                None => return Ok(()),
            }
        };
        if self.is_decided(&chain_root) {
            return Ok(());
        }

        let commit_precondition = if self.config.two_step_mode {
            self.primary_parent(&b2) == Some(chain_root)
        } else {
            self.primary_parent(&b2) == Some(b1) && self.primary_parent(&b1) == Some(chain_root)
        };
        if !commit_precondition {
            return Ok(());
        }

        let mut queue = Vec::new();
        let mut cursor = chain_root;
        let exec_height = self.height_of(&self.b_exec);
        while self.height_of(&cursor) > exec_height {
            queue.push(cursor);
            cursor = match self.primary_parent(&cursor) {
                Some(parent) => parent,
                None => break,
            };
        }
        if cursor != self.b_exec {
            return Err(ConsensusError::SafetyBreach {
                expected: self.b_exec,
                found: cursor,
            });
        }

        for block_hash in queue.into_iter().rev() {
            let (commands, height) = {
                let block = self.storage.find_blk_mut(&block_hash).expect("in commit queue");
                block.decision = true;
                (block.commands.clone(), block.height)
            };
            let block = self.storage.find_blk(&block_hash).expect("in commit queue");
            self.hooks.do_consensus(block);
            for (cmd_index, cmd) in commands.into_iter().enumerate() {
                self.hooks.do_decide(Finality {
                    replica_id: self.id,
                    commit: true,
                    cmd_index,
                    height,
                    cmd,
                    block_hash,
                });
            }
        }
        self.b_exec = chain_root;

        Ok(())
    }

    fn is_decided(&self, hash: &Hash) -> bool {
        self.storage.find_blk(hash).map(|b| b.decision).unwrap_or(false)
    }

    fn primary_parent(&self, hash: &Hash) -> Option<Hash> {
        self.storage.find_blk(hash).and_then(|b| b.parents.first().copied())
    }

    fn update_hqc(&mut self, candidate: Hash, qc: QuorumCert) {
        if self.height_of(&candidate) > self.height_of(&self.hqc.0) {
            self.hqc = (candidate, qc);
            self.hqc_update_waiting.fire(candidate);
        }
    }

    /// Walk `staleness` steps back from `b_exec` via the primary-parent
    /// edge, then detach everything reachable from that point: null each
    /// block's `qc_ref`, pop its parent edges one at a time, and release
    /// it once it has none left.
    pub fn prune(&mut self, staleness: u64) {
        let mut cursor = self.b_exec;
        for _ in 0..staleness {
            match self.primary_parent(&cursor) {
                Some(parent) => cursor = parent,
                None => return,
            }
        }

        let mut stack = vec![cursor];
        while let Some(current) = stack.pop() {
            let popped_parent = match self.storage.find_blk_mut(&current) {
                Some(block) => {
                    block.qc_ref = None;
                    block.parents.pop()
                }
                None => continue,
            };
            match popped_parent {
                Some(parent) => {
                    stack.push(current);
                    stack.push(parent);
                }
                None => self.storage.try_release_blk(&current),
            }
        }
    }

    /// Register that the Coordinator is awaiting a decision keyed on
    /// `first_command`, so that the next QC completion or committing
    /// proposal for it is forwarded back to the Coordinator.
    pub fn await_decision_for(&mut self, first_command: Hash, tag: Vec<u8>) {
        self.decision_waiting_with_none_client.insert(first_command, tag);
    }

    pub fn subscribe_propose(&self) -> tokio::sync::oneshot::Receiver<Hash> {
        self.propose_waiting.subscribe()
    }

    pub fn subscribe_receive_proposal(&self) -> tokio::sync::oneshot::Receiver<Hash> {
        self.receive_proposal_waiting.subscribe()
    }

    pub fn subscribe_hqc_update(&self) -> tokio::sync::oneshot::Receiver<Hash> {
        self.hqc_update_waiting.subscribe()
    }

    pub fn subscribe_qc(&self, block_hash: Hash) -> tokio::sync::oneshot::Receiver<()> {
        self.qc_waiting.subscribe(block_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplicaConfig;
    use crate::crypto::ReplicaSigningKey;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHooks {
        broadcasts: Mutex<Vec<Hash>>,
        votes: Mutex<Vec<Vote>>,
        decisions: Mutex<Vec<Finality>>,
        check_cmds_result: Mutex<bool>,
    }

    #[async_trait::async_trait]
    impl ConsensusHooks for RecordingHooks {
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
            *self.check_cmds_result.lock().unwrap()
        }
        async fn notify_coordinator_ack(&self) {}
        async fn notify_coordinator_qc(&self, _bytes: Vec<u8>) {}
    }

    fn test_config() -> ReplicaConfig {
        ReplicaConfig {
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
        }
    }

    #[test]
    fn genesis_state_is_consistent() {
        let core = ConsensusCore::new(test_config(), ReplicaSigningKey::generate(), RecordingHooks::default());
        assert_eq!(core.b_exec(), core.b0);
        assert_eq!(core.b_lock(), core.b0);
        assert_eq!(core.hqc(), core.b0);
        assert_eq!(core.vheight(), 0);
        let genesis = core.find_blk(&core.b0).unwrap();
        assert_eq!(genesis.height, 1);
        assert!(!genesis.decision);
    }

    #[tokio::test]
    async fn on_propose_self_votes_and_broadcasts() {
        let mut core = ConsensusCore::new(test_config(), ReplicaSigningKey::generate(), RecordingHooks::default());
        let genesis = core.b0;

        let hash = core.on_propose(vec![Hash::new([1u8; 32])], vec![genesis], Vec::new()).await.unwrap();

        let block = core.find_blk(&hash).unwrap();
        assert_eq!(block.height, 2);
        assert!(block.voted.contains(&0));
        assert_eq!(core.hooks().broadcasts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn double_delivery_is_rejected_without_altering_tails() {
        let mut core = ConsensusCore::new(test_config(), ReplicaSigningKey::generate(), RecordingHooks::default());
        let genesis = core.b0;
        let hash = core.on_propose(vec![Hash::new([1u8; 32])], vec![genesis], Vec::new()).await.unwrap();

        let redelivered = core.deliver_blk(hash).unwrap();
        assert!(!redelivered);
    }

    #[tokio::test]
    async fn prune_zero_is_a_no_op() {
        let mut core = ConsensusCore::new(test_config(), ReplicaSigningKey::generate(), RecordingHooks::default());
        let genesis = core.b0;
        core.prune(0);
        assert!(core.find_blk(&genesis).is_some());
    }

    #[tokio::test]
    async fn follower_delivers_and_votes_on_an_externally_built_block() {
        let mut core = ConsensusCore::new(test_config(), ReplicaSigningKey::generate(), RecordingHooks::default());
        let genesis = core.b0;
        let justify_qc = core.hqc.1.clone();

        let hash = core.insert_external_block(
            vec![genesis],
            vec![Hash::new([9u8; 32])],
            Some(justify_qc),
            Some(genesis),
            Vec::new(),
            2,
        );
        core.deliver_blk(hash).unwrap();
        *core.hooks().check_cmds_result.lock().unwrap() = true;

        core.on_receive_proposal(hash).await.unwrap();

        assert_eq!(core.vheight(), 2);
        assert_eq!(core.hooks().votes.lock().unwrap().len(), 1);
    }
}
