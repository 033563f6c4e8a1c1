/// End-to-end seed scenarios for the pipelined three-chain commit rule,
/// run across a small in-process cluster. Network delivery is simulated by
/// reading the leader's block back out of its own storage and replaying it
/// into each follower's storage — the wire encoding of a proposal is the
/// network layer's concern, out of scope for this crate. Votes are routed
/// only back to the leader (replica 0), the way every follower actually
/// dispatches them; followers derive `b_lock`/`b_exec` purely from the
/// proposals they receive, the way a real follower does.
use consensus::core::ConsensusCore;
use consensus::crypto::Hash;
use testutil::{build_cluster, six_commands, NullHooks};

fn make_cluster(nreplicas: u16, nfaulty: u16) -> Vec<ConsensusCore<NullHooks>> {
    build_cluster(nreplicas, nfaulty)
        .into_iter()
        .map(|member| ConsensusCore::new(member.config, member.signing_key, NullHooks::default()))
        .collect()
}

fn make_two_step_cluster(nreplicas: u16, nfaulty: u16) -> Vec<ConsensusCore<NullHooks>> {
    build_cluster(nreplicas, nfaulty)
        .into_iter()
        .map(|mut member| {
            member.config.two_step_mode = true;
            ConsensusCore::new(member.config, member.signing_key, NullHooks::default())
        })
        .collect()
}

/// Replica 0 proposes `commands` atop `parent`; every other replica
/// receives the block, runs its own commit rule, and (if its opinion holds
/// and its ledger double agrees) votes back to the leader. Returns the new
/// block's hash.
async fn propose_round(cluster: &mut [ConsensusCore<NullHooks>], commands: Vec<Hash>, parent: Hash) -> Hash {
    let (leader_slice, followers) = cluster.split_at_mut(1);
    let leader = &mut leader_slice[0];
    let hash = leader.on_propose(commands, vec![parent], Vec::new()).await.unwrap();
    let block = leader.find_blk(&hash).expect("just proposed").clone();

    for follower in followers.iter_mut() {
        if follower.find_blk(&hash).is_none() {
            let inserted = follower.insert_external_block(
                block.parent_hashes.clone(),
                block.commands.clone(),
                block.qc.clone(),
                block.qc_ref,
                block.extra.clone(),
                block.height,
            );
            assert_eq!(inserted, hash);
        }
        follower.deliver_blk(hash).unwrap();
        follower.on_receive_proposal(hash).await.unwrap();
        for vote in follower.hooks().take_votes() {
            leader.on_receive_vote(vote).await.unwrap();
        }
    }

    hash
}

#[tokio::test]
async fn four_replica_happy_path_commits_after_three_pipelined_proposals() {
    let mut cluster = make_cluster(4, 1);
    let genesis = cluster[0].b_exec();

    let mut parent = genesis;
    let mut block_hashes = Vec::new();
    for round in 0..4u8 {
        let hash = propose_round(&mut cluster, vec![Hash::new([round; 32])], parent).await;
        block_hashes.push(hash);
        parent = hash;
    }

    let leader = &cluster[0];
    assert_eq!(leader.b_exec(), block_hashes[0]);
    assert!(leader.find_blk(&block_hashes[0]).unwrap().decision);
    assert_eq!(leader.hooks().decided_blocks(), vec![block_hashes[0]]);
}

#[tokio::test]
async fn pipelined_commit_emits_exactly_one_finality_per_command() {
    let mut cluster = make_cluster(4, 1);
    let genesis = cluster[0].b_exec();

    let mut parent = genesis;
    let mut block_hashes = Vec::new();
    for round in 0..4u8 {
        let commands = vec![Hash::new([round; 32]), Hash::new([round.wrapping_add(50); 32])];
        let hash = propose_round(&mut cluster, commands, parent).await;
        block_hashes.push(hash);
        parent = hash;
    }

    let decisions = cluster[0].hooks().decisions.lock().unwrap().clone();
    let for_b1: Vec<_> = decisions.iter().filter(|f| f.block_hash == block_hashes[0]).collect();
    assert_eq!(for_b1.len(), 2);
    assert_eq!(for_b1[0].cmd_index, 0);
    assert_eq!(for_b1[1].cmd_index, 1);
}

#[tokio::test]
async fn ledger_rejection_prevents_quorum_and_commit() {
    let mut cluster = make_cluster(4, 1);
    // All three followers' ledger doubles reject the batch; only the
    // leader's self-vote lands, so the block never reaches nmajority = 3.
    for follower in &cluster[1..] {
        follower.hooks().reject_commands();
    }
    let genesis = cluster[0].b_exec();

    let hash = propose_round(&mut cluster, six_commands(1), genesis).await;

    let leader = &cluster[0];
    let block = leader.find_blk(&hash).unwrap();
    assert_eq!(block.voted.len(), 1);
    assert!(!block.decision);
}

#[tokio::test]
async fn duplicate_vote_is_dropped_and_voter_count_increases_by_one() {
    let mut cluster = make_cluster(4, 1);
    let genesis = cluster[0].b_exec();
    let hash = cluster[0]
        .on_propose(vec![Hash::new([7u8; 32])], vec![genesis], Vec::new())
        .await
        .unwrap();
    let before = cluster[0].find_blk(&hash).unwrap().voted.len();

    // Replica 3 votes for the same block twice.
    let block = cluster[0].find_blk(&hash).unwrap().clone();
    let qc_obj = block.qc_obj_hash();
    let signing_key = consensus::crypto::ReplicaSigningKey::generate();
    let sig = consensus::crypto::sign(&signing_key, qc_obj.as_bytes());
    let vote = consensus::types::Vote::new(3, hash, sig);

    cluster[0].on_receive_vote(vote.clone()).await.unwrap();
    let after_first = cluster[0].find_blk(&hash).unwrap().voted.len();
    cluster[0].on_receive_vote(vote).await.unwrap();
    let after_second = cluster[0].find_blk(&hash).unwrap().voted.len();

    assert_eq!(after_first, before + 1);
    assert_eq!(after_second, after_first);
}

#[tokio::test]
async fn prune_releases_blocks_behind_the_staleness_window() {
    let mut cluster = make_cluster(4, 1);
    let genesis = cluster[0].b_exec();

    let mut parent = genesis;
    let mut block_hashes = Vec::new();
    for round in 0..10u8 {
        let hash = propose_round(&mut cluster, vec![Hash::new([round; 32])], parent).await;
        block_hashes.push(hash);
        parent = hash;
    }

    let leader = &mut cluster[0];
    // Three pipelined proposals' worth of lag means b_exec trails the tip
    // by three blocks; committed history goes back further still.
    assert!(leader.find_blk(&leader.b_exec()).is_some());

    leader.prune(3);

    assert!(leader.find_blk(&block_hashes[0]).is_none());
    assert!(leader.find_blk(&block_hashes[1]).is_none());
}

#[tokio::test]
async fn two_step_mode_commits_after_two_pipelined_proposals_instead_of_three() {
    let mut cluster = make_two_step_cluster(4, 1);
    let genesis = cluster[0].b_exec();

    let mut parent = genesis;
    let mut block_hashes = Vec::new();
    for round in 0..3u8 {
        let hash = propose_round(&mut cluster, vec![Hash::new([round; 32])], parent).await;
        block_hashes.push(hash);
        parent = hash;
    }

    let leader = &cluster[0];
    assert_eq!(leader.b_exec(), block_hashes[0]);
    assert!(leader.find_blk(&block_hashes[0]).unwrap().decision);
}

#[tokio::test]
async fn equivocating_proposal_never_reaches_quorum_once_honest_replicas_are_locked() {
    let mut cluster = make_cluster(4, 1);
    let genesis = cluster[0].b_exec();

    // Three honest rounds lock replicas 1..3 onto the B1 branch.
    let mut parent = genesis;
    let mut block_hashes = Vec::new();
    for round in 0..3u8 {
        let hash = propose_round(&mut cluster, vec![Hash::new([round; 32])], parent).await;
        block_hashes.push(hash);
        parent = hash;
    }

    // A Byzantine leader now proposes B1' at B1's height, extending genesis
    // directly instead of the locked branch. Construct it by hand in each
    // follower's storage (no real proposer core needed) and see that the
    // honest opinion rule rejects it.
    let rogue_commands = vec![Hash::new([0xffu8; 32])];
    let rogue_height = cluster[0].find_blk(&block_hashes[0]).unwrap().height;
    let rogue_qc = cluster[0].find_blk(&block_hashes[0]).unwrap().qc.clone();
    let rogue_qc_ref = cluster[0].find_blk(&block_hashes[0]).unwrap().qc_ref;

    let mut rogue_votes = 0;
    for follower in cluster[1..].iter_mut() {
        let rogue_hash = follower.insert_external_block(
            vec![genesis],
            rogue_commands.clone(),
            rogue_qc.clone(),
            rogue_qc_ref,
            Vec::new(),
            rogue_height,
        );
        follower.deliver_blk(rogue_hash).unwrap();
        follower.on_receive_proposal(rogue_hash).await.unwrap();
        rogue_votes += follower.hooks().take_votes().len();
    }

    // At most f = 1 honest replica could still vote for it; never quorum.
    assert!(rogue_votes <= 1);
}

#[tokio::test]
async fn completed_qc_forwards_to_the_coordinator_when_a_request_is_pending() {
    let mut cluster = make_cluster(4, 1);
    let genesis = cluster[0].b_exec();
    let commands = six_commands(1);

    // Mirrors the leader registering the Coordinator's in-flight request
    // before proposing, keyed on the batch's first command.
    cluster[0].await_decision_for(commands[0], vec![0, 1]);

    propose_round(&mut cluster, commands, genesis).await;

    assert_eq!(cluster[0].hooks().qc_frames.lock().unwrap().len(), 1);
}
