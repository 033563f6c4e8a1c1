/// Thin CLI entrypoint: load a replica's configuration, wire a
/// `ConsensusCore` up to the Coordinator bridge and the peer network, and
/// run the inbound-listener / consensus-event split. Contains no consensus
/// logic of its own — everything here is ambient plumbing around
/// `consensus::core::ConsensusCore`.
mod hooks;
mod network;

use clap::Parser;
use consensus::config::ReplicaConfig;
use consensus::coordinator_bridge::{codec::ProposalFrame, CoordinatorBridge};
use consensus::core::ConsensusCore;
use consensus::crypto::ReplicaSigningKey;
use consensus::ConsensusError;
use hooks::ReplicaHooks;
use network::{run_peer_listener, Peer, PeerMessage, PeerSender};
use tokio::sync::mpsc;

/// `SafetyBreach` is the one error variant that means a Byzantine
/// supermajority has equivocated past what this replica's fault threshold
/// can tolerate; every other variant is handled per-event and the replica
/// keeps running.
fn die_on_safety_breach(error: ConsensusError) {
    if let ConsensusError::SafetyBreach { expected, found } = &error {
        tracing::error!(%expected, %found, "safety breach: halting replica");
        std::process::exit(1);
    }
    tracing::warn!(%error, "consensus event failed");
}

#[derive(Parser, Debug)]
#[command(name = "replica", about = "A BFT consensus replica")]
struct Args {
    /// Path to this replica's TOML configuration file.
    #[arg(long)]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = ReplicaConfig::from_toml_file(&args.config)?;
    tracing::info!(replica_id = config.replica_id, "loaded configuration");

    let signing_key_bytes = hex::decode(&config.private_key)?;
    let signing_key = ReplicaSigningKey::from_bytes(&signing_key_bytes)?;

    let peers: Vec<Peer> = config
        .replica_directory
        .iter()
        .filter(|peer| peer.rid != config.replica_id)
        .map(|peer| {
            Ok(Peer {
                id: peer.rid,
                address: peer.address.clone(),
                public_key: peer.public_key()?,
            })
        })
        .collect::<Result<_, consensus::ConsensusError>>()?;
    let self_address = config
        .replica_directory
        .iter()
        .find(|peer| peer.rid == config.replica_id)
        .map(|peer| peer.address.clone())
        .ok_or_else(|| anyhow::anyhow!("replica_directory has no entry for this replica's own id"))?;

    let bridge = CoordinatorBridge::bind(&config).await?;
    let peer_sender = PeerSender::new(peers);
    let is_leader = config.replica_id == config.leader_id;
    let staleness = config.staleness;
    let leader_id = config.leader_id;
    let coordinator_listen_port = config.coordinator_listen_port;

    let mut core = ConsensusCore::new(config, signing_key, ReplicaHooks::new(bridge, peer_sender, leader_id));

    let (peer_tx, mut peer_rx) = mpsc::channel::<PeerMessage>(256);
    tokio::spawn(run_peer_listener(self_address, peer_tx));

    let (proposal_tx, mut proposal_rx) = mpsc::channel::<ProposalFrame>(64);
    if is_leader {
        tokio::spawn(CoordinatorBridge::run_inbound_listener(coordinator_listen_port, proposal_tx));
    }

    let mut tip = core.hqc();
    loop {
        tokio::select! {
            Some(frame) = proposal_rx.recv(), if is_leader => {
                let commands = frame.commands.to_vec();
                // Registered before proposing so a QC that completes out of
                // the self-vote alone (or a race with the first peer vote)
                // still finds the Coordinator's request waiting.
                core.await_decision_for(commands[0], frame.id.to_be_bytes().to_vec());
                match core.on_propose(commands, vec![tip], Vec::new()).await {
                    Ok(hash) => tip = hash,
                    Err(error) => die_on_safety_breach(error),
                }
                core.prune(staleness);
            }
            Some(message) = peer_rx.recv() => {
                match message {
                    PeerMessage::Proposal(wire) => {
                        let qc = wire.qc();
                        let hash = core.insert_external_block(
                            wire.parent_hashes,
                            wire.commands,
                            qc,
                            wire.qc_ref,
                            wire.extra,
                            wire.height,
                        );
                        if let Err(error) = core.deliver_blk(hash) {
                            tracing::warn!(%error, "failed to deliver externally proposed block");
                            continue;
                        }
                        if let Err(error) = core.on_receive_proposal(hash).await {
                            die_on_safety_breach(error);
                            continue;
                        }
                        tip = hash;
                        core.prune(staleness);
                    }
                    PeerMessage::Vote(vote) => {
                        if let Err(error) = core.on_receive_vote(vote).await {
                            die_on_safety_breach(error);
                        }
                    }
                }
            }
            else => break,
        }
    }

    Ok(())
}
