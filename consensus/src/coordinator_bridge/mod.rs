/// The Coordinator-facing half of the system: an inbound proposal
/// listener, a short-lived-per-message outbound sender, and the
/// synchronous "is this batch legal" round-trip to the ledger validator.
///
/// Per design note 9 of the protocol this bridge is derived from, the
/// consensus core never touches a raw socket; this struct owns every
/// socket role instead and is driven from the `replica` binary, which
/// wires its `check_cmds`/`notify_coordinator_*` methods into a
/// `ConsensusHooks` implementation.
pub mod codec;

use crate::config::ReplicaConfig;
use crate::error::ConsensusError;
use crate::types::CommandId;
use codec::{decode_ledger_verdict, decode_proposal_frame, encode_coordinator_ack, encode_ledger_validation_request, ProposalFrame, INBOUND_PROPOSAL_FRAME_LEN};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub struct CoordinatorBridge {
    coordinator_send_port: u16,
    iri_send_port: u16,
    /// Bound once at construction, matching `listen_on_iri`'s one-time
    /// initialization; each `check_cmds` call accepts a fresh connection
    /// off of it rather than rebinding.
    iri_listener: TcpListener,
}

impl CoordinatorBridge {
    pub async fn bind(config: &ReplicaConfig) -> Result<Self, ConsensusError> {
        let iri_listener = TcpListener::bind(("127.0.0.1", config.iri_listen_port)).await?;
        Ok(Self {
            coordinator_send_port: config.coordinator_send_port,
            iri_send_port: config.iri_send_port,
            iri_listener,
        })
    }

    /// Run the inbound proposal listener until the channel's receiver is
    /// dropped. Intended to be spawned as its own task, separate from
    /// whatever task drives the `ConsensusCore` — it only decodes frames
    /// and hands them off; it must never mutate consensus state directly.
    pub async fn run_inbound_listener(listen_port: u16, tx: mpsc::Sender<ProposalFrame>) -> Result<(), ConsensusError> {
        let listener = TcpListener::bind(("127.0.0.1", listen_port)).await?;
        loop {
            let (mut stream, _) = listener.accept().await?;
            let mut buf = [0u8; INBOUND_PROPOSAL_FRAME_LEN];
            if stream.read_exact(&mut buf).await.is_err() {
                tracing::warn!("inbound proposal connection closed before a full frame arrived");
                continue;
            }
            match decode_proposal_frame(&buf) {
                Ok(frame) => {
                    if tx.send(frame).await.is_err() {
                        return Ok(());
                    }
                }
                Err(error) => tracing::warn!(%error, "dropping malformed inbound proposal frame"),
            }
        }
    }

    /// Acknowledge a committing proposal: a single `0x12` byte.
    pub async fn send_ack(&self) -> Result<(), ConsensusError> {
        self.send_bytes(self.coordinator_send_port, &encode_coordinator_ack()).await
    }

    /// Forward a completed quorum certificate's wire encoding.
    pub async fn send_qc(&self, bytes: Vec<u8>) -> Result<(), ConsensusError> {
        self.send_bytes(self.coordinator_send_port, &bytes).await
    }

    /// Ask the ledger validator whether `commands` is admissible. A
    /// blocking round-trip on whichever task calls it — the caller should
    /// not expect other consensus events to be processed while it is in
    /// flight. A socket failure yields `false` rather than propagating an
    /// error, matching the "skip this validation" contract.
    pub async fn check_cmds(&self, commands: &[CommandId]) -> bool {
        match self.check_cmds_inner(commands).await {
            Ok(legal) => legal,
            Err(error) => {
                tracing::warn!(%error, "ledger validation round-trip failed, treating as illegal");
                false
            }
        }
    }

    async fn check_cmds_inner(&self, commands: &[CommandId]) -> Result<bool, ConsensusError> {
        let request = encode_ledger_validation_request(commands)?;
        self.send_bytes(self.iri_send_port, &request).await?;
        let (mut stream, _) = self.iri_listener.accept().await?;
        let mut verdict = [0u8; 1];
        stream.read_exact(&mut verdict).await?;
        Ok(decode_ledger_verdict(verdict[0]))
    }

    /// Every outbound message opens a fresh connection and closes it
    /// immediately afterward; there is no connection pool and no shared
    /// descriptor to synchronize over.
    async fn send_bytes(&self, port: u16, bytes: &[u8]) -> Result<(), ConsensusError> {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
        stream.write_all(bytes).await?;
        Ok(())
    }
}
