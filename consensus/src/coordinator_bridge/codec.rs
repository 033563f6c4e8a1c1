/// Wire framing for the three Coordinator-facing channels: the inbound
/// proposal frame, the outbound ack/QC frames, and the ledger validation
/// round-trip. Framing is raw bytes with no length prefix; every boundary
/// relies on a fixed size, so decoding is mostly "is this exactly N bytes".
use crate::crypto::Hash;
use crate::error::ConsensusError;
use crate::types::CommandId;

pub const INBOUND_PROPOSAL_FRAME_LEN: usize = 164;
pub const LEDGER_VALIDATION_REQUEST_LEN: usize = 162;
pub const COORDINATOR_ACK_BYTE: u8 = 0x12;
pub const LEDGER_LEGAL_BYTE: u8 = 0x01;

/// A decoded inbound proposal: a sequence id and six command identifiers.
/// Element 5 only carries a 2-byte tag in the wire frame; the remaining 30
/// bytes are zero-filled here rather than left meaningful.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProposalFrame {
    pub id: u16,
    pub commands: [CommandId; 6],
}

/// Decode exactly `INBOUND_PROPOSAL_FRAME_LEN` bytes: `id_hi:1 | id_lo:1 |
/// hashes:162`, six 32-byte hash slots with the sixth truncated to its
/// first two bytes.
pub fn decode_proposal_frame(frame: &[u8]) -> Result<ProposalFrame, ConsensusError> {
    if frame.len() != INBOUND_PROPOSAL_FRAME_LEN {
        return Err(ConsensusError::ProtocolViolation(format!(
            "inbound proposal frame must be {INBOUND_PROPOSAL_FRAME_LEN} bytes, got {}",
            frame.len()
        )));
    }
    let id = (frame[0] as u16) * 256 + frame[1] as u16;

    let mut commands: [CommandId; 6] = [Hash::genesis(); 6];
    let body = &frame[2..];
    for (i, slot) in commands.iter_mut().enumerate().take(5) {
        let start = i * 32;
        *slot = Hash::from_slice(&body[start..start + 32])?;
    }
    let mut tag_bytes = [0u8; 32];
    tag_bytes[0] = body[160];
    tag_bytes[1] = body[161];
    commands[5] = Hash::new(tag_bytes);

    Ok(ProposalFrame { id, commands })
}

/// Build the 162-byte ledger validation request: five full command hashes
/// followed by the sixth command's first two bytes.
pub fn encode_ledger_validation_request(commands: &[CommandId]) -> Result<[u8; LEDGER_VALIDATION_REQUEST_LEN], ConsensusError> {
    if commands.len() != 6 {
        return Err(ConsensusError::ProtocolViolation(format!(
            "ledger validation expects exactly 6 commands, got {}",
            commands.len()
        )));
    }
    let mut buf = [0u8; LEDGER_VALIDATION_REQUEST_LEN];
    for (i, cmd) in commands.iter().enumerate().take(5) {
        let start = i * 32;
        buf[start..start + 32].copy_from_slice(cmd.as_bytes());
    }
    buf[160] = commands[5].as_bytes()[0];
    buf[161] = commands[5].as_bytes()[1];
    Ok(buf)
}

/// `true` iff the single response byte signals legality.
pub fn decode_ledger_verdict(byte: u8) -> bool {
    byte == LEDGER_LEGAL_BYTE
}

pub fn encode_coordinator_ack() -> [u8; 1] {
    [COORDINATOR_ACK_BYTE]
}
