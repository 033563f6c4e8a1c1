/// Small shared types that don't deserve their own module.
use crate::crypto::{Hash, PartialSignature};
use serde::{Deserialize, Serialize};

/// A replica's identifier within the configured validator set.
pub type ReplicaId = u16;

/// A command is identified by its 32-byte hash; the core never inspects
/// command payloads, only forwards their hashes to the ledger validator.
pub type CommandId = Hash;

/// A vote cast by one replica for one block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Vote {
    pub voter: ReplicaId,
    pub block_hash: Hash,
    #[serde(with = "partial_sig_bytes")]
    pub partial_sig: PartialSignature,
}

impl Vote {
    pub fn new(voter: ReplicaId, block_hash: Hash, partial_sig: PartialSignature) -> Self {
        Self {
            voter,
            block_hash,
            partial_sig,
        }
    }
}

/// A commit notification emitted once per decided command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finality {
    pub replica_id: ReplicaId,
    pub commit: bool,
    pub cmd_index: usize,
    pub height: u64,
    pub cmd: CommandId,
    pub block_hash: Hash,
}

mod partial_sig_bytes {
    use crate::crypto::PartialSignature;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(sig: &PartialSignature, s: S) -> Result<S::Ok, S::Error> {
        sig.to_bytes().to_vec().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<PartialSignature, D::Error> {
        let bytes = Vec::<u8>::deserialize(d)?;
        PartialSignature::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}
