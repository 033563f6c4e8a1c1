/// Quorum certificates: a threshold signature under construction or
/// completed.
///
/// A QC never collapses its partial signatures into one aggregate value —
/// the outbound wire frame the Coordinator expects lists each signer's
/// individual signature bytes, so `sigs` stays a map keyed by replica id
/// for the certificate's whole lifetime. `compute` only freezes the set
/// once quorum is reached; it does not discard anything.
use crate::crypto::{Hash, PartialSignature};
use crate::types::ReplicaId;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QcError {
    #[error("quorum certificate has not reached quorum yet ({present}/{required})")]
    NotYetComplete { present: usize, required: usize },
}

/// An aggregate signature accumulator over a single 32-byte object hash.
///
/// The object hash is, by convention applied identically at propose, vote,
/// and finalization time: a block's first command if it carries any, else
/// the block's own hash.
#[derive(Clone, Debug)]
pub struct QuorumCert {
    obj_hash: Hash,
    sigs: BTreeMap<ReplicaId, PartialSignature>,
    computed: bool,
}

impl QuorumCert {
    /// A fresh, empty certificate over `obj_hash`.
    pub fn new(obj_hash: Hash) -> Self {
        Self {
            obj_hash,
            sigs: BTreeMap::new(),
            computed: false,
        }
    }

    pub fn obj_hash(&self) -> Hash {
        self.obj_hash
    }

    /// Record `rid`'s partial signature. Overwrites any prior signature
    /// from the same replica (callers are expected to reject duplicate
    /// voters before reaching this point).
    pub fn add_part(&mut self, rid: ReplicaId, part: PartialSignature) {
        self.sigs.insert(rid, part);
    }

    pub fn signers(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        self.sigs.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.sigs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sigs.is_empty()
    }

    pub fn has_signer(&self, rid: ReplicaId) -> bool {
        self.sigs.contains_key(&rid)
    }

    pub fn is_computed(&self) -> bool {
        self.computed
    }

    /// Finalize the certificate once quorum has been reached. Further
    /// `add_part` calls are still accepted (late votes below quorum are
    /// never delivered here in practice, since the core stops forwarding
    /// them once a block's voter count reaches `nmajority`), but the
    /// certificate is considered quorum-complete from this point on.
    pub fn compute(&mut self, nmajority: usize) -> Result<(), QcError> {
        if self.sigs.len() < nmajority {
            return Err(QcError::NotYetComplete {
                present: self.sigs.len(),
                required: nmajority,
            });
        }
        self.computed = true;
        Ok(())
    }

    /// The genesis block is its own bootstrapping justification: no real
    /// replica signs it, so its certificate is marked complete without
    /// ever meeting a signer threshold.
    pub fn genesis(obj_hash: Hash) -> Self {
        Self {
            obj_hash,
            sigs: BTreeMap::new(),
            computed: true,
        }
    }

    /// Reconstruct an already-complete QC received as another block's
    /// embedded justify-QC, carrying only the signer set. The network
    /// layer has no way to forward raw signature bytes for a QC it did not
    /// itself assemble from votes, and nothing downstream needs them: the
    /// core only ever re-serializes a `self_qc` it accumulated locally from
    /// real votes, never a justify-QC it received from a peer.
    pub fn from_remote_signers(obj_hash: Hash, signers: Vec<ReplicaId>) -> Self {
        let sigs = signers.into_iter().map(|rid| (rid, PartialSignature::placeholder())).collect();
        Self {
            obj_hash,
            sigs,
            computed: true,
        }
    }

    /// `obj_hash:32 | repeat { rid:1 | siglen:1 | sig:siglen }`, one tuple
    /// per signer in ascending replica-id order.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + self.sigs.len() * 34);
        buf.extend_from_slice(self.obj_hash.as_bytes());
        for (rid, sig) in &self.sigs {
            buf.push(*rid as u8);
            buf.push(sig.len() as u8);
            buf.extend_from_slice(sig.to_bytes());
        }
        buf
    }
}
