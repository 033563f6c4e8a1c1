/// One-shot signals the core fires as it processes events, re-expressed
/// over `tokio::sync::oneshot`.
///
/// `ReplaceOnFire` models `propose_waiting`, `receive_proposal_waiting`,
/// and `hqc_update_waiting`: each fire hands the value to every consumer
/// subscribed so far and leaves a fresh, empty slot behind for the next
/// round. `QcWaitingRegistry` models `qc_waiting`: a per-block, fire-once
/// signal where a late subscriber (after the QC already completed) must
/// get back an already-resolved receiver rather than wait forever.
use crate::crypto::Hash;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// A recurring, replace-on-fire broadcast of one value per event.
pub struct ReplaceOnFire<T: Clone + Send + 'static> {
    waiters: Mutex<Vec<oneshot::Sender<T>>>,
}

impl<T: Clone + Send + 'static> Default for ReplaceOnFire<T> {
    fn default() -> Self {
        Self {
            waiters: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone + Send + 'static> ReplaceOnFire<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the next fire. If called after a fire, the returned
    /// receiver only resolves on the *following* fire — matching the
    /// "replace" half of replace-on-fire for these recurring signals.
    pub fn subscribe(&self) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().expect("promise mutex poisoned").push(tx);
        rx
    }

    /// Resolve every waiter subscribed so far with `value`, then clear
    /// the waiter list so the next subscriber starts a fresh round.
    pub fn fire(&self, value: T) {
        let waiters = std::mem::take(&mut *self.waiters.lock().expect("promise mutex poisoned"));
        for tx in waiters {
            let _ = tx.send(value.clone());
        }
    }
}

/// Per-block signals resolved once that block's `self_qc` reaches
/// quorum. Unlike `ReplaceOnFire`, completion here is a durable fact about
/// the block, not a recurring event: once fired, every later subscriber
/// for the same hash gets an already-resolved receiver.
#[derive(Default)]
pub struct QcWaitingRegistry {
    slots: Mutex<HashMap<Hash, Slot>>,
}

enum Slot {
    Pending(Vec<oneshot::Sender<()>>),
    Complete,
}

impl QcWaitingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, block_hash: Hash) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.slots.lock().expect("qc_waiting mutex poisoned");
        match slots.get_mut(&block_hash) {
            Some(Slot::Complete) => {
                let _ = tx.send(());
            }
            Some(Slot::Pending(waiters)) => waiters.push(tx),
            None => {
                slots.insert(block_hash, Slot::Pending(vec![tx]));
            }
        }
        rx
    }

    /// Mark `block_hash`'s QC complete, resolving every waiter registered
    /// so far and any future subscriber immediately.
    pub fn resolve(&self, block_hash: Hash) {
        let mut slots = self.slots.lock().expect("qc_waiting mutex poisoned");
        let previous = slots.insert(block_hash, Slot::Complete);
        if let Some(Slot::Pending(waiters)) = previous {
            for tx in waiters {
                let _ = tx.send(());
            }
        }
    }

    pub fn is_complete(&self, block_hash: &Hash) -> bool {
        matches!(
            self.slots.lock().expect("qc_waiting mutex poisoned").get(block_hash),
            Some(Slot::Complete)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replace_on_fire_resolves_subscribers_before_fire() {
        let signal: ReplaceOnFire<u64> = ReplaceOnFire::new();
        let rx = signal.subscribe();
        signal.fire(42);
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn replace_on_fire_leaves_fresh_slot_for_next_round() {
        let signal: ReplaceOnFire<u64> = ReplaceOnFire::new();
        let first = signal.subscribe();
        signal.fire(1);
        assert_eq!(first.await.unwrap(), 1);

        let second = signal.subscribe();
        signal.fire(2);
        assert_eq!(second.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn qc_waiting_resolves_late_subscriber_immediately() {
        let registry = QcWaitingRegistry::new();
        let hash = Hash::new([1u8; 32]);
        registry.resolve(hash);

        let rx = registry.subscribe(hash);
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn qc_waiting_resolves_early_subscriber_on_completion() {
        let registry = QcWaitingRegistry::new();
        let hash = Hash::new([2u8; 32]);
        let rx = registry.subscribe(hash);

        registry.resolve(hash);
        assert!(rx.await.is_ok());
    }
}
