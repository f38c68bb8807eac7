use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use alloy_primitives::{keccak256, Address, B256, U256};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("state trie does not contain state root {0}")]
    UnknownStateRoot(B256),
    #[error("no open checkpoint")]
    NoCheckpoint,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub nonce: u64,
    pub balance: U256,
}

/// Full account state at one root. Ordered so the root derivation is
/// independent of insertion order.
pub type StateSnapshot = BTreeMap<Address, AccountState>;

/// Commitment to a snapshot.
pub fn snapshot_root(state: &StateSnapshot) -> B256 {
    let mut preimage = Vec::with_capacity(state.len() * 60);
    for (address, account) in state {
        preimage.extend_from_slice(address.as_slice());
        preimage.extend_from_slice(&account.nonce.to_be_bytes());
        preimage.extend_from_slice(&account.balance.to_be_bytes::<32>());
    }
    keccak256(&preimage)
}

pub fn empty_state_root() -> B256 {
    snapshot_root(&StateSnapshot::new())
}

/// Authenticated state store consumed by the execution engine.
///
/// The engine only ever asks whether a root is materialized, repositions the
/// backend on a root, and bootstraps genesis; everything else (account
/// mutation, sealing new roots) is the virtual machine's business.
pub trait StateBackend {
    fn state_root(&self) -> B256;

    /// Reposition on a previously materialized root.
    fn set_state_root(&mut self, root: B256) -> Result<(), StateError>;

    fn has_state_root(&self, root: &B256) -> bool;

    /// True when no root has ever been materialized.
    fn is_empty(&self) -> bool;

    /// Materialize the canonical genesis state and position on its root.
    fn generate_canonical_genesis(&mut self, state: StateSnapshot) -> Result<B256, StateError>;

    fn checkpoint(&mut self);
    fn commit(&mut self) -> Result<(), StateError>;
    fn revert(&mut self) -> Result<(), StateError>;

    /// Release the handle to the underlying database.
    fn close(&mut self);
}

/// In-memory trie stand-in: a shared root -> snapshot map plus a per-handle
/// cursor. Clones share materialized roots but keep independent cursors and
/// checkpoint stacks, which is what a shallow VM copy needs.
#[derive(Debug, Clone)]
pub struct InMemoryTrie {
    roots: Arc<Mutex<HashMap<B256, StateSnapshot>>>,
    current_root: B256,
    working: StateSnapshot,
    checkpoints: Vec<StateSnapshot>,
}

impl InMemoryTrie {
    pub fn new() -> Self {
        Self {
            roots: Arc::new(Mutex::new(HashMap::new())),
            current_root: empty_state_root(),
            working: StateSnapshot::new(),
            checkpoints: Vec::new(),
        }
    }

    pub fn account(&self, address: &Address) -> Option<AccountState> {
        self.working.get(address).cloned()
    }

    pub fn set_account(&mut self, address: Address, account: AccountState) {
        self.working.insert(address, account);
    }

    /// Persist the working state under `root` and position on it.
    pub fn seal_state(&mut self, root: B256) {
        self.roots.lock().unwrap().insert(root, self.working.clone());
        self.current_root = root;
    }

    /// Drop a materialized root, e.g. when pruning.
    pub fn delete_state_root(&self, root: &B256) -> bool {
        self.roots.lock().unwrap().remove(root).is_some()
    }

    pub fn materialized_roots(&self) -> usize {
        self.roots.lock().unwrap().len()
    }
}

impl Default for InMemoryTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl StateBackend for InMemoryTrie {
    fn state_root(&self) -> B256 {
        self.current_root
    }

    fn set_state_root(&mut self, root: B256) -> Result<(), StateError> {
        let snapshot = self
            .roots
            .lock()
            .unwrap()
            .get(&root)
            .cloned()
            .ok_or(StateError::UnknownStateRoot(root))?;
        self.current_root = root;
        self.working = snapshot;
        self.checkpoints.clear();
        Ok(())
    }

    fn has_state_root(&self, root: &B256) -> bool {
        self.roots.lock().unwrap().contains_key(root)
    }

    fn is_empty(&self) -> bool {
        self.roots.lock().unwrap().is_empty()
    }

    fn generate_canonical_genesis(&mut self, state: StateSnapshot) -> Result<B256, StateError> {
        let root = snapshot_root(&state);
        self.roots.lock().unwrap().insert(root, state.clone());
        self.current_root = root;
        self.working = state;
        self.checkpoints.clear();
        debug!(%root, accounts = self.working.len(), "materialized genesis state");
        Ok(root)
    }

    fn checkpoint(&mut self) {
        self.checkpoints.push(self.working.clone());
    }

    fn commit(&mut self) -> Result<(), StateError> {
        self.checkpoints.pop().ok_or(StateError::NoCheckpoint)?;
        Ok(())
    }

    fn revert(&mut self) -> Result<(), StateError> {
        self.working = self.checkpoints.pop().ok_or(StateError::NoCheckpoint)?;
        Ok(())
    }

    fn close(&mut self) {
        self.checkpoints.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(nonce: u64, balance: u64) -> AccountState {
        AccountState {
            nonce,
            balance: U256::from(balance),
        }
    }

    #[test]
    fn snapshot_root_is_order_independent_and_deterministic() {
        let mut a = StateSnapshot::new();
        a.insert(Address::repeat_byte(1), account(0, 100));
        a.insert(Address::repeat_byte(2), account(5, 42));

        let mut b = StateSnapshot::new();
        b.insert(Address::repeat_byte(2), account(5, 42));
        b.insert(Address::repeat_byte(1), account(0, 100));

        assert_eq!(snapshot_root(&a), snapshot_root(&b));
        assert_ne!(snapshot_root(&a), empty_state_root());
    }

    #[test]
    fn genesis_materialization() {
        let mut trie = InMemoryTrie::new();
        assert!(trie.is_empty());

        let mut alloc = StateSnapshot::new();
        alloc.insert(Address::repeat_byte(7), account(0, 1_000_000));
        let root = trie.generate_canonical_genesis(alloc).unwrap();

        assert!(!trie.is_empty());
        assert!(trie.has_state_root(&root));
        assert_eq!(trie.state_root(), root);
        assert_eq!(trie.account(&Address::repeat_byte(7)), Some(account(0, 1_000_000)));
    }

    #[test]
    fn set_state_root_rejects_unknown_roots() {
        let mut trie = InMemoryTrie::new();
        let missing = B256::repeat_byte(0xaa);
        assert_eq!(
            trie.set_state_root(missing),
            Err(StateError::UnknownStateRoot(missing))
        );
    }

    #[test]
    fn checkpoint_revert_restores_accounts() {
        let mut trie = InMemoryTrie::new();
        trie.generate_canonical_genesis(StateSnapshot::new()).unwrap();

        trie.checkpoint();
        trie.set_account(Address::repeat_byte(1), account(1, 9));
        trie.revert().unwrap();
        assert_eq!(trie.account(&Address::repeat_byte(1)), None);

        trie.checkpoint();
        trie.set_account(Address::repeat_byte(1), account(1, 9));
        trie.commit().unwrap();
        assert_eq!(trie.account(&Address::repeat_byte(1)), Some(account(1, 9)));

        assert_eq!(trie.commit(), Err(StateError::NoCheckpoint));
    }

    #[test]
    fn clones_share_roots_but_not_cursors() {
        let mut trie = InMemoryTrie::new();
        let genesis = trie.generate_canonical_genesis(StateSnapshot::new()).unwrap();

        let mut copy = trie.clone();
        copy.set_account(Address::repeat_byte(3), account(0, 5));
        let sealed = B256::repeat_byte(0x55);
        copy.seal_state(sealed);

        // the new root is visible through the original handle
        assert!(trie.has_state_root(&sealed));
        // but the original cursor did not move
        assert_eq!(trie.state_root(), genesis);
        assert_eq!(copy.state_root(), sealed);

        // deleting through either handle affects both
        assert!(trie.delete_state_root(&sealed));
        assert!(!copy.has_state_root(&sealed));
    }
}
