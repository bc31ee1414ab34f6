use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::{Mutex, RwLock};

use crate::lock_manager::LockManager;
use crate::record::RowId;

pub type TxnId = i32;
pub const INVALID_TXN_ID: TxnId = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// 2PL state machine: growing -> shrinking on the first unlock, then a
/// terminal commit or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// A transaction. Shared behind an [`Arc`] because the deadlock detector
/// flips victims to aborted from its own thread.
pub struct Txn {
    txn_id: TxnId,
    iso_level: IsolationLevel,
    thread_id: ThreadId,
    state: Mutex<TxnState>,
    shared_lock_set: Mutex<std::collections::HashSet<RowId>>,
    exclusive_lock_set: Mutex<std::collections::HashSet<RowId>>,
}

pub type ArcTxn = Arc<Txn>;

impl Txn {
    pub fn new(txn_id: TxnId, iso_level: IsolationLevel) -> ArcTxn {
        Arc::new(Self {
            txn_id,
            iso_level,
            thread_id: std::thread::current().id(),
            state: Mutex::new(TxnState::Growing),
            shared_lock_set: Mutex::new(Default::default()),
            exclusive_lock_set: Mutex::new(Default::default()),
        })
    }

    pub fn get_txn_id(&self) -> TxnId {
        self.txn_id
    }

    pub fn get_isolation_level(&self) -> IsolationLevel {
        self.iso_level
    }

    pub fn get_thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn get_state(&self) -> TxnState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TxnState) {
        *self.state.lock() = state;
    }

    pub fn add_shared_lock(&self, rid: RowId) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub fn remove_shared_lock(&self, rid: RowId) {
        self.shared_lock_set.lock().remove(&rid);
    }

    pub fn holds_shared_lock(&self, rid: RowId) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn shared_lock_count(&self) -> usize {
        self.shared_lock_set.lock().len()
    }

    pub fn add_exclusive_lock(&self, rid: RowId) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub fn remove_exclusive_lock(&self, rid: RowId) {
        self.exclusive_lock_set.lock().remove(&rid);
    }

    pub fn holds_exclusive_lock(&self, rid: RowId) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    pub fn exclusive_lock_count(&self) -> usize {
        self.exclusive_lock_set.lock().len()
    }

    pub fn shared_lock_rows(&self) -> Vec<RowId> {
        self.shared_lock_set.lock().iter().copied().collect()
    }

    pub fn exclusive_lock_rows(&self) -> Vec<RowId> {
        self.exclusive_lock_set.lock().iter().copied().collect()
    }

    /// Every row the transaction holds any lock on.
    pub fn locked_rows(&self) -> Vec<RowId> {
        let mut rows: std::collections::HashSet<RowId> =
            self.shared_lock_set.lock().iter().copied().collect();
        rows.extend(self.exclusive_lock_set.lock().iter().copied());
        rows.into_iter().collect()
    }
}

/// Hands out monotonically increasing transaction ids and drives the
/// commit/abort endgame (release every lock held).
pub struct TxnManager {
    next_txn_id: AtomicI32,
    lock_manager: Arc<LockManager>,
    txn_map: RwLock<HashMap<TxnId, ArcTxn>>,
}

impl TxnManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicI32::new(0),
            lock_manager,
            txn_map: RwLock::new(HashMap::new()),
        }
    }

    /// Register a transaction, minting a fresh id when none is supplied.
    pub fn begin(&self, txn: Option<ArcTxn>, iso_level: IsolationLevel) -> ArcTxn {
        let txn = txn.unwrap_or_else(|| {
            Txn::new(self.next_txn_id.fetch_add(1, Ordering::Relaxed), iso_level)
        });
        self.txn_map.write().insert(txn.get_txn_id(), txn.clone());
        txn
    }

    pub fn commit(&self, txn: &ArcTxn) {
        txn.set_state(TxnState::Committed);
        self.release_locks(txn);
    }

    pub fn abort(&self, txn: &ArcTxn) {
        txn.set_state(TxnState::Aborted);
        self.release_locks(txn);
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<ArcTxn> {
        self.txn_map.read().get(&txn_id).cloned()
    }

    fn release_locks(&self, txn: &ArcTxn) {
        for rid in txn.locked_rows() {
            self.lock_manager.unlock(txn, rid);
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub fn test_txn_manager() -> (Arc<LockManager>, TxnManager) {
        let lock_manager = Arc::new(LockManager::new());
        let txn_manager = TxnManager::new(lock_manager.clone());
        (lock_manager, txn_manager)
    }

    #[test]
    fn test_monotone_ids() {
        let (_, txn_manager) = test_txn_manager();
        let t0 = txn_manager.begin(None, IsolationLevel::RepeatableRead);
        let t1 = txn_manager.begin(None, IsolationLevel::ReadCommitted);

        assert!(t0.get_txn_id() < t1.get_txn_id());
        assert_eq!(TxnState::Growing, t0.get_state());
        assert_eq!(
            t0.get_txn_id(),
            txn_manager
                .get_transaction(t0.get_txn_id())
                .unwrap()
                .get_txn_id()
        );
        assert!(txn_manager.get_transaction(99).is_none());
    }

    #[test]
    fn test_commit_releases_all_locks() {
        let (lock_manager, txn_manager) = test_txn_manager();
        let txn = txn_manager.begin(None, IsolationLevel::RepeatableRead);

        lock_manager.lock_shared(&txn, RowId::new(0, 0)).unwrap();
        lock_manager.lock_exclusive(&txn, RowId::new(0, 1)).unwrap();
        assert_eq!(1, txn.shared_lock_count());
        assert_eq!(1, txn.exclusive_lock_count());

        txn_manager.commit(&txn);
        assert_eq!(TxnState::Committed, txn.get_state());
        assert_eq!(0, txn.shared_lock_count());
        assert_eq!(0, txn.exclusive_lock_count());
    }
}
