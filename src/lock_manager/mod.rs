use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::errors::{AbortReason, Error};
use crate::record::RowId;
use crate::txn_manager::{ArcTxn, TxnId, TxnState, IsolationLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    None,
    Shared,
    Exclusive,
}

/// One transaction's standing in a row's queue: the mode it asked for and
/// the mode it actually holds.
struct LockRequest {
    txn: ArcTxn,
    lock_mode: LockMode,
    granted: LockMode,
}

impl LockRequest {
    fn txn_id(&self) -> TxnId {
        self.txn.get_txn_id()
    }
}

/// FIFO queue of requests on one row, with the flags the wait predicates
/// check and a condvar for targeted wakeups.
struct LockRequestQueue {
    req_list: Vec<LockRequest>,
    cv: Arc<Condvar>,
    is_writing: bool,
    is_upgrading: bool,
    sharing_cnt: i32,
}

impl Default for LockRequestQueue {
    fn default() -> Self {
        Self {
            req_list: Vec::new(),
            cv: Arc::new(Condvar::new()),
            is_writing: false,
            is_upgrading: false,
            sharing_cnt: 0,
        }
    }
}

impl LockRequestQueue {
    fn emplace(&mut self, txn: ArcTxn, lock_mode: LockMode) {
        self.req_list.push(LockRequest {
            txn,
            lock_mode,
            granted: LockMode::None,
        });
    }

    fn position_of(&self, txn_id: TxnId) -> Option<usize> {
        self.req_list.iter().position(|r| r.txn_id() == txn_id)
    }

    fn erase(&mut self, txn_id: TxnId) -> Option<LockRequest> {
        self.position_of(txn_id).map(|i| self.req_list.remove(i))
    }
}

struct LockManagerInner {
    lock_table: HashMap<RowId, LockRequestQueue>,
    /// T1 -> T2 when T1 is blocked on a lock T2 holds. Neighbor sets are
    /// ordered so the cycle search is deterministic.
    waits_for: HashMap<TxnId, BTreeSet<TxnId>>,
}

/// Record-level strict two-phase locking with background deadlock
/// detection. One latch guards the lock table and the waits-for graph;
/// blocked acquirers sleep on their row's condvar.
pub struct LockManager {
    inner: Mutex<LockManagerInner>,
    enable_cycle_detection: AtomicBool,
    cycle_detection_interval_ms: AtomicU64,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LockManagerInner {
                lock_table: HashMap::new(),
                waits_for: HashMap::new(),
            }),
            enable_cycle_detection: AtomicBool::new(false),
            cycle_detection_interval_ms: AtomicU64::new(100),
        }
    }

    pub fn lock_shared(&self, txn: &ArcTxn, rid: RowId) -> Result<bool> {
        let mut inner = self.inner.lock();

        if txn.get_isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TxnState::Aborted);
            bail!(Error::TxnAborted(
                txn.get_txn_id(),
                AbortReason::SharedOnReadUncommitted
            ));
        }
        Self::lock_prepare(txn)?;

        // a lock already held is not re-counted
        if txn.holds_shared_lock(rid) || txn.holds_exclusive_lock(rid) {
            return Ok(true);
        }

        let queue = inner.lock_table.entry(rid).or_default();
        queue.emplace(txn.clone(), LockMode::Shared);

        self.wait_until(&mut inner, rid, txn, |queue| !queue.is_writing);
        self.check_abort(&mut inner, rid, txn)?;

        txn.add_shared_lock(rid);
        let queue = inner.lock_table.get_mut(&rid).unwrap();
        queue.sharing_cnt += 1;
        let position = queue.position_of(txn.get_txn_id()).unwrap();
        queue.req_list[position].granted = LockMode::Shared;

        Ok(true)
    }

    pub fn lock_exclusive(&self, txn: &ArcTxn, rid: RowId) -> Result<bool> {
        let mut inner = self.inner.lock();

        Self::lock_prepare(txn)?;

        if txn.holds_exclusive_lock(rid) {
            return Ok(true);
        }

        let queue = inner.lock_table.entry(rid).or_default();
        queue.emplace(txn.clone(), LockMode::Exclusive);

        self.wait_until(&mut inner, rid, txn, |queue| {
            !queue.is_writing && queue.sharing_cnt == 0
        });
        self.check_abort(&mut inner, rid, txn)?;

        txn.add_exclusive_lock(rid);
        let queue = inner.lock_table.get_mut(&rid).unwrap();
        queue.is_writing = true;
        let position = queue.position_of(txn.get_txn_id()).unwrap();
        queue.req_list[position].granted = LockMode::Exclusive;

        Ok(true)
    }

    /// Escalate a held shared lock to exclusive. Only one upgrade may be in
    /// flight per row.
    pub fn lock_upgrade(&self, txn: &ArcTxn, rid: RowId) -> Result<bool> {
        let mut inner = self.inner.lock();

        if txn.get_state() == TxnState::Shrinking {
            txn.set_state(TxnState::Aborted);
            bail!(Error::TxnAborted(
                txn.get_txn_id(),
                AbortReason::LockOnShrinking
            ));
        }

        let queue = inner.lock_table.entry(rid).or_default();
        if queue.is_upgrading {
            txn.set_state(TxnState::Aborted);
            bail!(Error::TxnAborted(
                txn.get_txn_id(),
                AbortReason::UpgradeConflict
            ));
        }

        let position = queue
            .position_of(txn.get_txn_id())
            .expect("upgrade without a prior lock request");
        if queue.req_list[position].granted == LockMode::Exclusive {
            return Ok(true);
        }

        // keep holding shared while waiting to be the only reader
        queue.req_list[position].lock_mode = LockMode::Exclusive;
        queue.is_upgrading = true;

        self.wait_until(&mut inner, rid, txn, |queue| {
            !queue.is_writing && queue.sharing_cnt == 1
        });

        if txn.get_state() == TxnState::Aborted {
            inner.lock_table.get_mut(&rid).unwrap().is_upgrading = false;
        }
        self.check_abort(&mut inner, rid, txn)?;

        txn.remove_shared_lock(rid);
        txn.add_exclusive_lock(rid);

        let queue = inner.lock_table.get_mut(&rid).unwrap();
        queue.sharing_cnt -= 1;
        queue.is_upgrading = false;
        queue.is_writing = true;
        let position = queue.position_of(txn.get_txn_id()).unwrap();
        queue.req_list[position].granted = LockMode::Exclusive;

        Ok(true)
    }

    pub fn unlock(&self, txn: &ArcTxn, rid: RowId) -> bool {
        let mut inner = self.inner.lock();

        txn.remove_shared_lock(rid);
        txn.remove_exclusive_lock(rid);

        let Some(queue) = inner.lock_table.get_mut(&rid) else {
            return false;
        };
        let Some(request) = queue.erase(txn.get_txn_id()) else {
            return false;
        };

        // releasing in the growing phase flips to shrinking; shared unlocks
        // under read-committed are exempt
        if txn.get_state() == TxnState::Growing
            && !(txn.get_isolation_level() == IsolationLevel::ReadCommitted
                && request.lock_mode == LockMode::Shared)
        {
            txn.set_state(TxnState::Shrinking);
        }

        match request.granted {
            LockMode::Shared => queue.sharing_cnt -= 1,
            LockMode::Exclusive => queue.is_writing = false,
            LockMode::None => {}
        }
        queue.cv.notify_all();

        true
    }

    fn lock_prepare(txn: &ArcTxn) -> Result<()> {
        if txn.get_state() == TxnState::Shrinking {
            txn.set_state(TxnState::Aborted);
            bail!(Error::TxnAborted(
                txn.get_txn_id(),
                AbortReason::LockOnShrinking
            ));
        }
        Ok(())
    }

    /// Sleep on the row's condvar until the predicate holds or the
    /// transaction was aborted under us.
    fn wait_until(
        &self,
        inner: &mut MutexGuard<LockManagerInner>,
        rid: RowId,
        txn: &ArcTxn,
        predicate: impl Fn(&LockRequestQueue) -> bool,
    ) {
        loop {
            let queue = inner.lock_table.get(&rid).unwrap();
            if txn.get_state() == TxnState::Aborted || predicate(queue) {
                return;
            }
            let cv = queue.cv.clone();
            cv.wait(inner);
        }
    }

    /// A woken transaction that was picked as a deadlock victim removes its
    /// own queue entry and surfaces the abort.
    fn check_abort(
        &self,
        inner: &mut MutexGuard<LockManagerInner>,
        rid: RowId,
        txn: &ArcTxn,
    ) -> Result<()> {
        if txn.get_state() == TxnState::Aborted {
            inner
                .lock_table
                .get_mut(&rid)
                .unwrap()
                .erase(txn.get_txn_id());
            bail!(Error::TxnAborted(txn.get_txn_id(), AbortReason::Deadlock));
        }
        Ok(())
    }

    pub fn add_edge(&self, t1: TxnId, t2: TxnId) {
        self.inner.lock().waits_for.entry(t1).or_default().insert(t2);
    }

    pub fn remove_edge(&self, t1: TxnId, t2: TxnId) {
        if let Some(neighbors) = self.inner.lock().waits_for.get_mut(&t1) {
            neighbors.remove(&t2);
        }
    }

    /// Deterministic cycle search: DFS roots and neighbors are explored in
    /// ascending txn order, and the youngest (largest) id on the first
    /// cycle found is reported.
    pub fn has_cycle(&self) -> Option<TxnId> {
        let inner = self.inner.lock();
        Self::find_cycle_victim(&inner.waits_for)
    }

    fn find_cycle_victim(waits_for: &HashMap<TxnId, BTreeSet<TxnId>>) -> Option<TxnId> {
        let mut txn_ids: BTreeSet<TxnId> = waits_for.keys().copied().collect();
        for neighbors in waits_for.values() {
            txn_ids.extend(neighbors.iter().copied());
        }

        for &start in &txn_ids {
            let mut visited = HashSet::new();
            let mut path = Vec::new();
            if let Some(revisited) = Self::dfs(waits_for, start, &mut visited, &mut path) {
                let mut newest = revisited;
                while let Some(&top) = path.last() {
                    if top == revisited {
                        break;
                    }
                    newest = newest.max(top);
                    path.pop();
                }
                return Some(newest);
            }
        }
        None
    }

    fn dfs(
        waits_for: &HashMap<TxnId, BTreeSet<TxnId>>,
        txn_id: TxnId,
        visited: &mut HashSet<TxnId>,
        path: &mut Vec<TxnId>,
    ) -> Option<TxnId> {
        if visited.contains(&txn_id) {
            return Some(txn_id);
        }
        visited.insert(txn_id);
        path.push(txn_id);

        if let Some(neighbors) = waits_for.get(&txn_id) {
            for &next in neighbors {
                if let Some(revisited) = Self::dfs(waits_for, next, visited, path) {
                    return Some(revisited);
                }
            }
        }

        visited.remove(&txn_id);
        path.pop();
        None
    }

    /// Current edges, sorted. Testing hook.
    pub fn get_edge_list(&self) -> Vec<(TxnId, TxnId)> {
        let inner = self.inner.lock();
        let mut edges: Vec<(TxnId, TxnId)> = inner
            .waits_for
            .iter()
            .flat_map(|(&t1, neighbors)| neighbors.iter().map(move |&t2| (t1, t2)))
            .collect();
        edges.sort();
        edges
    }

    pub fn enable_cycle_detection(&self, interval: Duration) {
        self.cycle_detection_interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
        self.enable_cycle_detection.store(true, Ordering::Relaxed);
    }

    pub fn disable_cycle_detection(&self) {
        self.enable_cycle_detection.store(false, Ordering::Relaxed);
    }

    /// Detector loop, run on a dedicated thread. Each round rebuilds the
    /// waits-for graph from the lock table, aborts the youngest transaction
    /// of every cycle, wakes the row it was blocked on, and clears the
    /// graph again.
    pub fn run_cycle_detection(&self) {
        while self.enable_cycle_detection.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(
                self.cycle_detection_interval_ms.load(Ordering::Relaxed),
            ));

            let mut inner = self.inner.lock();

            // blocked txn -> (row it waits on, its handle)
            let mut required_row: HashMap<TxnId, (RowId, ArcTxn)> = HashMap::new();
            let mut edges: Vec<(TxnId, TxnId)> = Vec::new();
            for (&rid, queue) in &inner.lock_table {
                for request in queue.req_list.iter().filter(|r| r.granted == LockMode::None) {
                    required_row.insert(request.txn_id(), (rid, request.txn.clone()));
                    for granted in queue.req_list.iter().filter(|r| r.granted != LockMode::None)
                    {
                        edges.push((request.txn_id(), granted.txn_id()));
                    }
                }
            }
            for (t1, t2) in edges {
                inner.waits_for.entry(t1).or_default().insert(t2);
            }

            while let Some(victim) = Self::find_cycle_victim(&inner.waits_for) {
                Self::delete_node(&mut *inner, victim);
                if let Some((rid, txn)) = required_row.get(&victim) {
                    txn.set_state(TxnState::Aborted);
                    if let Some(queue) = inner.lock_table.get(rid) {
                        queue.cv.notify_all();
                    }
                }
            }

            inner.waits_for.clear();
        }
    }

    /// Drop a victim from the graph: its outgoing edges and the edges of
    /// waiters blocked on rows it holds.
    fn delete_node(inner: &mut LockManagerInner, victim: TxnId) {
        inner.waits_for.remove(&victim);

        let mut stale_edges: Vec<TxnId> = Vec::new();
        for queue in inner.lock_table.values() {
            let victim_holds = queue
                .req_list
                .iter()
                .any(|r| r.txn_id() == victim && r.granted != LockMode::None);
            if !victim_holds {
                continue;
            }
            stale_edges.extend(
                queue
                    .req_list
                    .iter()
                    .filter(|r| r.granted == LockMode::None)
                    .map(|r| r.txn_id()),
            );
        }
        for waiter in stale_edges {
            if let Some(neighbors) = inner.waits_for.get_mut(&waiter) {
                neighbors.remove(&victim);
            }
        }
    }
}
