pub mod log_record;

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Unbounded};

use crate::pages::{Lsn, INVALID_LSN};
use crate::printdbg;
use crate::txn_manager::TxnId;
pub use log_record::{LogFactory, LogOp, LogRecord};

/// The recovered key/value view of committed state.
pub type KvDatabase = HashMap<String, i32>;

/// A fuzzy snapshot: everything with an LSN at or below `checkpoint_lsn` is
/// already reflected in `persist_data`; `active_txns` maps the still-open
/// transactions to their last LSN at snapshot time.
#[derive(Debug, Clone)]
pub struct CheckPoint {
    pub checkpoint_lsn: Lsn,
    pub active_txns: HashMap<TxnId, Lsn>,
    pub persist_data: KvDatabase,
}

impl Default for CheckPoint {
    fn default() -> Self {
        Self {
            checkpoint_lsn: INVALID_LSN,
            active_txns: HashMap::new(),
            persist_data: KvDatabase::new(),
        }
    }
}

impl CheckPoint {
    pub fn add_active_txn(&mut self, txn_id: TxnId, last_lsn: Lsn) {
        self.active_txns.insert(txn_id, last_lsn);
    }

    pub fn add_data(&mut self, key: &str, value: i32) {
        self.persist_data.insert(key.to_string(), value);
    }
}

/// Replays a logical log after a crash: redo everything past the
/// checkpoint in LSN order, then walk each unfinished transaction's
/// prev-LSN chain backwards applying inverse operations. Inconsistent
/// records are skipped with a warning; replay never gives up.
pub struct RecoveryManager {
    log_recs: BTreeMap<Lsn, LogRecord>,
    persist_lsn: Lsn,
    active_txns: HashMap<TxnId, Lsn>,
    unended_txns: HashMap<TxnId, Lsn>,
    data: KvDatabase,
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryManager {
    pub fn new() -> Self {
        Self {
            log_recs: BTreeMap::new(),
            persist_lsn: INVALID_LSN,
            active_txns: HashMap::new(),
            unended_txns: HashMap::new(),
            data: KvDatabase::new(),
        }
    }

    pub fn init(&mut self, checkpoint: CheckPoint) {
        self.persist_lsn = checkpoint.checkpoint_lsn;
        self.active_txns = checkpoint.active_txns;
        self.data = checkpoint.persist_data;
    }

    pub fn append_log_rec(&mut self, rec: LogRecord) {
        self.log_recs.insert(rec.get_lsn(), rec);
    }

    pub fn get_database(&self) -> &KvDatabase {
        &self.data
    }

    /// Roll the data forward from the checkpoint. Commit records retire a
    /// transaction; an abort record replays that transaction's undo chain
    /// on the spot.
    pub fn redo_phase(&mut self) {
        self.unended_txns = self.active_txns.clone();

        let lsns: Vec<Lsn> = self
            .log_recs
            .range((Excluded(self.persist_lsn), Unbounded))
            .map(|(&lsn, _)| lsn)
            .collect();

        for lsn in lsns {
            let rec = self.log_recs[&lsn].clone();
            self.unended_txns.insert(rec.get_txn_id(), lsn);

            match rec.get_op() {
                LogOp::Begin => {}
                LogOp::Commit => {
                    self.unended_txns.remove(&rec.get_txn_id());
                }
                LogOp::Abort => {
                    self.undo_txn(rec.get_prev_lsn());
                    self.unended_txns.remove(&rec.get_txn_id());
                }
                LogOp::Insert { key, value } => {
                    if self.data.contains_key(key) {
                        printdbg!("redo insert of existing key {}, skipped", key);
                        continue;
                    }
                    self.data.insert(key.clone(), *value);
                }
                LogOp::Delete { key, value } => {
                    if self.data.get(key) != Some(value) {
                        printdbg!("redo delete of inconsistent key {}, skipped", key);
                        continue;
                    }
                    self.data.remove(key);
                }
                LogOp::Update {
                    old_key, new_key, new_value, ..
                } => {
                    self.data.remove(old_key);
                    self.data.insert(new_key.clone(), *new_value);
                }
            }
        }
    }

    /// Roll every transaction that never ended back out.
    pub fn undo_phase(&mut self) {
        let unended: Vec<Lsn> = self.unended_txns.values().copied().collect();
        for last_lsn in unended {
            self.undo_txn(last_lsn);
        }
        self.unended_txns.clear();
    }

    /// Apply inverse operations backwards along one transaction's prev-LSN
    /// chain, stopping at its begin record.
    fn undo_txn(&mut self, last_lsn: Lsn) {
        let mut lsn = last_lsn;
        while lsn != INVALID_LSN {
            let Some(rec) = self.log_recs.get(&lsn).cloned() else {
                printdbg!("undo chain broke at lsn {}", lsn);
                return;
            };

            match rec.get_op() {
                LogOp::Begin => return,
                LogOp::Commit | LogOp::Abort => {
                    printdbg!("unexpected end record in undo chain at lsn {}", lsn);
                }
                LogOp::Insert { key, .. } => {
                    if self.data.remove(key).is_none() {
                        printdbg!("undo insert of missing key {}, skipped", key);
                    }
                }
                LogOp::Delete { key, value } => {
                    if self.data.contains_key(key) {
                        printdbg!("undo delete of existing key {}, skipped", key);
                    } else {
                        self.data.insert(key.clone(), *value);
                    }
                }
                LogOp::Update {
                    old_key, old_value, new_key, ..
                } => {
                    self.data.remove(new_key);
                    self.data.insert(old_key.clone(), *old_value);
                }
            }

            lsn = rec.get_prev_lsn();
        }
    }
}
