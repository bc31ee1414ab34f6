use std::collections::HashMap;

use crate::pages::{Lsn, INVALID_LSN};
use crate::txn_manager::TxnId;

/// Logical operations the write-ahead log records.
#[derive(Debug, Clone, PartialEq)]
pub enum LogOp {
    Begin,
    Commit,
    Abort,
    Insert {
        key: String,
        value: i32,
    },
    Delete {
        key: String,
        value: i32,
    },
    Update {
        old_key: String,
        old_value: i32,
        new_key: String,
        new_value: i32,
    },
}

/// One log entry. `prev_lsn` threads the records of a transaction into a
/// backward chain so an undo walks only that transaction's history.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    lsn: Lsn,
    txn_id: TxnId,
    prev_lsn: Lsn,
    op: LogOp,
}

impl LogRecord {
    pub fn get_lsn(&self) -> Lsn {
        self.lsn
    }

    pub fn get_txn_id(&self) -> TxnId {
        self.txn_id
    }

    pub fn get_prev_lsn(&self) -> Lsn {
        self.prev_lsn
    }

    pub fn get_op(&self) -> &LogOp {
        &self.op
    }
}

/// Mints log records with monotone LSNs and per-transaction prev-LSN
/// threading.
#[derive(Debug, Default)]
pub struct LogFactory {
    next_lsn: Lsn,
    prev_lsn_map: HashMap<TxnId, Lsn>,
}

impl LogFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn make(&mut self, txn_id: TxnId, op: LogOp) -> LogRecord {
        let lsn = self.next_lsn;
        self.next_lsn += 1;

        let prev_lsn = if op == LogOp::Begin {
            self.prev_lsn_map.insert(txn_id, lsn);
            INVALID_LSN
        } else {
            let prev = self.prev_lsn_map.get(&txn_id).copied().unwrap_or(INVALID_LSN);
            self.prev_lsn_map.insert(txn_id, lsn);
            prev
        };

        LogRecord {
            lsn,
            txn_id,
            prev_lsn,
            op,
        }
    }

    pub fn begin_log(&mut self, txn_id: TxnId) -> LogRecord {
        self.make(txn_id, LogOp::Begin)
    }

    pub fn commit_log(&mut self, txn_id: TxnId) -> LogRecord {
        self.make(txn_id, LogOp::Commit)
    }

    pub fn abort_log(&mut self, txn_id: TxnId) -> LogRecord {
        self.make(txn_id, LogOp::Abort)
    }

    pub fn insert_log(&mut self, txn_id: TxnId, key: &str, value: i32) -> LogRecord {
        self.make(
            txn_id,
            LogOp::Insert {
                key: key.to_string(),
                value,
            },
        )
    }

    pub fn delete_log(&mut self, txn_id: TxnId, key: &str, value: i32) -> LogRecord {
        self.make(
            txn_id,
            LogOp::Delete {
                key: key.to_string(),
                value,
            },
        )
    }

    pub fn update_log(
        &mut self,
        txn_id: TxnId,
        old_key: &str,
        old_value: i32,
        new_key: &str,
        new_value: i32,
    ) -> LogRecord {
        self.make(
            txn_id,
            LogOp::Update {
                old_key: old_key.to_string(),
                old_value,
                new_key: new_key.to_string(),
                new_value,
            },
        )
    }
}
