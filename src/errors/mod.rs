use crate::txn_manager::TxnId;

#[derive(Debug, PartialEq)]
pub enum Error {
    Internal(String),
    TableExists(String),
    TableNotFound(String),
    IndexExists(String),
    IndexNotFound(String),
    ColumnNotFound(String),
    UnsupportedIndexType(String),
    RowTooBig(usize, usize),
    OutOfSpace,
    NoFreeFrames,
    MagicMismatch(&'static str),
    TxnAborted(TxnId, AbortReason),
}

/// Why a transaction was forced into the aborted state by the lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    UpgradeConflict,
    Deadlock,
    SharedOnReadUncommitted,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Internal(context) => write!(f, "Internal Error: {context}."),
            Error::TableExists(table) => write!(f, "Table {table} already exists."),
            Error::TableNotFound(table) => write!(f, "Table {table} does not exist."),
            Error::IndexExists(index) => write!(f, "Index {index} already exists."),
            Error::IndexNotFound(index) => write!(f, "Index {index} does not exist."),
            Error::ColumnNotFound(column) => write!(f, "Column {column} does not exist."),
            Error::UnsupportedIndexType(ty) => write!(f, "Unsupported index type: {ty}."),
            Error::RowTooBig(max, actual) => {
                write!(f, "Row of size {actual} exceeds the page limit of {max}.")
            }
            Error::OutOfSpace => write!(f, "Disk file is out of space."),
            Error::NoFreeFrames => write!(f, "All buffer pool frames are pinned."),
            Error::MagicMismatch(what) => write!(f, "Magic number mismatch reading {what}."),
            Error::TxnAborted(id, reason) => write!(f, "Transaction {id} aborted: {reason}."),
        }
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::LockOnShrinking => write!(f, "lock requested in shrinking phase"),
            AbortReason::UpgradeConflict => write!(f, "another upgrade is in progress"),
            AbortReason::Deadlock => write!(f, "chosen as deadlock victim"),
            AbortReason::SharedOnReadUncommitted => {
                write!(f, "shared lock under read-uncommitted")
            }
        }
    }
}
