use crate::{hash::TxId, types::AccountName};
use thiserror::Error;

/// Why a transaction could not be applied
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("account {0} already exists")]
    AccountExists(AccountName),

    #[error("unknown account {0}")]
    UnknownAccount(AccountName),

    #[error("account {account} has {available} liquid, needs {needed}")]
    InsufficientFunds {
        account: AccountName,
        needed: u64,
        available: u64,
    },

    #[error("balance of {0} would overflow")]
    BalanceOverflow(AccountName),

    #[error("amount must be positive")]
    ZeroAmount,

    #[error("transaction {0} already pending or included")]
    Duplicate(TxId),

    #[error("transaction has no actions")]
    Empty,

    #[error("invalid producer schedule: {0}")]
    InvalidSchedule(String),

    #[error("stored object could not be decoded: {0}")]
    Codec(String),
}
