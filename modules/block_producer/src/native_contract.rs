//! Built-in transaction execution

use std::collections::HashSet;

use rota_common::{
    object_store::{Account, ObjectKey, StateTransaction},
    Action, AccountName, Transaction, TransactionError,
};

/// What applying a transaction produced besides state changes
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub proposed_schedule: Option<Vec<AccountName>>,
}

/// Applies transactions to state.
///
/// A failed transaction may leave `state` partly written; callers discard the
/// transaction's state on error.
pub trait ContractEngine: Send + Sync {
    fn apply(
        &self,
        transaction: &Transaction,
        state: &mut StateTransaction,
    ) -> Result<TransactionReceipt, TransactionError>;
}

/// Accounts and transfers
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeEngine;

impl NativeEngine {
    fn account(
        state: &StateTransaction,
        name: &AccountName,
    ) -> Result<Account, TransactionError> {
        state
            .get::<Account>(&ObjectKey::account(name))?
            .ok_or_else(|| TransactionError::UnknownAccount(name.clone()))
    }

    fn debit(account: &mut Account, name: &AccountName, amount: u64) -> Result<(), TransactionError> {
        if account.liquid < amount {
            return Err(TransactionError::InsufficientFunds {
                account: name.clone(),
                needed: amount,
                available: account.liquid,
            });
        }
        account.liquid -= amount;
        Ok(())
    }

    fn apply_action(
        action: &Action,
        state: &mut StateTransaction,
        receipt: &mut TransactionReceipt,
    ) -> Result<(), TransactionError> {
        match action {
            Action::CreateAccount {
                creator,
                name,
                deposit,
            } => {
                if state.contains(&ObjectKey::account(name)) {
                    return Err(TransactionError::AccountExists(name.clone()));
                }
                let mut creator_account = Self::account(state, creator)?;
                Self::debit(&mut creator_account, creator, *deposit)?;
                state.put(ObjectKey::account(creator), &creator_account);
                state.put(
                    ObjectKey::account(name),
                    &Account {
                        liquid: 0,
                        staked: *deposit,
                    },
                );
            }

            Action::Transfer {
                from, to, amount, ..
            } => {
                if *amount == 0 {
                    return Err(TransactionError::ZeroAmount);
                }
                let mut source = Self::account(state, from)?;
                Self::debit(&mut source, from, *amount)?;
                state.put(ObjectKey::account(from), &source);

                // Read after writing the source so self-transfers net to zero
                let mut target = Self::account(state, to)?;
                target.liquid = target
                    .liquid
                    .checked_add(*amount)
                    .ok_or_else(|| TransactionError::BalanceOverflow(to.clone()))?;
                state.put(ObjectKey::account(to), &target);
            }

            Action::ProposeSchedule {
                proposer,
                producers,
            } => {
                Self::account(state, proposer)?;
                if producers.is_empty() {
                    return Err(TransactionError::InvalidSchedule("empty producer list".into()));
                }
                let mut seen = HashSet::new();
                for producer in producers {
                    if !seen.insert(producer) {
                        return Err(TransactionError::InvalidSchedule(format!(
                            "{producer} listed twice"
                        )));
                    }
                    Self::account(state, producer)?;
                }
                receipt.proposed_schedule = Some(producers.clone());
            }
        }
        Ok(())
    }
}

impl ContractEngine for NativeEngine {
    fn apply(
        &self,
        transaction: &Transaction,
        state: &mut StateTransaction,
    ) -> Result<TransactionReceipt, TransactionError> {
        if transaction.actions.is_empty() {
            return Err(TransactionError::Empty);
        }
        let mut receipt = TransactionReceipt::default();
        for action in &transaction.actions {
            Self::apply_action(action, state, &mut receipt)?;
        }
        Ok(receipt)
    }
}
