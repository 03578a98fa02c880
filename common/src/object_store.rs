//! Object store for account and contract state
//!
//! Values are CBOR-encoded objects in an imbl map, so snapshots are cheap
//! clones. A [`StateTransaction`] works on its own copy: committing swaps it
//! in, dropping it discards every change.

use crate::{errors::TransactionError, types::AccountName};
use imbl::OrdMap;
use minicbor::{Decode, Encode};

pub const ACCOUNT_TABLE: &str = "account";

/// Key of a stored object: table plus owning account
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub table: &'static str,
    pub name: AccountName,
}

impl ObjectKey {
    pub fn account(name: &AccountName) -> Self {
        Self {
            table: ACCOUNT_TABLE,
            name: name.clone(),
        }
    }
}

/// Balances held by an account
#[derive(Debug, Default, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Account {
    #[n(0)]
    pub liquid: u64,
    #[n(1)]
    pub staked: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ObjectStore {
    objects: OrdMap<ObjectKey, Vec<u8>>,
}

impl ObjectStore {
    /// Open a scoped transaction
    pub fn begin(&self) -> StateTransaction {
        StateTransaction {
            objects: self.objects.clone(),
        }
    }

    pub fn commit(&mut self, transaction: StateTransaction) {
        self.objects = transaction.objects;
    }

    pub fn get<T>(&self, key: &ObjectKey) -> Result<Option<T>, TransactionError>
    where
        T: for<'b> Decode<'b, ()>,
    {
        decode_object(self.objects.get(key))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct StateTransaction {
    objects: OrdMap<ObjectKey, Vec<u8>>,
}

impl StateTransaction {
    pub fn get<T>(&self, key: &ObjectKey) -> Result<Option<T>, TransactionError>
    where
        T: for<'b> Decode<'b, ()>,
    {
        decode_object(self.objects.get(key))
    }

    pub fn put<T: Encode<()>>(&mut self, key: ObjectKey, value: &T) {
        self.objects.insert(key, minicbor::to_vec(value).expect("infallible"));
    }

    pub fn erase(&mut self, key: &ObjectKey) -> bool {
        self.objects.remove(key).is_some()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.objects.contains_key(key)
    }

    /// Nested unit of work: fold it back with [`absorb`](Self::absorb) or drop it
    pub fn nested(&self) -> StateTransaction {
        self.clone()
    }

    pub fn absorb(&mut self, nested: StateTransaction) {
        self.objects = nested.objects;
    }
}

fn decode_object<T>(bytes: Option<&Vec<u8>>) -> Result<Option<T>, TransactionError>
where
    T: for<'b> Decode<'b, ()>,
{
    bytes
        .map(|b| minicbor::decode(b).map_err(|e| TransactionError::Codec(e.to_string())))
        .transpose()
}
