//! Record collections backed by sled trees
//!
//! Each collection is its own tree keyed by the record id, with values encoded
//! as CBOR. Every write that touches more than one record goes through
//! [`Store::transact`], which opens a serializable transaction over all trees so
//! that a failed step leaves nothing behind and readers never see a half-applied
//! write.

use crate::error::{MarketError, RecordKind, Result};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};
use sled::{Db, Transactional, Tree};
use std::sync::Arc;

pub(crate) type TxResult<T> = ConflictableTransactionResult<T, MarketError>;

const IDENTITIES: &str = "identities";
const IDENTITY_EMAILS: &str = "identity_emails";
const ITEMS: &str = "items";
const TRADE_REQUESTS: &str = "trade_requests";
const TRANSACTIONS: &str = "transactions";

/// Draws of fresh ids tried before a create gives up
const MAX_ID_ATTEMPTS: usize = 16;

pub struct Store {
    instance: Arc<Db>,
    pub(crate) identities: Tree,
    pub(crate) identity_emails: Tree,
    pub(crate) items: Tree,
    pub(crate) trade_requests: Tree,
    pub(crate) transactions: Tree,
}

/// Transactional views of every tree, handed to a [`Store::transact`] body.
pub(crate) struct Collections<'a> {
    pub identities: &'a TransactionalTree,
    pub identity_emails: &'a TransactionalTree,
    pub items: &'a TransactionalTree,
    pub trade_requests: &'a TransactionalTree,
    pub transactions: &'a TransactionalTree,
}

impl Store {
    pub fn open(instance: Arc<Db>) -> Result<Self> {
        Ok(Self {
            identities: instance.open_tree(IDENTITIES)?,
            identity_emails: instance.open_tree(IDENTITY_EMAILS)?,
            items: instance.open_tree(ITEMS)?,
            trade_requests: instance.open_tree(TRADE_REQUESTS)?,
            transactions: instance.open_tree(TRANSACTIONS)?,
            instance,
        })
    }

    /// Monotonic sequence number, used to order records created in the same instant
    pub fn next_seq(&self) -> Result<u64> {
        Ok(self.instance.generate_id()?)
    }

    pub fn flush(&self) -> Result<()> {
        self.instance.flush()?;
        Ok(())
    }

    /// Run `body` as one all-or-nothing unit over every collection.
    ///
    /// sled may run the body more than once when it conflicts with a concurrent
    /// transaction, so it must not have side effects outside the trees.
    pub(crate) fn transact<T, F>(&self, body: F) -> Result<T>
    where
        F: Fn(&Collections<'_>) -> TxResult<T>,
    {
        (
            &self.identities,
            &self.identity_emails,
            &self.items,
            &self.trade_requests,
            &self.transactions,
        )
            .transaction(
                |(identities, identity_emails, items, trade_requests, transactions)| {
                    body(&Collections {
                        identities,
                        identity_emails,
                        items,
                        trade_requests,
                        transactions,
                    })
                },
            )
            .map_err(MarketError::from)
    }
}

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>> {
    minicbor::to_vec(value).map_err(|e| MarketError::Codec(e.to_string()))
}

pub(crate) fn decode<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).map_err(|e| MarketError::Codec(e.to_string()))
}

pub(crate) fn load<T>(tree: &Tree, key: &str) -> Result<Option<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key.as_bytes())? {
        Some(bytes) => decode(bytes.as_ref()).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn load_required<T>(tree: &Tree, kind: RecordKind, key: &str) -> Result<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    load(tree, key)?.ok_or_else(|| MarketError::not_found(kind, key))
}

pub(crate) fn load_all<T>(tree: &Tree) -> Result<Vec<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    tree.iter()
        .values()
        .map(|value| decode(value?.as_ref()))
        .collect()
}

pub(crate) fn abort<T>(err: MarketError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

pub(crate) fn tx_load<T>(tree: &TransactionalTree, key: &str) -> TxResult<Option<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key.as_bytes())? {
        Some(bytes) => match decode(bytes.as_ref()) {
            Ok(value) => Ok(Some(value)),
            Err(err) => abort(err),
        },
        None => Ok(None),
    }
}

pub(crate) fn tx_load_required<T>(
    tree: &TransactionalTree,
    kind: RecordKind,
    key: &str,
) -> TxResult<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tx_load(tree, key)? {
        Some(value) => Ok(value),
        None => abort(MarketError::not_found(kind, key)),
    }
}

pub(crate) fn tx_save<T: minicbor::Encode<()>>(
    tree: &TransactionalTree,
    key: &str,
    value: &T,
) -> TxResult<()> {
    match encode(value) {
        Ok(bytes) => {
            tree.insert(key.as_bytes(), bytes)?;
            Ok(())
        }
        Err(err) => abort(err),
    }
}

/// Run `attempt` until it stops failing with `IdTaken`.
///
/// Each call must draw its own ids. Gives up with `DataIntegrity` after
/// [`MAX_ID_ATTEMPTS`] collisions in a row.
pub(crate) fn retry_on_taken_id<T, F>(mut attempt: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    for _ in 0..MAX_ID_ATTEMPTS {
        match attempt() {
            Err(MarketError::IdTaken(_)) => continue,
            other => return other,
        }
    }
    Err(MarketError::DataIntegrity(format!(
        "no unused id after {MAX_ID_ATTEMPTS} attempts"
    )))
}

/// Write a record under a freshly generated id. Never replaces an existing record.
pub(crate) fn tx_insert_new<T: minicbor::Encode<()>>(
    tree: &TransactionalTree,
    key: &str,
    value: &T,
) -> TxResult<()> {
    if tree.get(key.as_bytes())?.is_some() {
        return abort(MarketError::IdTaken(key.to_string()));
    }
    tx_save(tree, key, value)
}
