//! Append-only audit log of mints and sales
use crate::error::Result;
use crate::store::{self, TxResult};
use crate::types::{Amount, TimeStamp};
use chrono::Utc;
use sled::transaction::TransactionalTree;
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    #[n(0)]
    Mint,
    #[n(1)]
    Sale,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxKind::Mint => f.write_str("MINT"),
            TxKind::Sale => f.write_str("SALE"),
        }
    }
}

/// Written once when a mint or sale commits. Never updated.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub from_id: String,
    #[n(2)]
    pub to_id: String,
    #[n(3)]
    pub item_id: String,
    #[n(4)]
    pub kind: TxKind,
    #[n(5)]
    pub timestamp: TimeStamp<Utc>,
    #[n(6)]
    pub price: Option<Amount>,
    #[n(7)]
    pub memo: String,
    #[n(8)]
    pub seq: u64,
}

impl TransactionRecord {
    pub fn mint(
        id: String,
        system_account: &str,
        owner_id: &str,
        item_id: &str,
        category: &str,
        timestamp: TimeStamp<Utc>,
        seq: u64,
    ) -> Self {
        Self {
            id,
            from_id: system_account.to_string(),
            to_id: owner_id.to_string(),
            item_id: item_id.to_string(),
            kind: TxKind::Mint,
            timestamp,
            price: None,
            memo: format!("Minted {category} Asset"),
            seq,
        }
    }

    pub fn sale(
        id: String,
        seller_id: &str,
        buyer_id: &str,
        item_id: &str,
        price: Amount,
        timestamp: TimeStamp<Utc>,
        seq: u64,
    ) -> Self {
        Self {
            id,
            from_id: seller_id.to_string(),
            to_id: buyer_id.to_string(),
            item_id: item_id.to_string(),
            kind: TxKind::Sale,
            timestamp,
            price: Some(price),
            memo: format!("Sold for {price}"),
            seq,
        }
    }

    /// Entries are write-once: an id that is already logged aborts with `IdTaken`
    pub(crate) fn tx_append(&self, tree: &TransactionalTree) -> TxResult<()> {
        store::tx_insert_new(tree, &self.id, self)
    }
}

/// The whole log, newest first
pub(crate) fn list_all(tree: &sled::Tree) -> Result<Vec<TransactionRecord>> {
    let mut records = store::load_all::<TransactionRecord>(tree)?;
    records.sort_by(|a, b| (&b.timestamp, b.seq).cmp(&(&a.timestamp, a.seq)));
    Ok(records)
}

/// Entries that mention `item_id`, oldest first. This is the provenance trail of an item.
pub(crate) fn list_for_item(tree: &sled::Tree, item_id: &str) -> Result<Vec<TransactionRecord>> {
    let mut records: Vec<TransactionRecord> = store::load_all::<TransactionRecord>(tree)?
        .into_iter()
        .filter(|record| record.item_id == item_id)
        .collect();
    records.sort_by(|a, b| (&a.timestamp, a.seq).cmp(&(&b.timestamp, b.seq)));
    Ok(records)
}
