//! Trade requests: a buyer's offer for a listed item at its price at request time
use crate::error::{MarketError, RecordKind, Result};
use crate::identity::Identity;
use crate::item::Item;
use crate::store::{self, Collections, TxResult, abort};
use crate::types::{Amount, TimeStamp};
use chrono::Utc;
use sled::transaction::TransactionalTree;
use std::fmt;
use std::str::FromStr;

/// Request lifecycle. `Pending` moves to exactly one of the terminal states.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Accepted,
    #[n(2)]
    Rejected,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Accepted => "ACCEPTED",
            RequestStatus::Rejected => "REJECTED",
        };
        f.pad(label)
    }
}

/// The seller's answer to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

#[derive(thiserror::Error, Debug)]
#[error("unknown decision {0}, expected accept or reject")]
pub struct UnknownDecision(pub String);

impl FromStr for Decision {
    type Err = UnknownDecision;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept" => Ok(Decision::Accept),
            "reject" => Ok(Decision::Reject),
            _ => Err(UnknownDecision(s.to_string())),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct TradeRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub item_id: String,
    #[n(2)]
    pub buyer_id: String,
    #[n(3)]
    pub seller_id: String, // owner when the request was made
    #[n(4)]
    pub price: Amount, // frozen at request time
    #[n(5)]
    status: RequestStatus,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
    // display snapshots, deliberately not kept in sync
    #[n(7)]
    pub item_name: String,
    #[n(8)]
    pub item_image: Option<String>,
    #[n(9)]
    pub buyer_name: String,
    #[n(10)]
    pub seller_name: String,
    #[n(11)]
    pub seq: u64,
}

pub const UNKNOWN_SELLER: &str = "Unknown";

impl TradeRequest {
    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn involves(&self, identity_id: &str) -> bool {
        self.buyer_id == identity_id || self.seller_id == identity_id
    }

    /// Move a pending request to its terminal state. Any second attempt is `AlreadyProcessed`.
    pub fn finalise(&mut self, status: RequestStatus) -> Result<()> {
        if self.status.is_terminal() {
            return Err(MarketError::AlreadyProcessed {
                request: self.id.clone(),
                status: self.status.to_string(),
            });
        }
        if !status.is_terminal() {
            return Err(MarketError::DataIntegrity(format!(
                "request {} cannot move to {status}",
                self.id
            )));
        }
        self.status = status;
        Ok(())
    }

    pub(crate) fn load(tree: &sled::Tree, id: &str) -> Result<Self> {
        store::load_required(tree, RecordKind::TradeRequest, id.trim())
    }

    pub(crate) fn tx_load(tree: &TransactionalTree, id: &str) -> TxResult<Self> {
        store::tx_load_required(tree, RecordKind::TradeRequest, id.trim())
    }

    pub(crate) fn tx_save(&self, tree: &TransactionalTree) -> TxResult<()> {
        store::tx_save(tree, &self.id, self)
    }
}

/// Identifiers chosen outside the transaction body, so a retried body reuses them
pub(crate) struct NewRequest<'a> {
    pub id: &'a str,
    pub item_id: &'a str,
    pub buyer_id: &'a str,
    pub seq: u64,
    pub created_at: &'a TimeStamp<Utc>,
}

/// Validate and record a new pending request.
///
/// Checks, first failure wins: the item exists, it is for sale, the buyer is not
/// the owner, the buyer exists, the buyer can afford the listing price. An id
/// that already has a record aborts with `IdTaken`.
pub(crate) fn tx_create(c: &Collections<'_>, new: &NewRequest<'_>) -> TxResult<TradeRequest> {
    let Some(item) = Item::tx_load(c.items, new.item_id)? else {
        return abort(MarketError::not_found(RecordKind::Item, new.item_id));
    };
    if !item.is_for_sale() {
        return abort(MarketError::NotListed(item.id.clone()));
    }
    if item.owner_id() == new.buyer_id {
        return abort(MarketError::SelfTrade(item.id.clone()));
    }

    let buyer = Identity::tx_load(c.identities, new.buyer_id)?;
    if buyer.balance < item.price() {
        return abort(MarketError::InsufficientFunds {
            needed: item.price(),
            available: buyer.balance,
        });
    }

    let seller_name = store::tx_load::<Identity>(c.identities, item.owner_id())?
        .map(|seller| seller.name)
        .unwrap_or_else(|| UNKNOWN_SELLER.to_string());

    let request = TradeRequest {
        id: new.id.to_string(),
        item_id: item.id.clone(),
        buyer_id: buyer.id.clone(),
        seller_id: item.owner_id().to_string(),
        price: item.price(),
        status: RequestStatus::Pending,
        created_at: new.created_at.clone(),
        item_name: item.metadata.name.clone(),
        item_image: item.primary_image().map(str::to_string),
        buyer_name: buyer.name,
        seller_name,
        seq: new.seq,
    };
    store::tx_insert_new(c.trade_requests, &request.id, &request)?;

    Ok(request)
}

/// Every request where `identity_id` is the buyer or the seller, newest first
pub(crate) fn list_for(tree: &sled::Tree, identity_id: &str) -> Result<Vec<TradeRequest>> {
    let mut requests: Vec<TradeRequest> = store::load_all::<TradeRequest>(tree)?
        .into_iter()
        .filter(|request| request.involves(identity_id))
        .collect();

    requests.sort_by(|a, b| (&b.created_at, b.seq).cmp(&(&a.created_at, a.seq)));
    Ok(requests)
}
