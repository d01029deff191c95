use crate::types::Amount;
use sled::transaction::TransactionError;

pub type Result<T> = std::result::Result<T, MarketError>;

/// The record collection an id failed to resolve in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Identity,
    Item,
    TradeRequest,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecordKind::Identity => "identity",
            RecordKind::Item => "item",
            RecordKind::TradeRequest => "trade request",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MarketError {
    #[error("{kind} {id} not found")]
    NotFound { kind: RecordKind, id: String },
    #[error("an identity is already registered for {0}")]
    DuplicateIdentity(String),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid listing: {0}")]
    InvalidListing(String),
    #[error("invalid mint: {0}")]
    InvalidMint(String),
    #[error("amount {0} must be greater than zero")]
    InvalidAmount(Amount),
    #[error("item {0} is not listed for sale")]
    NotListed(String),
    #[error("item {0} is already owned by the buyer")]
    SelfTrade(String),
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Amount, available: Amount },
    #[error("trade request {request} was already {status}")]
    AlreadyProcessed { request: String, status: String },
    #[error("data integrity error: {0}")]
    DataIntegrity(String),
    /// A freshly drawn id already has a record. Callers draw again.
    #[error("generated id {0} is already taken")]
    IdTaken(String),
    #[error("item {item} is owned by {actual}, expected {expected}")]
    OwnershipMismatch {
        item: String,
        expected: String,
        actual: String,
    },
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("record codec failure: {0}")]
    Codec(String),
}

impl MarketError {
    pub fn not_found(kind: RecordKind, id: impl Into<String>) -> Self {
        MarketError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<TransactionError<MarketError>> for MarketError {
    fn from(value: TransactionError<MarketError>) -> Self {
        match value {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => MarketError::Storage(err),
        }
    }
}
