//! Trade settlement core for a marketplace of uniquely identified items.
//!
//! Users mint items, list them, request to buy listed items, and owners accept
//! or reject those requests. Accepting moves money, ownership, history, the
//! audit log and the request status in one store transaction.

pub mod config;
pub mod error;
pub mod identity;
pub mod item;
pub mod query;
pub mod service;
pub mod settlement;
pub mod store;
pub mod trade;
pub mod transaction;
pub mod types;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use config::MarketConfig;
pub use error::{MarketError, RecordKind, Result};
pub use identity::{IdentityView, ProfileUpdate};
pub use item::{Category, Item, MintRequest};
pub use query::{ItemFilter, SortOrder};
pub use service::MarketService;
pub use trade::{Decision, RequestStatus, TradeRequest};
pub use transaction::{TransactionRecord, TxKind};
pub use types::{Amount, TimeStamp};
