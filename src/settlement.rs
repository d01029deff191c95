//! Settlement engine: the state transitions that move money and items together
//!
//! `respond` settles a trade request and `mint` creates an item. Both run as a
//! single store transaction. Either every record involved is written or none is.

use crate::config::MarketConfig;
use crate::error::{MarketError, Result};
use crate::identity::{self, Identity};
use crate::item::{self, Item, MintRequest};
use crate::store::{self, Collections, Store, TxResult, abort};
use crate::trade::{Decision, RequestStatus, TradeRequest};
use crate::transaction::TransactionRecord;
use crate::types::TimeStamp;
use crate::utils;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct SettlementEngine {
    store: Arc<Store>,
    system_account: String,
    max_images: usize,
}

impl SettlementEngine {
    pub fn new(store: Arc<Store>, config: &MarketConfig) -> Self {
        Self {
            store,
            system_account: config.system_account.clone(),
            max_images: config.max_images,
        }
    }

    /// Settle a pending trade request.
    ///
    /// Rejecting only touches the request. Accepting re-checks the buyer's current
    /// balance, moves the frozen price from buyer to seller, transfers and delists
    /// the item, appends a SALE record and marks the request accepted.
    pub fn respond(&self, request_id: &str, decision: Decision) -> Result<TradeRequest> {
        let timestamp = TimeStamp::new();
        let seq = self.store.next_seq()?;

        let result = store::retry_on_taken_id(|| {
            let tx_id = utils::new_tx_id();
            self.store.transact(|c| {
                let mut request = TradeRequest::tx_load(c.trade_requests, request_id)?;
                if request.status().is_terminal() {
                    return abort(MarketError::AlreadyProcessed {
                        request: request.id.clone(),
                        status: request.status().to_string(),
                    });
                }

                match decision {
                    Decision::Reject => {
                        finalise(&mut request, RequestStatus::Rejected)?;
                        request.tx_save(c.trade_requests)?;
                        Ok(request)
                    }
                    Decision::Accept => accept(c, request, &tx_id, seq, &timestamp),
                }
            })
        })
        .map_err(|err| match err {
            MarketError::OwnershipMismatch { .. } => {
                MarketError::DataIntegrity(err.to_string())
            }
            other => other,
        });

        log_response(request_id, decision, &result);
        result
    }

    /// Validate a draft, then store the item together with its MINT record.
    pub fn mint(&self, draft: MintRequest) -> Result<Item> {
        draft.validate(self.max_images)?;

        let created_at = TimeStamp::new();
        let item_seq = self.store.next_seq()?;
        let tx_seq = self.store.next_seq()?;

        let result = store::retry_on_taken_id(|| {
            let item_id = utils::new_item_id();
            let tx_id = utils::new_tx_id();

            self.store.transact(|c| {
                Identity::tx_load(c.identities, draft.owner_id())?;

                let item = draft
                    .clone()
                    .into_item(item_id.clone(), item_seq, created_at.clone());
                item.tx_insert(c.items)?;
                TransactionRecord::mint(
                    tx_id.clone(),
                    &self.system_account,
                    item.owner_id(),
                    &item.id,
                    item.category.as_str(),
                    created_at.clone(),
                    tx_seq,
                )
                .tx_append(c.transactions)?;

                Ok(item)
            })
        });

        match &result {
            Ok(item) => info!(
                item = %item.id,
                owner = %item.owner_id(),
                category = %item.category,
                for_sale = item.is_for_sale(),
                "item minted"
            ),
            Err(MarketError::DataIntegrity(detail)) => {
                error!(owner = %draft.owner_id(), detail = %detail, "mint failed")
            }
            Err(err) => warn!(owner = %draft.owner_id(), reason = %err, "mint refused"),
        }
        result
    }
}

fn finalise(request: &mut TradeRequest, status: RequestStatus) -> TxResult<()> {
    match request.finalise(status) {
        Ok(()) => Ok(()),
        Err(err) => abort(err),
    }
}

/// Accept path, run inside the settlement transaction against current state
fn accept(
    c: &Collections<'_>,
    mut request: TradeRequest,
    tx_id: &str,
    seq: u64,
    timestamp: &TimeStamp<Utc>,
) -> TxResult<TradeRequest> {
    let item = Item::tx_load(c.items, &request.item_id)?;
    let buyer = store::tx_load::<Identity>(c.identities, &request.buyer_id)?;
    let seller = store::tx_load::<Identity>(c.identities, &request.seller_id)?;

    let (Some(mut item), Some(buyer), Some(seller)) = (item, buyer, seller) else {
        return abort(MarketError::DataIntegrity(format!(
            "request {} references a missing item or identity",
            request.id
        )));
    };
    if buyer.id == seller.id {
        return abort(MarketError::DataIntegrity(format!(
            "request {} has the same buyer and seller",
            request.id
        )));
    }

    // the balance may have dropped since the request was made
    if buyer.balance < request.price {
        return abort(MarketError::InsufficientFunds {
            needed: request.price,
            available: buyer.balance,
        });
    }

    identity::adjust_balance(c.identities, &buyer.id, -request.price)?;
    identity::adjust_balance(c.identities, &seller.id, request.price)?;

    item::tx_transfer_ownership(
        c.items,
        &mut item,
        &seller.id,
        &buyer.id,
        request.price,
        timestamp.clone(),
    )?;

    TransactionRecord::sale(
        tx_id.to_string(),
        &seller.id,
        &buyer.id,
        &item.id,
        request.price,
        timestamp.clone(),
        seq,
    )
    .tx_append(c.transactions)?;

    finalise(&mut request, RequestStatus::Accepted)?;
    request.tx_save(c.trade_requests)?;

    Ok(request)
}

fn log_response(request_id: &str, decision: Decision, result: &Result<TradeRequest>) {
    match result {
        Ok(request) => info!(
            request = %request.id,
            item = %request.item_id,
            buyer = %request.buyer_id,
            seller = %request.seller_id,
            price = %request.price,
            status = %request.status(),
            "trade request settled"
        ),
        Err(MarketError::DataIntegrity(detail)) => error!(
            request = %request_id,
            ?decision,
            detail = %detail,
            "trade settlement hit inconsistent store state"
        ),
        Err(err) => warn!(
            request = %request_id,
            ?decision,
            reason = %err,
            "trade request response refused"
        ),
    }
}
