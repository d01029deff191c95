//! Service layer API for marketplace operations
use crate::config::MarketConfig;
use crate::error::{MarketError, Result};
use crate::identity::{self, Identity, IdentityView, ProfileUpdate};
use crate::item::{self, Item, MintRequest};
use crate::query::ItemFilter;
use crate::settlement::SettlementEngine;
use crate::store::{self, Store};
use crate::trade::{self, Decision, NewRequest, TradeRequest};
use crate::transaction::{self, TransactionRecord};
use crate::types::{Amount, TimeStamp};
use crate::utils;
use std::sync::Arc;
use tracing::{info, warn};

pub struct MarketService {
    store: Arc<Store>,
    engine: SettlementEngine,
    config: MarketConfig,
}

impl MarketService {
    pub fn new(instance: Arc<sled::Db>, config: MarketConfig) -> Result<Self> {
        let store = Arc::new(Store::open(instance)?);
        let engine = SettlementEngine::new(Arc::clone(&store), &config);

        Ok(Self {
            store,
            engine,
            config,
        })
    }

    /// Open (or create) the database at `config.db_path`
    pub fn open(config: MarketConfig) -> Result<Self> {
        let instance = sled::open(&config.db_path)?;
        Self::new(Arc::new(instance), config)
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    /// Sign up a new identity with the configured starting balance
    pub fn create_identity(&self, name: &str, email: &str, secret: &str) -> Result<IdentityView> {
        let identity = Identity::register(name, email, secret, self.config.starting_balance)?;

        let result = self.store.transact(|c| identity.tx_create(c));
        if let Err(err) = &result {
            warn!(email = %identity.email, reason = %err, "signup refused");
        }
        result?;

        info!(identity = %identity.id, "identity created");
        Ok(identity.view())
    }

    pub fn authenticate(&self, email: &str, secret: &str) -> Result<IdentityView> {
        let found = Identity::load_by_email(
            &self.store.identities,
            &self.store.identity_emails,
            email,
        )?;

        match found {
            Some(identity) if identity.verify_secret(secret) => Ok(identity.view()),
            _ => {
                warn!(email = %identity::normalise_email(email), "authentication failed");
                Err(MarketError::InvalidCredentials)
            }
        }
    }

    pub fn get_identity(&self, id: &str) -> Result<IdentityView> {
        Identity::load(&self.store.identities, id).map(|identity| identity.view())
    }

    /// Credit an identity. The amount has to be strictly positive.
    pub fn top_up(&self, id: &str, amount: Amount) -> Result<IdentityView> {
        if !amount.is_positive() {
            return Err(MarketError::InvalidAmount(amount));
        }

        let identity = self
            .store
            .transact(|c| identity::adjust_balance(c.identities, id, amount))?;

        info!(
            identity = %identity.id,
            amount = %amount,
            balance = %identity.balance,
            "balance topped up"
        );
        Ok(identity.view())
    }

    pub fn update_identity_profile(&self, id: &str, update: ProfileUpdate) -> Result<IdentityView> {
        let identity = self
            .store
            .transact(|c| identity::update_profile(c.identities, id, &update))?;

        info!(
            identity = %identity.id,
            secret_changed = update.secret.is_some(),
            "profile updated"
        );
        Ok(identity.view())
    }

    pub fn mint_item(&self, draft: MintRequest) -> Result<Item> {
        self.engine.mint(draft)
    }

    pub fn list_items(&self, filter: &ItemFilter) -> Result<Vec<Item>> {
        let items = store::load_all::<Item>(&self.store.items)?;
        Ok(filter.apply(items))
    }

    /// `list_items` driven by raw query strings, see [`ItemFilter::from_query`]
    pub fn query_items(
        &self,
        search: Option<&str>,
        category: Option<&str>,
        sort: Option<&str>,
        date: Option<&str>,
    ) -> Result<Vec<Item>> {
        match ItemFilter::from_query(search, category, sort, date) {
            Some(filter) => self.list_items(&filter),
            None => Ok(vec![]),
        }
    }

    /// Look an item up by its (case-insensitive) id
    pub fn get_item(&self, id: &str) -> Result<Item> {
        Item::load(&self.store.items, id)
    }

    /// Change price and/or sale flag. Checking that the caller owns the item is up to the caller.
    pub fn update_item_listing(
        &self,
        id: &str,
        price: Option<Amount>,
        is_for_sale: Option<bool>,
    ) -> Result<Item> {
        let result = self
            .store
            .transact(|c| item::tx_update_listing(c.items, id, price, is_for_sale));

        match &result {
            Ok(item) => info!(
                item = %item.id,
                price = %item.price(),
                for_sale = item.is_for_sale(),
                "listing updated"
            ),
            Err(err) => warn!(item = %id, reason = %err, "listing update refused"),
        }
        result
    }

    pub fn toggle_saved(&self, item_id: &str, identity_id: &str) -> Result<IdentityView> {
        let item_id = utils::normalise_item_id(item_id);

        let identity = self.store.transact(|c| {
            let mut identity = Identity::tx_load(c.identities, identity_id)?;
            identity.toggle_saved(&item_id);
            identity.tx_save(c.identities)?;
            Ok(identity)
        })?;

        Ok(identity.view())
    }

    pub fn create_trade_request(&self, item_id: &str, buyer_id: &str) -> Result<TradeRequest> {
        let seq = self.store.next_seq()?;
        let created_at = TimeStamp::new();

        let result = store::retry_on_taken_id(|| {
            let id = utils::new_request_id();
            let new = NewRequest {
                id: &id,
                item_id,
                buyer_id,
                seq,
                created_at: &created_at,
            };
            self.store.transact(|c| trade::tx_create(c, &new))
        });

        match &result {
            Ok(request) => info!(
                request = %request.id,
                item = %request.item_id,
                buyer = %request.buyer_id,
                seller = %request.seller_id,
                price = %request.price,
                "trade request created"
            ),
            Err(err) => warn!(
                item = %item_id,
                buyer = %buyer_id,
                reason = %err,
                "trade request refused"
            ),
        }
        result
    }

    pub fn get_trade_request(&self, id: &str) -> Result<TradeRequest> {
        TradeRequest::load(&self.store.trade_requests, id)
    }

    /// Requests where the identity is buyer or seller, newest first
    pub fn list_trade_requests(&self, identity_id: &str) -> Result<Vec<TradeRequest>> {
        trade::list_for(&self.store.trade_requests, identity_id)
    }

    pub fn respond_to_trade_request(
        &self,
        request_id: &str,
        decision: Decision,
    ) -> Result<TradeRequest> {
        self.engine.respond(request_id, decision)
    }

    /// Every mint and sale, newest first
    pub fn list_transactions(&self) -> Result<Vec<TransactionRecord>> {
        transaction::list_all(&self.store.transactions)
    }

    /// The mint and every sale of one item, oldest first
    pub fn item_provenance(&self, item_id: &str) -> Result<Vec<TransactionRecord>> {
        let item = self.get_item(item_id)?;
        transaction::list_for_item(&self.store.transactions, &item.id)
    }
}
