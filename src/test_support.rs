//! Shared setup for in-crate tests that need a populated store
use crate::config::MarketConfig;
use crate::error::Result;
use crate::identity::Identity;
use crate::item::{Category, Item, MintRequest};
use crate::settlement::SettlementEngine;
use crate::store::{self, Store};
use crate::trade::{self, NewRequest, TradeRequest};
use crate::types::{Amount, TimeStamp};
use std::sync::Arc;
use tempfile::TempDir;

pub(crate) struct Market {
    _dir: TempDir,
    pub store: Arc<Store>,
    pub engine: SettlementEngine,
}

impl Market {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("market.db")).unwrap();
        let store = Arc::new(Store::open(Arc::new(db)).unwrap());
        let engine = SettlementEngine::new(Arc::clone(&store), &MarketConfig::default());

        Self {
            _dir: dir,
            store,
            engine,
        }
    }

    /// Signed up identity holding 100
    pub fn identity(&self, name: &str) -> Identity {
        let email = format!("{}@example.com", name.to_lowercase());
        let identity = Identity::register(name, &email, "secret", Amount::units(100)).unwrap();
        self.store.transact(|c| identity.tx_create(c)).unwrap();
        identity
    }

    pub fn listed_item(&self, owner: &Identity, price: i64) -> Item {
        let draft = MintRequest::new(&owner.id, Category::Art)
            .set_name("Sunset")
            .add_image("/uploads/sunset.png")
            .set_price(Amount::units(price))
            .set_for_sale(true);
        self.engine.mint(draft).unwrap()
    }

    /// Create a request under a chosen id
    pub fn request(&self, id: &str, item_id: &str, buyer: &Identity) -> Result<TradeRequest> {
        let created_at = TimeStamp::new();
        let new = NewRequest {
            id,
            item_id,
            buyer_id: &buyer.id,
            seq: self.store.next_seq()?,
            created_at: &created_at,
        };
        self.store.transact(|c| trade::tx_create(c, &new))
    }

    /// Current balance, or `None` once the identity record is gone
    pub fn balance(&self, identity: &Identity) -> Option<Amount> {
        store::load::<Identity>(&self.store.identities, &identity.id)
            .unwrap()
            .map(|identity| identity.balance)
    }

    pub fn item(&self, id: &str) -> Option<Item> {
        store::load::<Item>(&self.store.items, id).unwrap()
    }

    pub fn log_len(&self) -> usize {
        self.store.transactions.len()
    }
}
