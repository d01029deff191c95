//! Item catalog: mintable assets, their listing state and ownership history
use crate::error::{MarketError, RecordKind, Result};
use crate::store::{self, TxResult, abort};
use crate::types::{Amount, TimeStamp};
use crate::utils;
use chrono::Utc;
use sled::transaction::TransactionalTree;
use std::fmt;
use std::str::FromStr;

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd,
)]
pub enum Category {
    #[n(0)]
    Identity,
    #[n(1)]
    Ownership,
    #[n(2)]
    Ticket,
    #[n(3)]
    Gaming,
    #[n(4)]
    Art,
    #[n(5)]
    RealEstate,
    #[n(6)]
    Music,
    #[n(7)]
    Collectible,
}

#[derive(thiserror::Error, Debug)]
#[error("unknown category {0}")]
pub struct UnknownCategory(pub String);

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Identity,
        Category::Ownership,
        Category::Ticket,
        Category::Gaming,
        Category::Art,
        Category::RealEstate,
        Category::Music,
        Category::Collectible,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Identity => "IDENTITY",
            Category::Ownership => "OWNERSHIP",
            Category::Ticket => "TICKET",
            Category::Gaming => "GAMING",
            Category::Art => "ART",
            Category::RealEstate => "REAL_ESTATE",
            Category::Music => "MUSIC",
            Category::Collectible => "COLLECTIBLE",
        }
    }

    /// Identity documents are bound to their holder and never go on sale
    pub fn can_be_listed(&self) -> bool {
        !matches!(self, Category::Identity)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == wanted)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    #[n(0)]
    pub trait_name: String,
    #[n(1)]
    pub value: String,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Listing {
    #[n(0)]
    pub is_for_sale: bool,
    #[n(1)]
    pub price: Amount,
}

/// One completed sale. Appended by the settlement engine and never edited.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct OwnershipRecord {
    #[n(0)]
    pub from_owner_id: String,
    #[n(1)]
    pub to_owner_id: String,
    #[n(2)]
    pub price: Amount,
    #[n(3)]
    pub timestamp: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ItemMetadata {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub description: String,
    #[n(2)]
    pub images: Vec<String>, // opaque refs handed out by file storage
    #[n(3)]
    pub attributes: Vec<Attribute>,
    #[n(4)]
    pub size: Option<String>,
    #[n(5)]
    pub creator: String,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Item {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub category: Category,
    #[n(2)]
    owner_id: String,
    #[n(3)]
    pub metadata: ItemMetadata,
    #[n(4)]
    pub tx_hash: String,
    #[n(5)]
    listing: Listing,
    #[n(6)]
    history: Vec<OwnershipRecord>,
    #[n(7)]
    pub seq: u64,
}

/// The single check every writer of [`Listing`] goes through.
pub fn ensure_listable(category: Category, listing: &Listing) -> Result<()> {
    if listing.price.is_negative() {
        return Err(MarketError::InvalidListing(format!(
            "price {} must not be negative",
            listing.price
        )));
    }
    if listing.is_for_sale && !category.can_be_listed() {
        return Err(MarketError::InvalidListing(format!(
            "{category} items can never be listed for sale"
        )));
    }
    Ok(())
}

impl Item {
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }
    pub fn listing(&self) -> Listing {
        self.listing
    }
    pub fn is_for_sale(&self) -> bool {
        self.listing.is_for_sale
    }
    pub fn price(&self) -> Amount {
        self.listing.price
    }
    pub fn history(&self) -> &[OwnershipRecord] {
        &self.history
    }
    pub fn primary_image(&self) -> Option<&str> {
        self.metadata.images.first().map(String::as_str)
    }

    /// Owner initiated listing change. Fields left as `None` keep their value.
    pub fn set_listing(&mut self, price: Option<Amount>, is_for_sale: Option<bool>) -> Result<()> {
        let next = Listing {
            is_for_sale: is_for_sale.unwrap_or(self.listing.is_for_sale),
            price: price.unwrap_or(self.listing.price),
        };
        ensure_listable(self.category, &next)?;
        self.listing = next;
        Ok(())
    }

    /// Hand the item to `to_owner_id`, delist it and append the sale to its history.
    ///
    /// Fails with `OwnershipMismatch` if `from_owner_id` is no longer the owner,
    /// which is how a stale trade request is caught.
    pub fn transfer_ownership(
        &mut self,
        from_owner_id: &str,
        to_owner_id: &str,
        price: Amount,
        timestamp: TimeStamp<Utc>,
    ) -> Result<()> {
        if self.owner_id != from_owner_id {
            return Err(MarketError::OwnershipMismatch {
                item: self.id.clone(),
                expected: from_owner_id.to_string(),
                actual: self.owner_id.clone(),
            });
        }

        let delisted = Listing {
            is_for_sale: false,
            price: self.listing.price,
        };
        ensure_listable(self.category, &delisted)?;

        self.owner_id = to_owner_id.to_string();
        self.listing = delisted;
        self.history.push(OwnershipRecord {
            from_owner_id: from_owner_id.to_string(),
            to_owner_id: to_owner_id.to_string(),
            price,
            timestamp,
        });
        Ok(())
    }

    pub(crate) fn load(tree: &sled::Tree, id: &str) -> Result<Self> {
        store::load_required(tree, RecordKind::Item, &utils::normalise_item_id(id))
    }

    pub(crate) fn tx_load(tree: &TransactionalTree, id: &str) -> TxResult<Option<Self>> {
        store::tx_load(tree, &utils::normalise_item_id(id))
    }

    pub(crate) fn tx_save(&self, tree: &TransactionalTree) -> TxResult<()> {
        store::tx_save(tree, &self.id, self)
    }

    /// First write of a freshly minted item, aborts with `IdTaken` on a collision
    pub(crate) fn tx_insert(&self, tree: &TransactionalTree) -> TxResult<()> {
        store::tx_insert_new(tree, &self.id, self)
    }
}

pub(crate) fn tx_update_listing(
    tree: &TransactionalTree,
    id: &str,
    price: Option<Amount>,
    is_for_sale: Option<bool>,
) -> TxResult<Item> {
    let Some(mut item) = Item::tx_load(tree, id)? else {
        return abort(MarketError::not_found(RecordKind::Item, id));
    };
    if let Err(err) = item.set_listing(price, is_for_sale) {
        return abort(err);
    }
    item.tx_save(tree)?;
    Ok(item)
}

pub(crate) fn tx_transfer_ownership(
    tree: &TransactionalTree,
    item: &mut Item,
    from_owner_id: &str,
    to_owner_id: &str,
    price: Amount,
    timestamp: TimeStamp<Utc>,
) -> TxResult<()> {
    if let Err(err) = item.transfer_ownership(from_owner_id, to_owner_id, price, timestamp) {
        return abort(err);
    }
    item.tx_save(tree)
}

/// Draft of a new item, filled in with the `set_*` / `add_*` methods
#[derive(Debug, Clone)]
pub struct MintRequest {
    owner_id: String,
    category: Category,
    name: String,
    description: String,
    creator: String,
    size: Option<String>,
    images: Vec<String>,
    attributes: Vec<Attribute>,
    price: Amount,
    is_for_sale: bool,
}

impl MintRequest {
    pub fn new(owner_id: &str, category: Category) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            category,
            name: String::new(),
            description: String::new(),
            creator: String::new(),
            size: None,
            images: vec![],
            attributes: vec![],
            price: Amount::ZERO,
            is_for_sale: false,
        }
    }
    pub fn set_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
    pub fn set_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
    pub fn set_creator(mut self, creator: &str) -> Self {
        self.creator = creator.to_string();
        self
    }
    pub fn set_size(mut self, size: &str) -> Self {
        self.size = Some(size.to_string());
        self
    }
    pub fn add_image(mut self, image_ref: &str) -> Self {
        self.images.push(image_ref.to_string());
        self
    }
    pub fn add_attribute(mut self, trait_name: &str, value: &str) -> Self {
        self.attributes.push(Attribute {
            trait_name: trait_name.to_string(),
            value: value.to_string(),
        });
        self
    }
    pub fn set_price(mut self, price: Amount) -> Self {
        self.price = price;
        self
    }
    pub fn set_for_sale(mut self, is_for_sale: bool) -> Self {
        self.is_for_sale = is_for_sale;
        self
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }
    pub fn category(&self) -> Category {
        self.category
    }

    /// Checks the draft: a name, between one and `max_images` images, and a valid listing
    pub fn validate(&self, max_images: usize) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(MarketError::InvalidMint("name is required".into()));
        }
        if self.images.is_empty() {
            return Err(MarketError::InvalidMint(
                "at least one image is required".into(),
            ));
        }
        if self.images.len() > max_images {
            return Err(MarketError::InvalidMint(format!(
                "at most {max_images} images are allowed, got {}",
                self.images.len()
            )));
        }
        if self.images.iter().any(|image| image.trim().is_empty()) {
            return Err(MarketError::InvalidMint("image refs must not be empty".into()));
        }
        if self.price.is_negative() {
            return Err(MarketError::InvalidMint(format!(
                "price {} must not be negative",
                self.price
            )));
        }
        ensure_listable(
            self.category,
            &Listing {
                is_for_sale: self.is_for_sale,
                price: self.price,
            },
        )
    }

    /// Turn the draft into an item with no history. Call [`MintRequest::validate`] first.
    pub(crate) fn into_item(self, id: String, seq: u64, created_at: TimeStamp<Utc>) -> Item {
        Item {
            id,
            category: self.category,
            owner_id: self.owner_id,
            metadata: ItemMetadata {
                name: self.name.trim().to_string(),
                description: self.description,
                images: self.images,
                attributes: self.attributes,
                size: self.size,
                creator: self.creator,
                created_at,
            },
            tx_hash: utils::new_tx_hash(),
            listing: Listing {
                is_for_sale: self.is_for_sale,
                price: self.price,
            },
            history: vec![],
            seq,
        }
    }
}
