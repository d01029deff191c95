//! Identity records: balances, saved items and credentials
use crate::error::{MarketError, RecordKind, Result};
use crate::store::{self, Collections, TxResult, abort};
use crate::types::{Amount, TimeStamp};
use crate::utils;
use chrono::Utc;
use sled::transaction::TransactionalTree;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Identity {
    #[n(0)]
    pub id: String, // bech32, `user_1...`
    #[n(1)]
    pub email: String,
    #[n(2)]
    pub name: String,
    #[n(3)]
    pub wallet_address: String,
    #[n(4)]
    pub balance: Amount,
    #[n(5)]
    pub saved_item_ids: Vec<String>,
    #[n(6)]
    pub profile_image: Option<String>,
    #[n(7)]
    credential_digest: String,
    #[n(8)]
    pub created_at: TimeStamp<Utc>,
}

/// What callers outside the crate get to see of an identity. Never carries the credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityView {
    pub id: String,
    pub email: String,
    pub name: String,
    pub wallet_address: String,
    pub balance: Amount,
    pub saved_item_ids: Vec<String>,
    pub profile_image: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub secret: Option<String>,
    /// `Some("")` clears the avatar.
    pub avatar_ref: Option<String>,
}

pub fn normalise_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl Identity {
    /// Build a fresh identity holding `starting_balance`. Not persisted yet.
    pub fn register(
        name: &str,
        email: &str,
        secret: &str,
        starting_balance: Amount,
    ) -> Result<Self> {
        let id = utils::new_uuid_to_bech32(utils::IDENTITY_HRP)
            .map_err(|e| MarketError::DataIntegrity(format!("identity id generation: {e}")))?;
        let credential_digest = utils::credential_digest(&id, secret);

        Ok(Self {
            id,
            email: normalise_email(email),
            name: name.trim().to_string(),
            wallet_address: utils::new_wallet_address(),
            balance: starting_balance,
            saved_item_ids: vec![],
            profile_image: None,
            credential_digest,
            created_at: TimeStamp::new(),
        })
    }

    pub fn view(&self) -> IdentityView {
        IdentityView {
            id: self.id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            wallet_address: self.wallet_address.clone(),
            balance: self.balance,
            saved_item_ids: self.saved_item_ids.clone(),
            profile_image: self.profile_image.clone(),
        }
    }

    pub fn verify_secret(&self, secret: &str) -> bool {
        utils::credential_digest(&self.id, secret) == self.credential_digest
    }

    pub fn has_saved(&self, item_id: &str) -> bool {
        self.saved_item_ids.iter().any(|saved| saved == item_id)
    }

    /// Add the item to the watchlist, or remove it if it is already there
    pub fn toggle_saved(&mut self, item_id: &str) {
        if self.has_saved(item_id) {
            self.saved_item_ids.retain(|saved| saved != item_id);
        } else {
            self.saved_item_ids.push(item_id.to_string());
        }
    }

    pub fn apply_profile(&mut self, update: &ProfileUpdate) {
        if let Some(secret) = &update.secret {
            self.credential_digest = utils::credential_digest(&self.id, secret);
        }
        if let Some(avatar) = &update.avatar_ref {
            self.profile_image = (!avatar.is_empty()).then(|| avatar.clone());
        }
    }

    /// Load identity from the store, outside of any transaction
    pub(crate) fn load(tree: &sled::Tree, id: &str) -> Result<Self> {
        store::load_required(tree, RecordKind::Identity, id)
    }

    pub(crate) fn load_by_email(
        identities: &sled::Tree,
        emails: &sled::Tree,
        email: &str,
    ) -> Result<Option<Self>> {
        match emails.get(normalise_email(email).as_bytes())? {
            Some(id) => {
                let id = String::from_utf8(id.to_vec())
                    .map_err(|e| MarketError::DataIntegrity(format!("email index: {e}")))?;
                store::load(identities, &id)
            }
            None => Ok(None),
        }
    }

    pub(crate) fn tx_load(tree: &TransactionalTree, id: &str) -> TxResult<Self> {
        store::tx_load_required(tree, RecordKind::Identity, id)
    }

    pub(crate) fn tx_save(&self, tree: &TransactionalTree) -> TxResult<()> {
        store::tx_save(tree, &self.id, self)
    }

    /// Insert a new identity and claim its email in the unique index
    pub(crate) fn tx_create(&self, c: &Collections<'_>) -> TxResult<()> {
        if c.identity_emails.get(self.email.as_bytes())?.is_some() {
            return abort(MarketError::DuplicateIdentity(self.email.clone()));
        }
        c.identity_emails
            .insert(self.email.as_bytes(), self.id.as_bytes())?;
        self.tx_save(c.identities)
    }
}

/// Add `delta` (possibly negative) to a balance and persist it.
///
/// This does not refuse a negative result; callers that debit must have checked
/// sufficiency first. Arithmetic overflow aborts the transaction.
pub(crate) fn adjust_balance(
    tree: &TransactionalTree,
    id: &str,
    delta: Amount,
) -> TxResult<Identity> {
    let mut identity = Identity::tx_load(tree, id)?;

    identity.balance = match identity.balance.checked_add(delta) {
        Some(balance) => balance,
        None => {
            return abort(MarketError::DataIntegrity(format!(
                "balance overflow adjusting {id} by {delta}"
            )));
        }
    };
    identity.tx_save(tree)?;

    Ok(identity)
}

pub(crate) fn update_profile(
    tree: &TransactionalTree,
    id: &str,
    update: &ProfileUpdate,
) -> TxResult<Identity> {
    let mut identity = Identity::tx_load(tree, id)?;
    identity.apply_profile(update);
    identity.tx_save(tree)?;
    Ok(identity)
}
