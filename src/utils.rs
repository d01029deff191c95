//! Identifier generation for records
//!
//! All ids are derived from a fresh uuid7. Identity ids are bech32 encoded with a
//! human readable prefix; items, requests and transactions use short upper-case
//! codes that people can type back in.

use bech32::Bech32m;
use uuid7::uuid7;

pub const IDENTITY_HRP: &str = "user_";
pub const ITEM_ID_LEN: usize = 6;
const REQUEST_CODE_LEN: usize = 6;
const TX_CODE_LEN: usize = 9;

// construct a unique user id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Hex sha256 of a fresh uuid7. Source of every short code below.
fn fresh_digest() -> String {
    let seed = uuid7().as_bytes().to_vec();
    sha256::digest(&seed)
}

fn short_code(len: usize) -> String {
    fresh_digest()[..len].to_ascii_uppercase()
}

/// Six character item id, e.g. `A4F92B`
pub fn new_item_id() -> String {
    short_code(ITEM_ID_LEN)
}

pub fn new_request_id() -> String {
    format!("REQ-{}", short_code(REQUEST_CODE_LEN))
}

pub fn new_tx_id() -> String {
    format!("TX-{}", short_code(TX_CODE_LEN))
}

/// Cosmetic `0x` prefixed 64 hex digit hash shown next to minted items
pub fn new_tx_hash() -> String {
    format!("0x{}", fresh_digest())
}

/// Cosmetic `0x` prefixed 40 hex digit wallet address
pub fn new_wallet_address() -> String {
    format!("0x{}", &fresh_digest()[..40])
}

/// Salted digest of a credential secret. The identity id is the salt.
pub fn credential_digest(identity_id: &str, secret: &str) -> String {
    sha256::digest(format!("{identity_id}:{secret}"))
}

/// Item ids are entered by hand, so lookups ignore case and surrounding space
pub fn normalise_item_id(id: &str) -> String {
    id.trim().to_ascii_uppercase()
}
