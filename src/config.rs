//! Runtime configuration for a marketplace instance
use crate::types::Amount;
use std::path::PathBuf;

pub const DEFAULT_DB_PATH: &str = "market.db";
pub const DEFAULT_STARTING_BALANCE: i64 = 100;
pub const DEFAULT_MAX_IMAGES: usize = 8;
/// Sender recorded on MINT transactions
pub const SYSTEM_ACCOUNT: &str = "SYSTEM";

#[derive(Debug, Clone)]
pub struct MarketConfig {
    /// Location of the sled database directory.
    pub db_path: PathBuf,
    /// Balance granted to every new identity on signup.
    pub starting_balance: Amount,
    /// Upper bound on image references attached to a mint.
    pub max_images: usize,
    pub system_account: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            starting_balance: Amount::units(DEFAULT_STARTING_BALANCE),
            max_images: DEFAULT_MAX_IMAGES,
            system_account: SYSTEM_ACCOUNT.to_string(),
        }
    }
}

impl MarketConfig {
    /// Defaults overridden by `MARKET_DB_PATH` and `MARKET_STARTING_BALANCE`.
    /// A starting balance that does not parse, or is negative, is ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("MARKET_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(balance) = std::env::var("MARKET_STARTING_BALANCE")
            .ok()
            .and_then(|raw| raw.parse::<Amount>().ok())
            .filter(|amount| !amount.is_negative())
        {
            config.starting_balance = balance;
        }

        config
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }
    pub fn with_starting_balance(mut self, balance: Amount) -> Self {
        self.starting_balance = balance;
        self
    }
}
