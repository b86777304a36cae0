use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::currency_defaults;
use crate::error::{AppError, Result};

// ---------------------------------------------------------------------------
// Account / Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub name: String,
    /// Unique key. Immutable once registered.
    pub email: String,
    /// `<salt hex>$<sha256 hex>`, see `accounts::credentials`.
    pub password_hash: String,
    pub balance: f64,
    pub is_logged_in: bool,
    pub profile_image: Option<String>,
    /// Millisecond UTC epoch.
    pub registered_at: u64,
}

impl Account {
    /// The only place a balance changes. Debits clamp at zero.
    /// Returns the new balance.
    pub(crate) fn apply_delta(&mut self, delta: f64) -> f64 {
        self.balance = round_cents((self.balance + delta).max(0.0));
        self.balance
    }
}

/// Account as exposed outside the crate: no credential material.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub name: String,
    pub email: String,
    pub balance: f64,
    pub is_logged_in: bool,
    pub profile_image: Option<String>,
    pub registered_at: u64,
}

impl From<&Account> for AccountView {
    fn from(a: &Account) -> Self {
        Self {
            name: a.name.clone(),
            email: a.email.clone(),
            balance: a.balance,
            is_logged_in: a.is_logged_in,
            profile_image: a.profile_image.clone(),
            registered_at: a.registered_at,
        }
    }
}

/// Pointer to the signed-in account. Holds no account fields of its own so it
/// cannot drift from the account record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub email: String,
    pub signed_in_at: u64,
}

// ---------------------------------------------------------------------------
// Betting options
// ---------------------------------------------------------------------------

/// Which of the two outcomes of a betting option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Option1,
    Option2,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Option1 => write!(f, "option1"),
            Side::Option2 => write!(f, "option2"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BettingOption {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub option1: String,
    pub option2: String,
    pub odds1: f64,
    pub odds2: f64,
    pub active: bool,
    pub live_stream: bool,
}

impl BettingOption {
    pub fn outcome(&self, side: Side) -> &str {
        match side {
            Side::Option1 => &self.option1,
            Side::Option2 => &self.option2,
        }
    }

    pub fn odds(&self, side: Side) -> f64 {
        match side {
            Side::Option1 => self.odds1,
            Side::Option2 => self.odds2,
        }
    }

    /// Maps a selection string back to its side. Option1 wins if both
    /// outcomes carry the same text.
    pub fn side_of(&self, selection: &str) -> Option<Side> {
        if selection == self.option1 {
            Some(Side::Option1)
        } else if selection == self.option2 {
            Some(Side::Option2)
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(AppError::InvalidInput("title must not be empty".into()));
        }
        if self.option1.trim().is_empty() || self.option2.trim().is_empty() {
            return Err(AppError::InvalidInput("both outcomes must be named".into()));
        }
        if !(self.odds1 > 0.0 && self.odds2 > 0.0) || !self.odds1.is_finite() || !self.odds2.is_finite() {
            return Err(AppError::InvalidInput("odds must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Fields an admin supplies when creating an option. The id is assigned.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBettingOption {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub option1: String,
    pub option2: String,
    pub odds1: f64,
    pub odds2: f64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub live_stream: bool,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Live streams
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Scheduled,
    Live,
    Paused,
    Ended,
}

impl std::fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StreamStatus::Scheduled => "scheduled",
            StreamStatus::Live => "live",
            StreamStatus::Paused => "paused",
            StreamStatus::Ended => "ended",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStream {
    pub id: u64,
    /// Betting option this stream covers, if any.
    pub option_id: Option<u64>,
    pub name: String,
    /// Empty url means the stream comes from a mobile camera.
    pub url: String,
    pub status: StreamStatus,
    pub quality: String,
    pub viewers: u32,
    pub scheduled_time: Option<String>,
}

impl LiveStream {
    pub fn is_mobile(&self) -> bool {
        self.url.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLiveStream {
    pub name: String,
    #[serde(default)]
    pub url: String,
    pub option_id: Option<u64>,
    #[serde(default = "default_scheduled")]
    pub status: StreamStatus,
    pub quality: Option<String>,
    pub scheduled_time: Option<String>,
}

fn default_scheduled() -> StreamStatus {
    StreamStatus::Scheduled
}

// ---------------------------------------------------------------------------
// Bets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
}

impl std::fmt::Display for BetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BetStatus::Pending => "pending",
            BetStatus::Won => "won",
            BetStatus::Lost => "lost",
        };
        write!(f, "{s}")
    }
}

/// Admin verdict for a single bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetOutcome {
    Won,
    Lost,
}

impl From<BetOutcome> for BetStatus {
    fn from(o: BetOutcome) -> Self {
        match o {
            BetOutcome::Won => BetStatus::Won,
            BetOutcome::Lost => BetStatus::Lost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bet {
    pub id: String,
    /// Account email.
    pub user_id: String,
    pub user_name: String,
    /// BettingOption id.
    pub event_id: u64,
    pub event_title: String,
    pub selection: String,
    /// Odds captured when the bet was placed.
    pub odds: f64,
    pub amount: f64,
    pub potential_win: f64,
    pub status: BetStatus,
    pub timestamp: u64,
}

/// A bet before the container assigns its id and timestamp.
#[derive(Debug, Clone)]
pub struct NewBet {
    pub user_id: String,
    pub user_name: String,
    pub event_id: u64,
    pub event_title: String,
    pub selection: String,
    pub odds: f64,
    pub amount: f64,
    pub potential_win: f64,
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Deposit,
    Withdraw,
}

impl std::fmt::Display for TxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxKind::Deposit => write!(f, "deposit"),
            TxKind::Withdraw => write!(f, "withdraw"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TxStatus::Pending => "pending",
            TxStatus::Approved => "approved",
            TxStatus::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    #[serde(rename = "type")]
    pub kind: TxKind,
    pub amount: f64,
    pub status: TxStatus,
    /// Withdrawals only.
    pub phone_number: Option<String>,
    /// Deposits only. Data URL of the uploaded receipt.
    pub receipt_image: Option<String>,
    pub timestamp: u64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: String,
    pub user_name: String,
    pub kind: TxKind,
    pub amount: f64,
    pub phone_number: Option<String>,
    pub receipt_image: Option<String>,
}

// ---------------------------------------------------------------------------
// Currency settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencySettings {
    pub currency: String,
    pub symbol: String,
    pub min_deposit: f64,
    pub max_deposit: f64,
    pub min_withdraw: f64,
    pub max_withdraw: f64,
    /// Number users send GCash deposits to.
    pub gcash_number: String,
}

impl Default for CurrencySettings {
    fn default() -> Self {
        Self {
            currency: currency_defaults::CURRENCY.to_string(),
            symbol: currency_defaults::SYMBOL.to_string(),
            min_deposit: currency_defaults::MIN_DEPOSIT,
            max_deposit: currency_defaults::MAX_DEPOSIT,
            min_withdraw: currency_defaults::MIN_WITHDRAW,
            max_withdraw: currency_defaults::MAX_WITHDRAW,
            gcash_number: currency_defaults::GCASH_NUMBER.to_string(),
        }
    }
}

impl CurrencySettings {
    pub fn validate(&self) -> Result<()> {
        let positive = [self.min_deposit, self.max_deposit, self.min_withdraw, self.max_withdraw]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0);
        if !positive {
            return Err(AppError::InvalidInput("limits must be positive".into()));
        }
        if self.min_deposit > self.max_deposit {
            return Err(AppError::InvalidInput("min deposit exceeds max deposit".into()));
        }
        if self.min_withdraw > self.max_withdraw {
            return Err(AppError::InvalidInput("min withdraw exceeds max withdraw".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Millisecond UTC epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Rounds a currency amount to cents.
pub fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option() -> BettingOption {
        BettingOption {
            id: 1,
            title: "Red vs Blue".into(),
            description: String::new(),
            option1: "Red".into(),
            option2: "Blue".into(),
            odds1: 2.5,
            odds2: 1.6,
            active: true,
            live_stream: false,
        }
    }

    fn account(balance: f64) -> Account {
        Account {
            name: "Ana".into(),
            email: "ana@example.com".into(),
            password_hash: String::new(),
            balance,
            is_logged_in: true,
            profile_image: None,
            registered_at: 0,
        }
    }

    #[test]
    fn delta_clamps_at_zero() {
        let mut a = account(20.0);
        assert_eq!(a.apply_delta(-50.0), 0.0);
        assert_eq!(a.apply_delta(12.345), 12.35);
    }

    #[test]
    fn side_lookup_matches_outcome_text() {
        let o = option();
        assert_eq!(o.side_of("Red"), Some(Side::Option1));
        assert_eq!(o.side_of("Blue"), Some(Side::Option2));
        assert_eq!(o.side_of("Green"), None);
        assert_eq!(o.odds(Side::Option1), 2.5);
        assert_eq!(o.outcome(Side::Option2), "Blue");
    }

    #[test]
    fn option_rejects_non_positive_odds() {
        let mut o = option();
        o.odds2 = 0.0;
        assert!(matches!(o.validate(), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn currency_settings_require_ordered_limits() {
        let mut s = CurrencySettings::default();
        assert!(s.validate().is_ok());
        s.min_withdraw = 30_000.0;
        assert!(matches!(s.validate(), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn transaction_kind_serializes_as_type() {
        let tx = Transaction {
            id: "t1".into(),
            user_id: "ana@example.com".into(),
            user_name: "Ana".into(),
            kind: TxKind::Withdraw,
            amount: 100.0,
            status: TxStatus::Pending,
            phone_number: Some("09123456789".into()),
            receipt_image: None,
            timestamp: 1,
            notes: None,
        };
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "withdraw");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["phoneNumber"], "09123456789");
    }
}
