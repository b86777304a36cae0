use std::sync::Arc;

use tracing::{info, warn};

use crate::accounts::AccountBook;
use crate::error::{AppError, Result};
use crate::state::SiteState;
use crate::types::{Account, NewTransaction, Transaction, TxKind, TxStatus};

/// Local mobile number: `09` or `+639` followed by nine digits.
pub fn is_valid_phone(number: &str) -> bool {
    let rest = number
        .strip_prefix("09")
        .or_else(|| number.strip_prefix("+639"));
    rest.is_some_and(|r| r.len() == 9 && r.bytes().all(|b| b.is_ascii_digit()))
}

fn check_range(amount: f64, min: f64, max: f64) -> Result<()> {
    if !amount.is_finite() || amount <= 0.0 || amount < min || amount > max {
        return Err(AppError::OutOfRange { amount, min, max });
    }
    Ok(())
}

/// Deposit and withdrawal requests and their admin review.
///
/// Nothing is reserved at request time: a deposit credits on approval, a
/// withdrawal debits on approval, and rejection never moves money.
pub struct TransactionEngine {
    state: Arc<SiteState>,
    accounts: Arc<AccountBook>,
}

impl TransactionEngine {
    pub fn new(state: Arc<SiteState>, accounts: Arc<AccountBook>) -> Self {
        Self { state, accounts }
    }

    fn requester(&self, email: Option<&str>) -> Result<Account> {
        let email = email.ok_or(AppError::NotAuthenticated)?;
        self.accounts.account(email).ok_or(AppError::NotAuthenticated)
    }

    pub fn request_deposit(
        &self,
        email: Option<&str>,
        amount: f64,
        receipt_image: Option<String>,
    ) -> Result<Transaction> {
        let account = self.requester(email)?;
        let receipt_image = receipt_image
            .filter(|r| !r.trim().is_empty())
            .ok_or(AppError::MissingReceipt)?;
        let settings = self.state.currency_settings();
        check_range(amount, settings.min_deposit, settings.max_deposit)?;

        let tx = self.state.add_transaction(NewTransaction {
            user_id: account.email,
            user_name: account.name,
            kind: TxKind::Deposit,
            amount,
            phone_number: None,
            receipt_image: Some(receipt_image),
        })?;
        info!(tx_id = %tx.id, email = %tx.user_id, amount, "[TX] deposit requested");
        Ok(tx)
    }

    pub fn request_withdraw(
        &self,
        email: Option<&str>,
        amount: f64,
        phone_number: &str,
    ) -> Result<Transaction> {
        let account = self.requester(email)?;
        let phone_number = phone_number.trim();
        if !is_valid_phone(phone_number) {
            return Err(AppError::InvalidPhone(phone_number.to_string()));
        }
        let settings = self.state.currency_settings();
        if amount.is_finite() && amount > account.balance {
            return Err(AppError::InsufficientFunds {
                balance: account.balance,
                requested: amount,
            });
        }
        check_range(amount, settings.min_withdraw, settings.max_withdraw)?;

        let tx = self.state.add_transaction(NewTransaction {
            user_id: account.email,
            user_name: account.name,
            kind: TxKind::Withdraw,
            amount,
            phone_number: Some(phone_number.to_string()),
            receipt_image: None,
        })?;
        info!(tx_id = %tx.id, email = %tx.user_id, amount, "[TX] withdrawal requested");
        Ok(tx)
    }

    /// Approves a pending transaction and moves the money. The status change
    /// and the balance change happen under the account lock, so a
    /// transaction is applied at most once.
    pub fn approve_transaction(&self, id: &str, notes: Option<String>) -> Result<Transaction> {
        let tx = self
            .state
            .transaction(id)
            .ok_or_else(|| AppError::NotFound(format!("transaction {id}")))?;
        if tx.status != TxStatus::Pending {
            return Err(AppError::AlreadySettled(format!("transaction {id}")));
        }

        let approved = self
            .accounts
            .with_account(&tx.user_id, |account| {
                if tx.kind == TxKind::Withdraw && tx.amount > account.balance {
                    return Err(AppError::InsufficientFunds {
                        balance: account.balance,
                        requested: tx.amount,
                    });
                }
                let approved = self.state.update_transaction(id, |t| {
                    if t.status != TxStatus::Pending {
                        return Err(AppError::AlreadySettled(format!("transaction {id}")));
                    }
                    t.status = TxStatus::Approved;
                    if notes.is_some() {
                        t.notes = notes;
                    }
                    Ok(t.clone())
                })?;
                match approved.kind {
                    TxKind::Deposit => account.apply_delta(approved.amount),
                    TxKind::Withdraw => account.apply_delta(-approved.amount),
                };
                Ok(approved)
            })
            .inspect_err(|e| warn!(tx_id = id, "[TX] approval rejected: {e}"))?;

        info!(
            tx_id = id,
            email = %approved.user_id,
            kind = %approved.kind,
            amount = approved.amount,
            "[TX] transaction approved"
        );
        Ok(approved)
    }

    pub fn reject_transaction(&self, id: &str, notes: Option<String>) -> Result<Transaction> {
        let rejected = self
            .state
            .update_transaction(id, |t| {
                if t.status != TxStatus::Pending {
                    return Err(AppError::AlreadySettled(format!("transaction {id}")));
                }
                t.status = TxStatus::Rejected;
                if notes.is_some() {
                    t.notes = notes;
                }
                Ok(t.clone())
            })
            .inspect_err(|e| warn!(tx_id = id, "[TX] rejection refused: {e}"))?;
        info!(tx_id = id, kind = %rejected.kind, "[TX] transaction rejected");
        Ok(rejected)
    }

    /// Notes may be edited in any status.
    pub fn update_notes(&self, id: &str, notes: String) -> Result<Transaction> {
        self.state.update_transaction(id, |t| {
            t.notes = Some(notes);
            Ok(t.clone())
        })
    }

    /// A user's transactions, newest first.
    pub fn transactions_for_user(&self, email: &str) -> Vec<Transaction> {
        let mut txs: Vec<Transaction> = self
            .state
            .transactions()
            .into_iter()
            .filter(|t| t.user_id == email)
            .collect();
        txs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        txs
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKv;

    const RECEIPT: &str = "data:image/png;base64,iVBORw0KGgo=";

    struct Fixture {
        state: Arc<SiteState>,
        accounts: Arc<AccountBook>,
        engine: TransactionEngine,
    }

    fn fixture() -> Fixture {
        let kv = MemoryKv::new();
        let state = SiteState::load(kv.clone());
        let accounts = AccountBook::new(kv);
        let engine = TransactionEngine::new(Arc::clone(&state), Arc::clone(&accounts));
        Fixture { state, accounts, engine }
    }

    fn user(f: &Fixture, email: &str, balance: f64) {
        f.accounts.sign_up("User", email, "pw", "pw").unwrap();
        f.accounts.apply_balance_delta(email, balance).unwrap();
    }

    fn balance(f: &Fixture, email: &str) -> f64 {
        f.accounts.account(email).unwrap().balance
    }

    #[test]
    fn phone_pattern() {
        assert!(is_valid_phone("09123456789"));
        assert!(is_valid_phone("+639123456789"));
        assert!(!is_valid_phone("0912345678"));
        assert!(!is_valid_phone("091234567890"));
        assert!(!is_valid_phone("08123456789"));
        assert!(!is_valid_phone("0912345678a"));
    }

    #[test]
    fn deposit_credits_only_on_approval_and_only_once() {
        let f = fixture();
        user(&f, "ana@x.com", 0.0);
        let tx = f
            .engine
            .request_deposit(Some("ana@x.com"), 500.0, Some(RECEIPT.into()))
            .unwrap();
        assert_eq!(balance(&f, "ana@x.com"), 0.0);
        assert!(f.state.has_new_notifications());

        let approved = f.engine.approve_transaction(&tx.id, Some("ok".into())).unwrap();
        assert_eq!(approved.status, TxStatus::Approved);
        assert_eq!(approved.notes.as_deref(), Some("ok"));
        assert_eq!(balance(&f, "ana@x.com"), 500.0);

        let err = f.engine.approve_transaction(&tx.id, None).unwrap_err();
        assert!(matches!(err, AppError::AlreadySettled(_)));
        assert_eq!(balance(&f, "ana@x.com"), 500.0);
    }

    #[test]
    fn deposit_validation() {
        let f = fixture();
        user(&f, "ana@x.com", 0.0);
        assert!(matches!(
            f.engine.request_deposit(Some("ana@x.com"), 500.0, None),
            Err(AppError::MissingReceipt)
        ));
        assert!(matches!(
            f.engine.request_deposit(Some("ana@x.com"), 10.0, Some(RECEIPT.into())),
            Err(AppError::OutOfRange { .. })
        ));
        assert!(matches!(
            f.engine.request_deposit(Some("ana@x.com"), 60_000.0, Some(RECEIPT.into())),
            Err(AppError::OutOfRange { .. })
        ));
        assert!(matches!(
            f.engine.request_deposit(Some("ana@x.com"), f64::NAN, Some(RECEIPT.into())),
            Err(AppError::OutOfRange { .. })
        ));
        assert!(matches!(
            f.engine.request_deposit(None, 500.0, Some(RECEIPT.into())),
            Err(AppError::NotAuthenticated)
        ));
        assert!(f.state.transactions().is_empty());
    }

    #[test]
    fn withdraw_over_balance_has_no_side_effects() {
        let f = fixture();
        user(&f, "ana@x.com", 2000.0);
        let err = f
            .engine
            .request_withdraw(Some("ana@x.com"), 5000.0, "09123456789")
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientFunds { .. }));
        assert!(f.state.transactions().is_empty());
        assert!(!f.state.has_new_notifications());
        assert_eq!(balance(&f, "ana@x.com"), 2000.0);
    }

    #[test]
    fn withdraw_validation() {
        let f = fixture();
        user(&f, "ana@x.com", 2000.0);
        assert!(matches!(
            f.engine.request_withdraw(Some("ana@x.com"), 100.0, "12345"),
            Err(AppError::InvalidPhone(_))
        ));
        assert!(matches!(
            f.engine.request_withdraw(Some("ana@x.com"), 20.0, "09123456789"),
            Err(AppError::OutOfRange { .. })
        ));
    }

    #[test]
    fn withdraw_debits_on_approval_and_rejection_is_neutral() {
        let f = fixture();
        user(&f, "ana@x.com", 1000.0);

        let first = f
            .engine
            .request_withdraw(Some("ana@x.com"), 300.0, "+639123456789")
            .unwrap();
        assert_eq!(balance(&f, "ana@x.com"), 1000.0);
        f.engine.approve_transaction(&first.id, None).unwrap();
        assert_eq!(balance(&f, "ana@x.com"), 700.0);

        let second = f
            .engine
            .request_withdraw(Some("ana@x.com"), 200.0, "09123456789")
            .unwrap();
        let rejected = f.engine.reject_transaction(&second.id, Some("bad number".into())).unwrap();
        assert_eq!(rejected.status, TxStatus::Rejected);
        assert_eq!(balance(&f, "ana@x.com"), 700.0);
        assert!(matches!(
            f.engine.reject_transaction(&second.id, None),
            Err(AppError::AlreadySettled(_))
        ));
    }

    #[test]
    fn withdraw_approval_rechecks_balance() {
        let f = fixture();
        user(&f, "ana@x.com", 500.0);
        let tx = f
            .engine
            .request_withdraw(Some("ana@x.com"), 400.0, "09123456789")
            .unwrap();
        // Balance drops after the request was made.
        f.accounts.apply_balance_delta("ana@x.com", -300.0).unwrap();

        let err = f.engine.approve_transaction(&tx.id, None).unwrap_err();
        assert!(matches!(err, AppError::InsufficientFunds { .. }));
        assert_eq!(f.state.transaction(&tx.id).unwrap().status, TxStatus::Pending);
        assert_eq!(balance(&f, "ana@x.com"), 200.0);
    }

    #[test]
    fn notes_editable_after_settlement() {
        let f = fixture();
        user(&f, "ana@x.com", 0.0);
        let tx = f
            .engine
            .request_deposit(Some("ana@x.com"), 100.0, Some(RECEIPT.into()))
            .unwrap();
        f.engine.reject_transaction(&tx.id, None).unwrap();
        let updated = f.engine.update_notes(&tx.id, "blurry receipt".into()).unwrap();
        assert_eq!(updated.notes.as_deref(), Some("blurry receipt"));
        assert_eq!(updated.status, TxStatus::Rejected);
        assert_eq!(f.engine.transactions_for_user("ana@x.com").len(), 1);
    }

    #[test]
    fn unknown_transaction_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.engine.approve_transaction("missing", None),
            Err(AppError::NotFound(_))
        ));
    }
}
