use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::accounts::credentials::{hash_password, verify_password};
use crate::config::keys;
use crate::error::{AppError, Result};
use crate::store::{load_json, save_json, KeyLocks, KvStore};
use crate::types::{now_ms, Account, AccountView, Session};

/// Owner of account records and the session pointer.
///
/// Every change to an account goes through [`AccountBook::with_account`],
/// which holds that account's lock for the whole read-modify-write. The
/// session pointer only stores an email, so balance changes never need a
/// second write.
pub struct AccountBook {
    kv: Arc<dyn KvStore>,
    locks: KeyLocks,
    /// Guards check-then-write on the single session record.
    session_lock: Mutex<()>,
}

impl AccountBook {
    pub fn new(kv: Arc<dyn KvStore>) -> Arc<Self> {
        Arc::new(Self {
            kv,
            locks: KeyLocks::new(),
            session_lock: Mutex::new(()),
        })
    }

    fn load(&self, email: &str) -> Option<Account> {
        load_json(self.kv.as_ref(), &keys::account(email))
    }

    fn store(&self, account: &Account) -> Result<()> {
        save_json(self.kv.as_ref(), &keys::account(&account.email), account)
    }

    fn with_session<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self
            .session_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f()
    }

    /// All accounts found by prefix scan, oldest registration first.
    pub fn all_accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self
            .kv
            .keys_with_prefix(keys::ACCOUNT_PREFIX)
            .iter()
            .filter_map(|k| load_json::<Account>(self.kv.as_ref(), k))
            .collect();
        accounts.sort_by_key(|a| a.registered_at);
        accounts
    }

    pub fn account(&self, email: &str) -> Option<Account> {
        self.load(email)
    }

    pub fn account_count(&self) -> usize {
        self.kv.keys_with_prefix(keys::ACCOUNT_PREFIX).len()
    }

    /// Serialized read-modify-write on one account. The record is written
    /// back only when `f` succeeds and changed something.
    pub fn with_account<R>(&self, email: &str, f: impl FnOnce(&mut Account) -> Result<R>) -> Result<R> {
        self.locks.with_lock(email, || {
            let current = self
                .load(email)
                .ok_or_else(|| AppError::NotFound(format!("account {email}")))?;
            let mut next = current.clone();
            let out = f(&mut next)?;
            if next != current {
                self.store(&next)?;
            }
            Ok(out)
        })
    }

    /// Adds `delta` to the balance, clamping at zero. Returns the new balance.
    pub fn apply_balance_delta(&self, email: &str, delta: f64) -> Result<f64> {
        let balance = self.with_account(email, |a| Ok(a.apply_delta(delta)))?;
        debug!(email, delta, balance, "[ACCOUNTS] balance updated");
        Ok(balance)
    }

    // -----------------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------------

    pub fn sign_up(&self, name: &str, email: &str, password: &str, confirm: &str) -> Result<AccountView> {
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() || email.is_empty() || password.is_empty() {
            return Err(AppError::InvalidInput("name, email and password are required".into()));
        }
        if password != confirm {
            return Err(AppError::PasswordMismatch);
        }

        let account = self.locks.with_lock(email, || {
            let exists = self
                .kv
                .keys_with_prefix(keys::ACCOUNT_PREFIX)
                .iter()
                .any(|k| k.as_str() == keys::account(email));
            if exists {
                return Err(AppError::DuplicateEmail(email.to_string()));
            }
            let account = Account {
                name: name.to_string(),
                email: email.to_string(),
                password_hash: hash_password(password),
                balance: 0.0,
                is_logged_in: true,
                profile_image: None,
                registered_at: now_ms(),
            };
            self.store(&account)?;
            Ok(account)
        })?;

        self.write_session(email)?;
        info!(email, "[ACCOUNTS] account registered");
        Ok(AccountView::from(&account))
    }

    pub fn sign_in(&self, email: &str, password: &str) -> Result<AccountView> {
        let email = email.trim();
        let account = self
            .with_account(email, |a| {
                if !verify_password(password, &a.password_hash) {
                    return Err(AppError::InvalidCredentials);
                }
                a.is_logged_in = true;
                Ok(a.clone())
            })
            .map_err(|e| match e {
                AppError::NotFound(_) => AppError::InvalidCredentials,
                other => other,
            })
            .inspect_err(|_| warn!(email, "[ACCOUNTS] rejected sign-in"))?;

        self.write_session(email)?;
        info!(email, "[ACCOUNTS] signed in");
        Ok(AccountView::from(&account))
    }

    /// Marks the account logged out and clears the session pointer if it
    /// points at this account.
    pub fn sign_out(&self, email: &str) -> Result<()> {
        match self.with_account(email, |a| {
            a.is_logged_in = false;
            Ok(())
        }) {
            Ok(()) | Err(AppError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.with_session(|| {
            if self.session().is_some_and(|s| s.email == email) {
                self.kv.remove(keys::SESSION);
            }
        });
        info!(email, "[ACCOUNTS] signed out");
        Ok(())
    }

    fn write_session(&self, email: &str) -> Result<()> {
        let session = Session {
            email: email.to_string(),
            signed_in_at: now_ms(),
        };
        self.with_session(|| save_json(self.kv.as_ref(), keys::SESSION, &session))
    }

    pub fn session(&self) -> Option<Session> {
        load_json(self.kv.as_ref(), keys::SESSION)
    }

    /// The signed-in account, resolved fresh from its record.
    pub fn current_account(&self) -> Option<Account> {
        let session = self.session()?;
        self.load(&session.email)
    }

    pub fn require_current(&self) -> Result<Account> {
        self.current_account().ok_or(AppError::NotAuthenticated)
    }

    // -----------------------------------------------------------------------
    // Profile
    // -----------------------------------------------------------------------

    pub fn update_profile(
        &self,
        email: &str,
        name: &str,
        profile_image: Option<String>,
    ) -> Result<AccountView> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidInput("name must not be empty".into()));
        }
        self.with_account(email, |a| {
            a.name = name.to_string();
            a.profile_image = profile_image;
            Ok(AccountView::from(&*a))
        })
    }

    pub fn change_password(&self, email: &str, current: &str, new: &str, confirm: &str) -> Result<()> {
        if new != confirm {
            return Err(AppError::PasswordMismatch);
        }
        if new.is_empty() {
            return Err(AppError::InvalidInput("password must not be empty".into()));
        }
        self.with_account(email, |a| {
            if !verify_password(current, &a.password_hash) {
                return Err(AppError::InvalidCredentials);
            }
            a.password_hash = hash_password(new);
            Ok(())
        })?;
        info!(email, "[ACCOUNTS] password changed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Admin
    // -----------------------------------------------------------------------

    /// Sets name and absolute balance.
    pub fn admin_update(&self, email: &str, name: &str, balance: f64) -> Result<AccountView> {
        if !balance.is_finite() || balance < 0.0 {
            return Err(AppError::InvalidInput("balance must be zero or more".into()));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidInput("name must not be empty".into()));
        }
        let view = self.with_account(email, |a| {
            a.name = name.to_string();
            a.apply_delta(balance - a.balance);
            Ok(AccountView::from(&*a))
        })?;
        info!(email, balance = view.balance, "[ACCOUNTS] admin updated account");
        Ok(view)
    }

    pub fn reset_balance(&self, email: &str) -> Result<()> {
        self.with_account(email, |a| {
            a.apply_delta(-a.balance);
            Ok(())
        })?;
        info!(email, "[ACCOUNTS] balance reset to zero");
        Ok(())
    }

    pub fn delete_account(&self, email: &str) -> Result<()> {
        self.locks.with_lock(email, || {
            let key = keys::account(email);
            if self.kv.get(&key).is_none() {
                return Err(AppError::NotFound(format!("account {email}")));
            }
            self.kv.remove(&key);
            Ok(())
        })?;
        self.with_session(|| {
            if self.session().is_some_and(|s| s.email == email) {
                self.kv.remove(keys::SESSION);
            }
        });
        info!(email, "[ACCOUNTS] account deleted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
