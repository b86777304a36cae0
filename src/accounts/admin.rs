use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::{info, warn};

use crate::accounts::credentials::{hash_password, verify_password};
use crate::error::{AppError, Result};

struct AdminCredentials {
    username: String,
    password_hash: String,
}

/// Single admin login. The configured password is hashed on construction.
///
/// The signed-in flag is process-wide: the service assumes one operator, so
/// once the admin signs in every client passes `require()` until sign-out.
pub struct AdminAuth {
    credentials: Mutex<AdminCredentials>,
    signed_in: AtomicBool,
}

impl AdminAuth {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            credentials: Mutex::new(AdminCredentials {
                username: username.to_string(),
                password_hash: hash_password(password),
            }),
            signed_in: AtomicBool::new(false),
        }
    }

    fn check(&self, username: &str, password: &str) -> bool {
        let creds = self
            .credentials
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        creds.username == username && verify_password(password, &creds.password_hash)
    }

    pub fn sign_in(&self, username: &str, password: &str) -> Result<()> {
        if !self.check(username, password) {
            warn!(username, "[ADMIN] rejected sign-in");
            return Err(AppError::InvalidCredentials);
        }
        self.signed_in.store(true, Ordering::Relaxed);
        info!(username, "[ADMIN] signed in");
        Ok(())
    }

    pub fn sign_out(&self) {
        self.signed_in.store(false, Ordering::Relaxed);
    }

    pub fn is_signed_in(&self) -> bool {
        self.signed_in.load(Ordering::Relaxed)
    }

    pub fn require(&self) -> Result<()> {
        if self.is_signed_in() {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }

    pub fn change_credentials(
        &self,
        current_password: &str,
        new_username: &str,
        new_password: &str,
        confirm: &str,
    ) -> Result<()> {
        if new_password != confirm {
            return Err(AppError::PasswordMismatch);
        }
        if new_username.trim().is_empty() || new_password.is_empty() {
            return Err(AppError::InvalidInput("username and password are required".into()));
        }
        let mut creds = self
            .credentials
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !verify_password(current_password, &creds.password_hash) {
            return Err(AppError::InvalidCredentials);
        }
        creds.username = new_username.trim().to_string();
        creds.password_hash = hash_password(new_password);
        info!(username = %creds.username, "[ADMIN] credentials changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_gate_follows_sign_in() {
        let admin = AdminAuth::new("admin", "admin123");
        assert!(matches!(admin.require(), Err(AppError::Forbidden)));
        assert!(admin.sign_in("admin", "wrong").is_err());
        admin.sign_in("admin", "admin123").unwrap();
        assert!(admin.require().is_ok());
        admin.sign_out();
        assert!(!admin.is_signed_in());
    }

    #[test]
    fn credentials_can_be_rotated() {
        let admin = AdminAuth::new("admin", "admin123");
        assert!(admin.change_credentials("bad", "root", "s3cret", "s3cret").is_err());
        admin.change_credentials("admin123", "root", "s3cret", "s3cret").unwrap();
        assert!(admin.sign_in("admin", "admin123").is_err());
        admin.sign_in("root", "s3cret").unwrap();
    }
}
