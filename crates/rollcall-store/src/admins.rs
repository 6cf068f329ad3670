//! Administrator credentials, stored as per-user salted SHA-256.

use crate::{Store, StoreError};
use rand::RngCore;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const SALT_LEN: usize = 16;

impl Store {
    /// Create an administrator or replace their password.
    pub fn set_admin_password(&self, username: &str, password: &str) -> Result<(), StoreError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(StoreError::EmptyCredentials);
        }

        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = hex::encode(salt);
        let hash = hash_password(&salt, password);

        self.conn.execute(
            "INSERT INTO admins (username, salt, password_hash) VALUES (?1, ?2, ?3)
             ON CONFLICT(username) DO UPDATE SET salt = excluded.salt,
                                                password_hash = excluded.password_hash",
            params![username, salt, hash],
        )?;
        tracing::info!(username, "administrator password set");
        Ok(())
    }

    /// Check a username/password pair. Unknown users simply fail.
    pub fn verify_admin(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        let stored: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT salt, password_hash FROM admins WHERE username = ?1",
                params![username],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((salt, expected)) = stored else {
            tracing::warn!(username, "login attempt for unknown administrator");
            return Ok(false);
        };

        let ok = bool::from(hash_password(&salt, password).as_bytes().ct_eq(expected.as_bytes()));
        if !ok {
            tracing::warn!(username, "administrator password rejected");
        }
        Ok(ok)
    }

    pub fn has_admins(&self) -> Result<bool, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM admins", [], |row| row.get(0))?;
        Ok(count > 0)
    }
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}
