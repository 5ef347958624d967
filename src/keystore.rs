//! In-memory holder for the active encryption key.
//!
//! The key store keeps at most one derived key, scoped to the authenticated
//! session. The storage adapter consults it on every read and write; when no
//! key is set (or decryption fails) stored values pass through as plaintext,
//! which is what lets unencrypted legacy data migrate forward transparently.

use std::sync::Mutex;

use crate::crypto::{self, CipherEnvelope, CipherKey};
use crate::error::Result;

/// Application-wide salt for token-derived keys. Tokens are retrievable from
/// the identity collaborator after a restart, so deriving with a fixed salt
/// keeps the key reproducible from the token alone.
const TOKEN_KEY_SALT: &str = "8d69bd1e0b9f4c2aa7305c14d1f2b55e8d69bd1e0b9f4c2aa7305c14d1f2b55e";

/// Holds the current encryption key for the session.
#[derive(Default)]
pub struct KeyStore {
    key: Mutex<Option<CipherKey>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives a key from an auth token and makes it the active key.
    ///
    /// The same token always yields the same key, so this is safe to call on
    /// every login.
    pub fn set_from_token(&self, token: &str, iterations: u32) -> Result<()> {
        let (key, _salt) = crypto::derive_key(token, Some(TOKEN_KEY_SALT), iterations)?;
        self.set_direct(key);
        Ok(())
    }

    /// Stores a raw key not tied to a token.
    ///
    /// Used for local-password accounts. The key is NOT re-derivable after
    /// [`clear`](Self::clear) without the original password.
    pub fn set_direct(&self, key: CipherKey) {
        if let Ok(mut guard) = self.key.lock() {
            *guard = Some(key);
        }
    }

    /// Drops the active key. Call on logout.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.key.lock() {
            *guard = None;
        }
    }

    /// Returns a copy of the active key, if any.
    pub fn key(&self) -> Option<CipherKey> {
        self.key.lock().ok().and_then(|guard| *guard)
    }

    /// Attempts to decrypt a stored value with the active key.
    ///
    /// Returns `None` when no key is set, the value is not an envelope, or
    /// the tag does not verify. Never errors; callers treat `None` as "use
    /// the raw stored string".
    pub fn maybe_decrypt(&self, value: &str) -> Option<String> {
        let key = self.key()?;
        let envelope = CipherEnvelope::parse(value)?;
        crypto::decrypt(&envelope, &key).ok()
    }
}
