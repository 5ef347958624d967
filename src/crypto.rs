//! AES-256-GCM encryption and PBKDF2 key derivation.
//!
//! All persisted blobs are protected with authenticated encryption: an
//! envelope of hex-encoded IV, ciphertext and authentication tag, serialized
//! as JSON. Keys are derived from a secret (password or auth token) with
//! PBKDF2-HMAC-SHA256 and a 32-byte salt. The iteration count has a hard
//! floor so a leaked salt stays expensive to brute-force.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::constants::{IV_LENGTH, PBKDF2_MIN_ITERATIONS, SALT_LENGTH, TAG_LENGTH};
use crate::error::{Error, Result};

/// Raw AES-256 key material.
pub type CipherKey = [u8; 32];

/// Encrypted payload as stored on disk. All fields are hex strings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CipherEnvelope {
    pub iv: String,
    pub ciphertext: String,
    pub auth_tag: String,
}

impl CipherEnvelope {
    /// Checks whether a stored string looks like an encryption envelope.
    pub fn parse(value: &str) -> Option<Self> {
        serde_json::from_str(value).ok()
    }
}

/// Derives an AES-256 key from a secret with PBKDF2-HMAC-SHA256.
///
/// A fresh random 32-byte salt is generated when `salt` is `None`; passing
/// the returned salt back reproduces the same key. Iteration counts below
/// [`PBKDF2_MIN_ITERATIONS`] are rejected.
pub fn derive_key(secret: &str, salt: Option<&str>, iterations: u32) -> Result<(CipherKey, String)> {
    if iterations < PBKDF2_MIN_ITERATIONS {
        return Err(Error::Configuration(format!(
            "PBKDF2 iteration count {iterations} is below the {PBKDF2_MIN_ITERATIONS} floor"
        )));
    }

    let salt_hex = match salt {
        Some(s) => s.to_string(),
        None => {
            let mut bytes = [0u8; SALT_LENGTH];
            OsRng.fill_bytes(&mut bytes);
            hex::encode(bytes)
        }
    };
    let salt_bytes =
        hex::decode(&salt_hex).map_err(|_| Error::Validation("salt is not valid hex".into()))?;

    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), &salt_bytes, iterations, &mut key);
    Ok((key, salt_hex))
}

/// Encrypts a string with AES-256-GCM under a fresh random 12-byte IV.
pub fn encrypt(plaintext: &str, key: &CipherKey) -> Result<CipherEnvelope> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    // Fresh IV from the OS RNG on every call; never reused under one key.
    let mut iv = [0u8; IV_LENGTH];
    OsRng.fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let mut combined = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| Error::Authentication("encryption failed".into()))?;

    // aes-gcm appends the 16-byte tag to the ciphertext; store it separately.
    let tag = combined.split_off(combined.len() - TAG_LENGTH);
    Ok(CipherEnvelope {
        iv: hex::encode(iv),
        ciphertext: hex::encode(combined),
        auth_tag: hex::encode(tag),
    })
}

/// Decrypts an envelope, verifying the authentication tag.
///
/// Fails with [`Error::Authentication`] when the tag does not verify, i.e.
/// the data was tampered with or the key is wrong. Never returns partial
/// plaintext.
pub fn decrypt(envelope: &CipherEnvelope, key: &CipherKey) -> Result<String> {
    let iv = hex::decode(&envelope.iv)
        .map_err(|_| Error::Authentication("envelope IV is not valid hex".into()))?;
    if iv.len() != IV_LENGTH {
        return Err(Error::Authentication("envelope IV has wrong length".into()));
    }
    let mut combined = hex::decode(&envelope.ciphertext)
        .map_err(|_| Error::Authentication("envelope ciphertext is not valid hex".into()))?;
    let tag = hex::decode(&envelope.auth_tag)
        .map_err(|_| Error::Authentication("envelope auth tag is not valid hex".into()))?;
    combined.extend_from_slice(&tag);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), combined.as_ref())
        .map_err(|_| Error::Authentication("authentication tag verification failed".into()))?;

    String::from_utf8(plaintext)
        .map_err(|_| Error::Authentication("decrypted data is not valid UTF-8".into()))
}

/// Serializes a value to JSON and encrypts it, returning the envelope as a
/// JSON string ready for storage.
pub fn encrypt_object<T: Serialize>(value: &T, key: &CipherKey) -> Result<String> {
    let json = serde_json::to_string(value)
        .map_err(|e| Error::Validation(format!("serialization failed: {e}")))?;
    let envelope = encrypt(&json, key)?;
    serde_json::to_string(&envelope)
        .map_err(|e| Error::Validation(format!("envelope serialization failed: {e}")))
}

/// Decrypts an envelope JSON string and deserializes the plaintext.
pub fn decrypt_object<T: DeserializeOwned>(encrypted: &str, key: &CipherKey) -> Result<T> {
    let envelope = CipherEnvelope::parse(encrypted)
        .ok_or_else(|| Error::Authentication("stored value is not an envelope".into()))?;
    let json = decrypt(&envelope, key)?;
    serde_json::from_str(&json)
        .map_err(|_| Error::Authentication("decrypted payload failed to parse".into()))
}
