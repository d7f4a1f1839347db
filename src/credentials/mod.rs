//! Per-tenant provider credentials: encrypted at rest, cached in memory.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialCache                    │
//! │  - (tenant, provider) → plaintext        │
//! │  - 5 minute TTL, checked on read         │
//! │  - explicit per-tenant invalidation      │
//! └─────────────────────────────────────────┘
//!          ↓ miss               ↑ plaintext
//! ┌─────────────────────────────────────────┐
//! │       Cipher                             │
//! │  - AES-256-CBC, random IV per secret     │
//! │  - blob = hex(iv):hex(ciphertext)        │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑ blob
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore (SQLite)           │
//! │  - ciphertext only, never plaintext      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use switchboard::clock::SystemClock;
//! use switchboard::credentials::{
//!     CacheSettings, Cipher, CredentialCache, SqliteCredentialStore,
//! };
//! use switchboard::provider::Provider;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let master = std::env::var("SWITCHBOARD_MASTER_KEY")?;
//! let cache = CredentialCache::new(
//!     Arc::new(SqliteCredentialStore::new("credentials.db")?),
//!     Arc::new(Cipher::from_master_secret(&master)?),
//!     Arc::new(SystemClock),
//!     CacheSettings::default(),
//! );
//!
//! cache.save("tenant-1", Provider::Pipedrive, "api-token").await?;
//! if let Some(secret) = cache.get("tenant-1", Provider::Pipedrive).await {
//!     // secret.expose() is the plaintext; `{:?}` prints [REDACTED]
//!     let _ = secret.expose();
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! - Only ciphertext is persisted; plaintext lives in process memory only
//! - Each secret is encrypted with a fresh IV
//! - The master key is read once at startup and never logged
//! - `Secret` and `Cipher` redact themselves in `Debug` output

use std::fmt;

mod cache;
mod encryption;
mod storage;

pub use cache::{CacheSettings, CredentialCache};
pub use encryption::{decrypt, derive_key, encrypt, Cipher, IV_SIZE, KEY_SIZE};
pub use storage::{CredentialStore, SqliteCredentialStore};

/// Decrypted credential value.
///
/// Never printed: `Debug` and `Display` both show `[REDACTED]`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Plaintext, for handing to a provider client.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Why no usable secret could be produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialError {
    /// Nothing stored for this tenant and provider
    NotFound,
    /// Store read failed
    StoreUnavailable(String),
    /// Store read exceeded the configured timeout
    Timeout,
    /// Stored blob could not be decrypted (malformed or wrong key)
    Decryption,
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialError::NotFound => write!(f, "no credential stored"),
            CredentialError::StoreUnavailable(msg) => {
                write!(f, "credential store unavailable: {}", msg)
            }
            CredentialError::Timeout => write!(f, "credential store timed out"),
            CredentialError::Decryption => write!(f, "stored credential could not be decrypted"),
        }
    }
}

impl std::error::Error for CredentialError {}
