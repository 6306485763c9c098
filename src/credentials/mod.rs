//! Encrypted custody of Discord OAuth tokens.
//!
//! Access and refresh tokens are sealed with AES-256-GCM before they touch
//! SQLite. Rows written before encryption was introduced hold raw tokens;
//! those are served as-is and re-encrypted in the background on first read.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenStore                         │
//! │  - get/set access + refresh tokens       │
//! │  - legacy plaintext migration            │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SecretCipher                       │
//! │  - AES-256-GCM, random 96-bit IV         │
//! │  - iv.ciphertext.tag hex envelope        │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SQLite Database                    │
//! │  - one row per dashboard user            │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use guildgate::credentials::{SecretCipher, TokenStore};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let cipher = SecretCipher::from_hex_key(&std::env::var("ENCRYPTION_KEY")?)?;
//! let store = TokenStore::new("guildgate.db", cipher)?;
//!
//! store.set_tokens("user1", "discord_access", Some("discord_refresh"))?;
//!
//! if let Some(read) = store.get_access_token("user1")? {
//!     println!("token length: {}", read.token.len());
//! }
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};

mod encryption;
mod storage;

pub use encryption::{CipherError, SecretCipher};
pub use storage::{Migration, TokenRead, TokenStore, TokenStoreError};

/// A user's persisted credential row, exactly as stored.
///
/// Token fields hold cipher envelopes (or raw legacy values not yet
/// migrated). Rows are written on login and on every successful refresh and
/// are never deleted by this crate; logout does not revoke.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredCredential {
    pub user_id: String,
    pub access_token_cipher: Option<String>,
    pub refresh_token_cipher: Option<String>,
    pub updated_at: DateTime<Utc>,
}
