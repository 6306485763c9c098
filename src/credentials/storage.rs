//! Encrypted token storage using SQLite.
//!
//! Stores each dashboard user's Discord access and refresh tokens. Every
//! write encrypts; reads fall back to treating undecryptable values as
//! legacy plaintext and schedule a background re-encryption.

use super::{CipherError, SecretCipher, StoredCredential};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Errors from the token store.
#[derive(Debug, Error)]
pub enum TokenStoreError {
    #[error("Credential database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to encrypt token: {0}")]
    Encryption(#[from] CipherError),

    #[error("Stored timestamp is invalid: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),

    #[error("Credential database lock poisoned")]
    LockPoisoned,

    #[error("Migration task did not complete: {0}")]
    Task(String),
}

/// Which token column a read or migration targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TokenColumn {
    Access,
    Refresh,
}

impl TokenColumn {
    fn name(self) -> &'static str {
        match self {
            TokenColumn::Access => "access_token",
            TokenColumn::Refresh => "refresh_token",
        }
    }
}

/// Detached re-encryption of a legacy plaintext token.
///
/// The request path drops this handle and moves on; failures are logged by
/// the task itself. Awaiting [`Migration::wait`] is only for callers that
/// need to observe completion (tests, admin tooling).
#[derive(Debug)]
pub struct Migration {
    handle: JoinHandle<Result<bool, TokenStoreError>>,
}

impl Migration {
    /// Waits for the write. `Ok(false)` means the row changed underneath
    /// (e.g. a refresh landed first) and nothing was rewritten.
    pub async fn wait(self) -> Result<bool, TokenStoreError> {
        self.handle
            .await
            .map_err(|e| TokenStoreError::Task(e.to_string()))?
    }
}

/// A usable plaintext token plus the migration it triggered, if any.
#[derive(Debug)]
pub struct TokenRead {
    pub token: String,
    pub migration: Option<Migration>,
}

/// Encrypted token storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE credentials (
///     user_id TEXT PRIMARY KEY,
///     access_token TEXT,          -- iv.ciphertext.tag envelope
///     refresh_token TEXT,         -- iv.ciphertext.tag envelope
///     created_at TEXT NOT NULL,   -- RFC 3339
///     updated_at TEXT NOT NULL    -- RFC 3339
/// );
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in a Mutex and shared with migration tasks
/// - Cloning the store is cheap and shares the same connection
#[derive(Clone)]
pub struct TokenStore {
    conn: Arc<Mutex<Connection>>,
    cipher: SecretCipher,
}

impl TokenStore {
    /// Creates or opens a token store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`:memory:` for tests)
    /// * `cipher` - Cipher built from the configured `ENCRYPTION_KEY`
    pub fn new<P: AsRef<Path>>(db_path: P, cipher: SecretCipher) -> Result<Self, TokenStoreError> {
        let conn = Connection::open(db_path)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                user_id TEXT PRIMARY KEY,
                access_token TEXT,
                refresh_token TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            cipher,
        })
    }

    /// Encrypts and stores both tokens for a user (upsert).
    ///
    /// A `None` refresh token keeps whatever refresh token is already stored,
    /// since Discord does not always rotate it.
    pub fn set_tokens(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(), TokenStoreError> {
        let access_cipher = self.cipher.encrypt(access_token)?;
        let refresh_cipher = refresh_token
            .map(|token| self.cipher.encrypt(token))
            .transpose()?;

        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().map_err(|_| TokenStoreError::LockPoisoned)?;
        conn.execute(
            r#"
            INSERT INTO credentials (user_id, access_token, refresh_token, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(user_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = COALESCE(excluded.refresh_token, credentials.refresh_token),
                updated_at = excluded.updated_at
            "#,
            params![user_id, access_cipher, refresh_cipher, now],
        )?;

        debug!(user_id = %user_id, "Stored encrypted tokens");
        Ok(())
    }

    /// Returns the user's plaintext access token, or `None` if there is none.
    pub fn get_access_token(&self, user_id: &str) -> Result<Option<TokenRead>, TokenStoreError> {
        self.read_token(user_id, TokenColumn::Access)
    }

    /// Returns the user's plaintext refresh token, or `None` if there is none.
    pub fn get_refresh_token(&self, user_id: &str) -> Result<Option<TokenRead>, TokenStoreError> {
        self.read_token(user_id, TokenColumn::Refresh)
    }

    /// Returns the raw stored row without decrypting anything.
    pub fn credential(&self, user_id: &str) -> Result<Option<StoredCredential>, TokenStoreError> {
        let conn = self.conn.lock().map_err(|_| TokenStoreError::LockPoisoned)?;
        let row = conn
            .query_row(
                "SELECT access_token, refresh_token, updated_at FROM credentials WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((access_token_cipher, refresh_token_cipher, updated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(StoredCredential {
            user_id: user_id.to_string(),
            access_token_cipher,
            refresh_token_cipher,
            updated_at: DateTime::parse_from_rfc3339(&updated_at)?.with_timezone(&Utc),
        }))
    }

    fn read_raw(&self, user_id: &str, column: TokenColumn) -> Result<Option<String>, TokenStoreError> {
        let conn = self.conn.lock().map_err(|_| TokenStoreError::LockPoisoned)?;
        let sql = format!(
            "SELECT {} FROM credentials WHERE user_id = ?1",
            column.name()
        );
        let value = conn
            .query_row(&sql, params![user_id], |row| row.get::<_, Option<String>>(0))
            .optional()?
            .flatten();

        Ok(value.filter(|v| !v.is_empty()))
    }

    fn read_token(
        &self,
        user_id: &str,
        column: TokenColumn,
    ) -> Result<Option<TokenRead>, TokenStoreError> {
        let Some(stored) = self.read_raw(user_id, column)? else {
            return Ok(None);
        };

        match self.cipher.decrypt(&stored) {
            Ok(token) => Ok(Some(TokenRead {
                token,
                migration: None,
            })),
            Err(e) => {
                // Not a security failure: rows predating encryption hold raw tokens
                warn!(
                    user_id = %user_id,
                    column = column.name(),
                    reason = %e,
                    "Stored token is not encrypted; using as legacy plaintext and migrating"
                );
                let migration = self.spawn_migration(user_id, column, stored.clone());
                Ok(Some(TokenRead {
                    token: stored,
                    migration,
                }))
            }
        }
    }

    /// Re-encrypts a legacy value off the request path.
    ///
    /// The update is conditional on the column still holding the legacy value,
    /// so a concurrent `set_tokens` is never overwritten.
    fn spawn_migration(
        &self,
        user_id: &str,
        column: TokenColumn,
        legacy_value: String,
    ) -> Option<Migration> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(user_id = %user_id, "No async runtime; legacy token migration skipped");
            return None;
        };

        let store = self.clone();
        let user_id = user_id.to_string();
        let handle = runtime.spawn_blocking(move || {
            let result = store.migrate_legacy(&user_id, column, &legacy_value);
            match &result {
                Ok(true) => debug!(user_id = %user_id, column = column.name(), "Legacy token migrated"),
                Ok(false) => debug!(user_id = %user_id, "Legacy token changed before migration; skipped"),
                Err(e) => warn!(user_id = %user_id, error = %e, "Failed to migrate legacy token"),
            }
            result
        });

        Some(Migration { handle })
    }

    fn migrate_legacy(
        &self,
        user_id: &str,
        column: TokenColumn,
        legacy_value: &str,
    ) -> Result<bool, TokenStoreError> {
        let encrypted = self.cipher.encrypt(legacy_value)?;
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            "UPDATE credentials SET {col} = ?1, updated_at = ?2 WHERE user_id = ?3 AND {col} = ?4",
            col = column.name()
        );

        let conn = self.conn.lock().map_err(|_| TokenStoreError::LockPoisoned)?;
        let rows = conn.execute(&sql, params![encrypted, now, user_id, legacy_value])?;
        Ok(rows > 0)
    }
}
