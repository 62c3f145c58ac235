//! Persistence boundary
//!
//! Components talk to storage only through [`Store`]. The PostgreSQL
//! implementation lives in [`postgres`]; tests use the in-memory store in
//! [`testing`].

pub mod postgres;

use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::dispatch::{BanAction, Reason};
use crate::event::SteamId;
use crate::matches::SealedMatch;

pub use postgres::PgStore;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("record already exists")]
    Duplicate,

    #[error("record not found")]
    NotFound,

    #[error("store call exceeded {0:?}")]
    Timeout(Duration),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(ref db) if db.is_unique_violation() => StoreError::Duplicate,
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// Run a store call under a deadline
pub async fn with_deadline<T, F>(timeout: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// One chat line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRecord {
    pub steam_id: SteamId,
    pub server_id: i64,
    pub name: String,
    pub message: String,
    pub team_only: bool,
    pub created_at: DateTime<Utc>,
}

/// One player connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionRecord {
    pub steam_id: SteamId,
    pub server_id: i64,
    pub name: String,
    pub address: Option<IpAddr>,
    pub created_at: DateTime<Utc>,
}

/// Word filter definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct FilterRecord {
    pub filter_id: i64,
    pub pattern: String,
    pub is_regex: bool,
    pub is_enabled: bool,
    pub trigger_count: i64,
}

/// Registered game server
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ServerRecord {
    pub server_id: i64,
    pub short_name: String,
    pub address: String,
    pub port: i32,
    pub rcon_password: String,
    pub is_enabled: bool,
}

/// Persisted ban or gag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanRecord {
    pub steam_id: SteamId,
    pub author_id: SteamId,
    pub action: BanAction,
    pub reason: Reason,
    pub note: String,
    pub origin_server_id: Option<i64>,
    /// Request time truncated to the dedup bucket
    pub bucket: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// STORE TRAIT
// ============================================================================

#[async_trait]
pub trait Store: Send + Sync {
    async fn save_match(&self, sealed: &SealedMatch) -> Result<(), StoreError>;

    async fn append_chat_history(&self, record: &ChatRecord) -> Result<(), StoreError>;

    async fn append_connection_history(&self, record: &ConnectionRecord) -> Result<(), StoreError>;

    async fn increment_filter_trigger_count(&self, filter_id: i64) -> Result<(), StoreError>;

    /// Fails with [`StoreError::Duplicate`] when the same ban already exists
    /// for the target, reason and bucket
    async fn apply_ban(&self, ban: &BanRecord) -> Result<(), StoreError>;

    async fn get_filters(&self) -> Result<Vec<FilterRecord>, StoreError>;

    async fn get_server(&self, server_id: i64) -> Result<ServerRecord, StoreError>;

    async fn find_server_by_token_hash(&self, token_hash: &str) -> Result<Option<ServerRecord>, StoreError>;
}
