//! PostgreSQL store

use async_trait::async_trait;
use sqlx::{types::Json, PgPool};

use super::{
    BanRecord, ChatRecord, ConnectionRecord, FilterRecord, ServerRecord, Store, StoreError,
};
use crate::matches::SealedMatch;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn save_match(&self, sealed: &SealedMatch) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO matches (match_id, server_id, map_name, red_score, blu_score,
                                 rounds, team_sums, player_sums, created_at, sealed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(sealed.match_id)
        .bind(sealed.server.id)
        .bind(&sealed.map_name)
        .bind(sealed.red_score())
        .bind(sealed.blu_score())
        .bind(Json(&sealed.rounds))
        .bind(Json(&sealed.team_sums))
        .bind(Json(&sealed.player_sums))
        .bind(sealed.created_at)
        .bind(sealed.sealed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_chat_history(&self, record: &ChatRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO person_messages (steam_id, server_id, persona_name, body, team, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.steam_id.0 as i64)
        .bind(record.server_id)
        .bind(&record.name)
        .bind(&record.message)
        .bind(record.team_only)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_connection_history(&self, record: &ConnectionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO person_connections (steam_id, server_id, persona_name, ip_address, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.steam_id.0 as i64)
        .bind(record.server_id)
        .bind(&record.name)
        .bind(record.address.map(|a| a.to_string()))
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn increment_filter_trigger_count(&self, filter_id: i64) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE filters SET trigger_count = trigger_count + 1, updated_at = NOW() WHERE filter_id = $1",
        )
        .bind(filter_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn apply_ban(&self, ban: &BanRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO bans (steam_id, author_id, action, reason, note, origin_server_id,
                              bucket, valid_until, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(ban.steam_id.0 as i64)
        .bind(ban.author_id.0 as i64)
        .bind(ban.action.as_str())
        .bind(ban.reason.as_str())
        .bind(&ban.note)
        .bind(ban.origin_server_id)
        .bind(ban.bucket)
        .bind(ban.valid_until)
        .bind(ban.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_filters(&self) -> Result<Vec<FilterRecord>, StoreError> {
        let filters = sqlx::query_as::<_, FilterRecord>(
            r#"
            SELECT filter_id, pattern, is_regex, is_enabled, trigger_count
            FROM filters
            WHERE is_enabled = true
            ORDER BY filter_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(filters)
    }

    async fn get_server(&self, server_id: i64) -> Result<ServerRecord, StoreError> {
        let server = sqlx::query_as::<_, ServerRecord>(
            r#"
            SELECT server_id, short_name, address, port, rcon_password, is_enabled
            FROM servers
            WHERE server_id = $1
            "#,
        )
        .bind(server_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(server)
    }

    async fn find_server_by_token_hash(&self, token_hash: &str) -> Result<Option<ServerRecord>, StoreError> {
        let server = sqlx::query_as::<_, ServerRecord>(
            r#"
            SELECT server_id, short_name, address, port, rcon_password, is_enabled
            FROM servers
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(server)
    }
}
