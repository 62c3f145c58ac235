//! Database module - PostgreSQL connection and migrations

use sqlx::{postgres::PgPoolOptions, PgPool};

/// Create database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Apply the schema; every statement is idempotent
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;

    tracing::info!("Database schema applied successfully");
    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Game servers pushing logs
CREATE TABLE IF NOT EXISTS servers (
    server_id BIGSERIAL PRIMARY KEY,
    short_name VARCHAR(32) NOT NULL UNIQUE,
    address VARCHAR(255) NOT NULL,
    port INT NOT NULL DEFAULT 27015,
    rcon_password VARCHAR(255) NOT NULL DEFAULT '',
    token_hash VARCHAR(64) UNIQUE,
    is_enabled BOOLEAN NOT NULL DEFAULT true,
    created_at TIMESTAMPTZ DEFAULT NOW(),
    updated_at TIMESTAMPTZ DEFAULT NOW()
);

-- Word filters
CREATE TABLE IF NOT EXISTS filters (
    filter_id BIGSERIAL PRIMARY KEY,
    pattern TEXT NOT NULL,
    is_regex BOOLEAN NOT NULL DEFAULT false,
    is_enabled BOOLEAN NOT NULL DEFAULT true,
    trigger_count BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ DEFAULT NOW(),
    updated_at TIMESTAMPTZ DEFAULT NOW()
);

-- Chat history
CREATE TABLE IF NOT EXISTS person_messages (
    person_message_id BIGSERIAL PRIMARY KEY,
    steam_id BIGINT NOT NULL,
    server_id BIGINT REFERENCES servers(server_id) ON DELETE CASCADE,
    persona_name VARCHAR(255) NOT NULL,
    body TEXT NOT NULL,
    team BOOLEAN NOT NULL DEFAULT false,
    created_at TIMESTAMPTZ NOT NULL
);

-- Connection history
CREATE TABLE IF NOT EXISTS person_connections (
    person_connection_id BIGSERIAL PRIMARY KEY,
    steam_id BIGINT NOT NULL,
    server_id BIGINT REFERENCES servers(server_id) ON DELETE CASCADE,
    persona_name VARCHAR(255) NOT NULL,
    ip_address VARCHAR(45),
    created_at TIMESTAMPTZ NOT NULL
);

-- Bans and gags
CREATE TABLE IF NOT EXISTS bans (
    ban_id BIGSERIAL PRIMARY KEY,
    steam_id BIGINT NOT NULL,
    author_id BIGINT NOT NULL,
    action VARCHAR(16) NOT NULL,
    reason VARCHAR(32) NOT NULL,
    note TEXT NOT NULL DEFAULT '',
    origin_server_id BIGINT REFERENCES servers(server_id) ON DELETE SET NULL,
    bucket TIMESTAMPTZ NOT NULL,
    valid_until TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL,
    CONSTRAINT bans_dedup UNIQUE (steam_id, reason, bucket)
);

-- Match summaries
CREATE TABLE IF NOT EXISTS matches (
    match_id UUID PRIMARY KEY,
    server_id BIGINT REFERENCES servers(server_id) ON DELETE CASCADE,
    map_name VARCHAR(64) NOT NULL,
    red_score INT NOT NULL DEFAULT 0,
    blu_score INT NOT NULL DEFAULT 0,
    rounds JSONB NOT NULL,
    team_sums JSONB NOT NULL,
    player_sums JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    sealed_at TIMESTAMPTZ NOT NULL
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_person_messages_steam ON person_messages(steam_id, created_at);
CREATE INDEX IF NOT EXISTS idx_person_connections_steam ON person_connections(steam_id, created_at);
CREATE INDEX IF NOT EXISTS idx_bans_steam ON bans(steam_id);
CREATE INDEX IF NOT EXISTS idx_matches_server ON matches(server_id, created_at);
"#;
