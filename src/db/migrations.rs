use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        debug!("Running migration v2");
        run_migration_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: users, links and tags");

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            ai_tagging_method TEXT NOT NULL DEFAULT 'disabled',
            archive_as_screenshot INTEGER NOT NULL DEFAULT 1,
            archive_as_monolith INTEGER NOT NULL DEFAULT 1,
            archive_as_pdf INTEGER NOT NULL DEFAULT 0,
            archive_as_readable INTEGER NOT NULL DEFAULT 1,
            archive_as_wayback INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create users table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection_id INTEGER NOT NULL,
            owner_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name TEXT NOT NULL DEFAULT '',
            url TEXT,
            type TEXT NOT NULL DEFAULT 'url',
            readable TEXT,
            image TEXT,
            monolith TEXT,
            pdf TEXT,
            preview TEXT,
            ai_tagged INTEGER NOT NULL DEFAULT 0,
            last_preserved TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create links table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            archive_as_screenshot INTEGER,
            archive_as_monolith INTEGER,
            archive_as_pdf INTEGER,
            archive_as_readable INTEGER,
            archive_as_wayback INTEGER,
            ai_tag INTEGER,
            UNIQUE(owner_id, name)
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create tags table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS link_tags (
            link_id INTEGER NOT NULL REFERENCES links(id) ON DELETE CASCADE,
            tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
            PRIMARY KEY (link_id, tag_id)
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create link_tags table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_collection ON links(collection_id)")
        .execute(pool)
        .await
        .context("Failed to create links collection index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_link_tags_tag ON link_tags(tag_id)")
        .execute(pool)
        .await
        .context("Failed to create link_tags index")?;

    Ok(())
}

async fn run_migration_v2(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v2: predefined AI tags");

    sqlx::query("ALTER TABLE users ADD COLUMN ai_predefined_tags TEXT")
        .execute(pool)
        .await
        .context("Failed to add ai_predefined_tags column")?;

    Ok(())
}
