use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::{ArchivalTarget, Link, LinkPatch, NewLink, NewTag, NewUser, Tag, User};
use crate::constants::UNAVAILABLE;

// ========== Users ==========

/// Insert a new user, returning its ID.
pub async fn insert_user(pool: &SqlitePool, user: &NewUser) -> Result<i64> {
    let predefined = serde_json::to_string(&user.ai_predefined_tags)
        .context("Failed to serialize predefined tags")?;

    let result = sqlx::query(
        r"
        INSERT INTO users (
            username, ai_tagging_method, ai_predefined_tags,
            archive_as_screenshot, archive_as_monolith, archive_as_pdf,
            archive_as_readable, archive_as_wayback
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(&user.username)
    .bind(user.ai_tagging_method.as_str())
    .bind(predefined)
    .bind(user.archive_as_screenshot)
    .bind(user.archive_as_monolith)
    .bind(user.archive_as_pdf)
    .bind(user.archive_as_readable)
    .bind(user.archive_as_wayback)
    .execute(pool)
    .await
    .context("Failed to insert user")?;

    Ok(result.last_insert_rowid())
}

/// Get a user by ID.
pub async fn get_user(pool: &SqlitePool, id: i64) -> Result<Option<User>> {
    sqlx::query_as(
        r"
        SELECT id, username, ai_tagging_method, ai_predefined_tags,
               archive_as_screenshot, archive_as_monolith, archive_as_pdf,
               archive_as_readable, archive_as_wayback
        FROM users WHERE id = ?
        ",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch user")
}

// ========== Links ==========

/// Insert a new link, returning its ID.
pub async fn insert_link(pool: &SqlitePool, link: &NewLink) -> Result<i64> {
    let result = sqlx::query(
        r"
        INSERT INTO links (collection_id, owner_id, name, url)
        VALUES (?, ?, ?, ?)
        ",
    )
    .bind(link.collection_id)
    .bind(link.owner_id)
    .bind(&link.name)
    .bind(&link.url)
    .execute(pool)
    .await
    .context("Failed to insert link")?;

    Ok(result.last_insert_rowid())
}

/// Get a link by ID.
pub async fn get_link(pool: &SqlitePool, id: i64) -> Result<Option<Link>> {
    sqlx::query_as("SELECT * FROM links WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch link")
}

/// Load a link together with its owner and tags.
///
/// Returns `None` if the link (or its owner) no longer exists.
pub async fn get_archival_target(pool: &SqlitePool, link_id: i64) -> Result<Option<ArchivalTarget>> {
    let Some(link) = get_link(pool, link_id).await? else {
        return Ok(None);
    };
    let Some(owner) = get_user(pool, link.owner_id).await? else {
        return Ok(None);
    };
    let tags = get_tags_for_link(pool, link_id).await?;

    Ok(Some(ArchivalTarget { link, owner, tags }))
}

/// Apply a partial update to a link. Unset patch fields keep their value.
pub async fn update_link(pool: &SqlitePool, id: i64, patch: &LinkPatch) -> Result<()> {
    if patch.is_empty() {
        return Ok(());
    }

    sqlx::query(
        r"
        UPDATE links SET
            name = COALESCE(?, name),
            type = COALESCE(?, type),
            readable = COALESCE(?, readable),
            image = COALESCE(?, image),
            monolith = COALESCE(?, monolith),
            pdf = COALESCE(?, pdf),
            preview = COALESCE(?, preview),
            ai_tagged = COALESCE(?, ai_tagged),
            last_preserved = COALESCE(?, last_preserved)
        WHERE id = ?
        ",
    )
    .bind(&patch.name)
    .bind(patch.link_type.map(|t| t.as_str()))
    .bind(&patch.readable)
    .bind(&patch.image)
    .bind(&patch.monolith)
    .bind(&patch.pdf)
    .bind(&patch.preview)
    .bind(patch.ai_tagged)
    .bind(&patch.last_preserved)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to update link")?;

    Ok(())
}

/// Mark every artifact column that is still NULL as unavailable.
///
/// Populated columns are never touched.
pub async fn mark_unset_artifacts_unavailable(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query(
        r"
        UPDATE links SET
            readable = COALESCE(readable, ?1),
            image = COALESCE(image, ?1),
            monolith = COALESCE(monolith, ?1),
            pdf = COALESCE(pdf, ?1),
            preview = COALESCE(preview, ?1)
        WHERE id = ?2
        ",
    )
    .bind(UNAVAILABLE)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to mark artifacts unavailable")?;

    Ok(())
}

/// Delete a link. Returns whether a row was removed.
pub async fn delete_link(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM links WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete link")?;

    Ok(result.rows_affected() > 0)
}

// ========== Tags ==========

/// Insert a new tag, returning its ID.
pub async fn insert_tag(pool: &SqlitePool, tag: &NewTag) -> Result<i64> {
    let result = sqlx::query(
        r"
        INSERT INTO tags (
            owner_id, name, archive_as_screenshot, archive_as_monolith,
            archive_as_pdf, archive_as_readable, archive_as_wayback, ai_tag
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(tag.owner_id)
    .bind(&tag.name)
    .bind(tag.archive_as_screenshot)
    .bind(tag.archive_as_monolith)
    .bind(tag.archive_as_pdf)
    .bind(tag.archive_as_readable)
    .bind(tag.archive_as_wayback)
    .bind(tag.ai_tag)
    .execute(pool)
    .await
    .context("Failed to insert tag")?;

    Ok(result.last_insert_rowid())
}

/// Find a tag by name for an owner, creating a plain tag if missing.
pub async fn upsert_tag_by_name(pool: &SqlitePool, owner_id: i64, name: &str) -> Result<i64> {
    sqlx::query("INSERT OR IGNORE INTO tags (owner_id, name) VALUES (?, ?)")
        .bind(owner_id)
        .bind(name)
        .execute(pool)
        .await
        .context("Failed to upsert tag")?;

    let row: (i64,) = sqlx::query_as("SELECT id FROM tags WHERE owner_id = ? AND name = ?")
        .bind(owner_id)
        .bind(name)
        .fetch_one(pool)
        .await
        .context("Failed to fetch upserted tag")?;

    Ok(row.0)
}

/// Attach a tag to a link. Attaching twice is a no-op.
pub async fn attach_tag(pool: &SqlitePool, link_id: i64, tag_id: i64) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO link_tags (link_id, tag_id) VALUES (?, ?)")
        .bind(link_id)
        .bind(tag_id)
        .execute(pool)
        .await
        .context("Failed to attach tag")?;

    Ok(())
}

/// Get all tags attached to a link.
pub async fn get_tags_for_link(pool: &SqlitePool, link_id: i64) -> Result<Vec<Tag>> {
    sqlx::query_as(
        r"
        SELECT t.* FROM tags t
        JOIN link_tags lt ON lt.tag_id = t.id
        WHERE lt.link_id = ?
        ORDER BY t.name
        ",
    )
    .bind(link_id)
    .fetch_all(pool)
    .await
    .context("Failed to fetch tags for link")
}

/// Get all tags owned by a user.
pub async fn get_tags_for_owner(pool: &SqlitePool, owner_id: i64) -> Result<Vec<Tag>> {
    sqlx::query_as("SELECT * FROM tags WHERE owner_id = ? ORDER BY name")
        .bind(owner_id)
        .fetch_all(pool)
        .await
        .context("Failed to fetch tags for owner")
}
