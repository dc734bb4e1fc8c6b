use potion::HtmlError;
use redis::aio::MultiplexedConnection;
use sqlx::{Pool, Postgres};

use crate::{
    authentication::{jwt::SessionData, permissions::ActionType},
    cache::cache::{refresh_cache_bind, CacheKeyType, CacheLifetime, RedisValue},
    error::{not_found, QueryError},
    schema::{Tag, Uuid},
    validation::validate_tag,
};

pub async fn create_tag(
    session: &SessionData,
    name: &str,
    slug: &str,
    pool: &Pool<Postgres>,
    cache: &mut MultiplexedConnection,
) -> Result<Tag, potion::Error> {
    session.authenticate(ActionType::ManageTags)?;
    let (name, slug) = (name.trim(), slug.trim());
    validate_tag(name, slug).map_err(|e| e.into())?;

    let tag: Option<Tag> = sqlx::query_as(
        "INSERT INTO tags (name, slug) VALUES ($1, $2) ON CONFLICT DO NOTHING RETURNING *",
    )
    .bind(name)
    .bind(slug)
    .fetch_optional(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    let tag = match tag {
        Some(tag) => tag,
        None => return Err(HtmlError::InvalidRequest.new("Tag with this name or slug exists")),
    };

    refresh_cache_bind(CacheLifetime::BindTagCache, cache).await?;
    log::info!("Created tag {} ({})", tag.slug, tag.id);
    Ok(tag)
}

pub async fn get_tag(id: Uuid, pool: &Pool<Postgres>) -> Result<Tag, potion::Error> {
    let tag: Option<Tag> = sqlx::query_as("SELECT * FROM tags WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    tag.ok_or_else(|| not_found("Tag"))
}

pub async fn list_tags(pool: &Pool<Postgres>) -> Result<Vec<Tag>, potion::Error> {
    let list: Vec<Tag> = sqlx::query_as("SELECT * FROM tags ORDER BY name, id")
        .fetch_all(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    Ok(list)
}

pub async fn list_tags_cached(
    pool: &Pool<Postgres>,
    cache: &mut MultiplexedConnection,
) -> Result<Vec<Tag>, potion::Error> {
    let pool = pool.clone();
    let list = RedisValue::get_or_list(CacheKeyType::Tags.new("all"), cache, move || async move {
        list_tags(&pool).await
    })
    .await?;

    Ok(list.value)
}

/// Ids from `ids` that have no tag row.
pub(crate) async fn missing_tags(
    ids: &[Uuid],
    pool: &Pool<Postgres>,
) -> Result<Vec<Uuid>, potion::Error> {
    let found: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM tags WHERE id = ANY($1)")
        .bind(ids)
        .fetch_all(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    Ok(ids
        .iter()
        .filter(|id| !found.iter().any(|(f,)| f == *id))
        .copied()
        .collect())
}
