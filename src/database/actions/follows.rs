use std::collections::HashMap;

use potion::HtmlError;
use sqlx::{Pool, Postgres};

use super::users::{get_user_profile, PROFILE_COLUMNS};
use crate::{
    authentication::{jwt::SessionData, permissions::ActionType},
    error::QueryError,
    pagination::{PageContext, PageQuery},
    schema::{AuthorRecipe, ShortRecipe, Subscription, UserProfile, UserProfileRow, Uuid},
    validation::validate_follow,
};

pub async fn is_subscribed(
    user_id: Uuid,
    author_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<bool, potion::Error> {
    let row: (bool,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM follows WHERE user_id = $1 AND author_id = $2)",
    )
    .bind(user_id)
    .bind(author_id)
    .fetch_one(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    Ok(row.0)
}

pub async fn subscribe(
    session: &SessionData,
    author_id: Uuid,
    recipes_limit: Option<i64>,
    pool: &Pool<Postgres>,
) -> Result<Subscription, potion::Error> {
    session.authenticate(ActionType::ManageSubscriptions)?;
    let author = get_user_profile(author_id, Some(session), pool).await?;
    validate_follow(session.user_id, author_id).map_err(|e| e.into())?;

    let query = sqlx::query(
        "INSERT INTO follows (user_id, author_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(session.user_id)
    .bind(author_id)
    .execute(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    if query.rows_affected() == 0 {
        return Err(HtmlError::InvalidRequest.new("Already subscribed to this author"));
    }
    log::debug!("User {} subscribed to {}", session.user_id, author_id);

    let author = UserProfile {
        is_subscribed: true,
        ..author
    };
    let mut list = with_recipes(vec![author], recipes_limit, pool).await?;

    list.pop()
        .ok_or_else(|| HtmlError::InternalServerError.new("Subscription vanished"))
}

pub async fn unsubscribe(
    session: &SessionData,
    author_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<(), potion::Error> {
    session.authenticate(ActionType::ManageSubscriptions)?;

    let query = sqlx::query("DELETE FROM follows WHERE user_id = $1 AND author_id = $2")
        .bind(session.user_id)
        .bind(author_id)
        .execute(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    if query.rows_affected() == 0 {
        return Err(HtmlError::InvalidRequest.new("Not subscribed to this author"));
    }
    log::debug!("User {} unsubscribed from {}", session.user_id, author_id);
    Ok(())
}

/// Authors followed by the user, ordered by username.
pub async fn list_subscriptions(
    session: &SessionData,
    query: PageQuery,
    recipes_limit: Option<i64>,
    pool: &Pool<Postgres>,
) -> Result<PageContext<Subscription>, potion::Error> {
    session.authenticate(ActionType::ManageSubscriptions)?;

    let rows: Vec<UserProfileRow> = sqlx::query_as(&format!(
        "
        SELECT {PROFILE_COLUMNS}, COUNT(*) OVER() AS count
        FROM users u
        JOIN follows s ON s.author_id = u.id
        WHERE s.user_id = $1
        ORDER BY u.username
        LIMIT $2 OFFSET $3
    "
    ))
    .bind(session.user_id)
    .bind(query.limit)
    .bind(query.offset())
    .fetch_all(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    let count = rows.first().map(|r| r.count).unwrap_or(0);
    let authors = rows.into_iter().map(|r| r.profile).collect();
    let rows = with_recipes(authors, recipes_limit, pool).await?;

    Ok(PageContext::from_rows(rows, count, query))
}

/// Attaches each author's newest recipes (up to `recipes_limit`) and recipe count.
async fn with_recipes(
    authors: Vec<UserProfile>,
    recipes_limit: Option<i64>,
    pool: &Pool<Postgres>,
) -> Result<Vec<Subscription>, potion::Error> {
    let ids: Vec<Uuid> = authors.iter().map(|a| a.id).collect();

    let recipes: Vec<AuthorRecipe> = sqlx::query_as(
        "
        SELECT author_id, id, name, image, cooking_time FROM (
            SELECT r.author_id, r.id, r.name, r.image, r.cooking_time,
                ROW_NUMBER() OVER (PARTITION BY r.author_id ORDER BY r.pub_date DESC, r.id DESC) AS position
            FROM recipes r
            WHERE r.author_id = ANY($1)
        ) ranked
        WHERE $2::BIGINT IS NULL OR position <= $2
        ORDER BY author_id, position
    ",
    )
    .bind(&ids)
    .bind(recipes_limit)
    .fetch_all(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    let counts: Vec<(Uuid, i64)> = sqlx::query_as(
        "SELECT author_id, COUNT(*) FROM recipes WHERE author_id = ANY($1) GROUP BY author_id",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;
    let counts: HashMap<Uuid, i64> = counts.into_iter().collect();

    let mut recipe_map: HashMap<Uuid, Vec<ShortRecipe>> = HashMap::new();
    for row in recipes {
        recipe_map.entry(row.author_id).or_default().push(row.recipe);
    }

    Ok(authors
        .into_iter()
        .map(|author| Subscription {
            recipes: recipe_map.remove(&author.id).unwrap_or_default(),
            recipes_count: counts.get(&author.id).copied().unwrap_or(0),
            author,
        })
        .collect())
}
