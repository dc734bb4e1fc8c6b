use potion::HtmlError;
use sqlx::{Pool, Postgres};

use super::recipes::get_short_recipe;
use crate::{
    authentication::{jwt::SessionData, permissions::ActionType},
    error::QueryError,
    schema::{ShortRecipe, Uuid},
};

pub async fn is_favorite(
    user_id: Uuid,
    recipe_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<bool, potion::Error> {
    let row: (bool,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM favorites WHERE user_id = $1 AND recipe_id = $2)",
    )
    .bind(user_id)
    .bind(recipe_id)
    .fetch_one(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    Ok(row.0)
}

pub async fn add_to_favorites(
    session: &SessionData,
    recipe_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<ShortRecipe, potion::Error> {
    session.authenticate(ActionType::ManageOwnFavorites)?;
    let recipe = get_short_recipe(recipe_id, pool).await?;

    let query = sqlx::query(
        "INSERT INTO favorites (user_id, recipe_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(session.user_id)
    .bind(recipe_id)
    .execute(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    if query.rows_affected() == 0 {
        return Err(HtmlError::InvalidRequest.new("Recipe is already in favorites"));
    }
    log::debug!("User {} favorited recipe {}", session.user_id, recipe_id);
    Ok(recipe)
}

pub async fn remove_from_favorites(
    session: &SessionData,
    recipe_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<(), potion::Error> {
    session.authenticate(ActionType::ManageOwnFavorites)?;
    get_short_recipe(recipe_id, pool).await?;

    let query = sqlx::query("DELETE FROM favorites WHERE user_id = $1 AND recipe_id = $2")
        .bind(session.user_id)
        .bind(recipe_id)
        .execute(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    if query.rows_affected() == 0 {
        return Err(HtmlError::InvalidRequest.new("Recipe is not in favorites"));
    }
    Ok(())
}
