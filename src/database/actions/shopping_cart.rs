use chrono::NaiveDate;
use potion::HtmlError;
use sqlx::{Pool, Postgres};

use super::recipes::get_short_recipe;
use crate::{
    authentication::{jwt::SessionData, permissions::ActionType},
    error::QueryError,
    schema::{ShortRecipe, Uuid},
    shopping_list::{CartIngredient, ShoppingList, ShoppingListFile},
};

pub async fn is_in_shopping_cart(
    user_id: Uuid,
    recipe_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<bool, potion::Error> {
    let row: (bool,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM shopping_carts WHERE user_id = $1 AND recipe_id = $2)",
    )
    .bind(user_id)
    .bind(recipe_id)
    .fetch_one(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    Ok(row.0)
}

pub async fn add_to_shopping_cart(
    session: &SessionData,
    recipe_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<ShortRecipe, potion::Error> {
    session.authenticate(ActionType::ManageOwnShoppingCart)?;
    let recipe = get_short_recipe(recipe_id, pool).await?;

    let query = sqlx::query(
        "INSERT INTO shopping_carts (user_id, recipe_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(session.user_id)
    .bind(recipe_id)
    .execute(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    if query.rows_affected() == 0 {
        return Err(HtmlError::InvalidRequest.new("Recipe is already in the shopping cart"));
    }
    log::debug!("User {} added recipe {} to cart", session.user_id, recipe_id);
    Ok(recipe)
}

pub async fn remove_from_shopping_cart(
    session: &SessionData,
    recipe_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<(), potion::Error> {
    session.authenticate(ActionType::ManageOwnShoppingCart)?;
    get_short_recipe(recipe_id, pool).await?;

    let query = sqlx::query("DELETE FROM shopping_carts WHERE user_id = $1 AND recipe_id = $2")
        .bind(session.user_id)
        .bind(recipe_id)
        .execute(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    if query.rows_affected() == 0 {
        return Err(HtmlError::InvalidRequest.new("Recipe is not in the shopping cart"));
    }
    Ok(())
}

/// One row per ingredient of every recipe in the user's cart.
pub async fn fetch_cart_ingredients(
    user_id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<Vec<CartIngredient>, potion::Error> {
    let rows: Vec<CartIngredient> = sqlx::query_as(
        "
        SELECT c.recipe_id, i.id AS ingredient_id, i.name, i.measurement_unit, ri.amount
        FROM shopping_carts c
        INNER JOIN recipe_ingredients ri ON ri.recipe_id = c.recipe_id
        INNER JOIN ingredients i ON i.id = ri.ingredient_id
        WHERE c.user_id = $1
    ",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    Ok(rows)
}

pub async fn build_shopping_list(
    session: &SessionData,
    compiled_on: NaiveDate,
    pool: &Pool<Postgres>,
) -> Result<ShoppingList, potion::Error> {
    session.authenticate(ActionType::ManageOwnShoppingCart)?;

    let recipes: Vec<(String,)> = sqlx::query_as(
        "
        SELECT r.name FROM shopping_carts c
        INNER JOIN recipes r ON r.id = c.recipe_id
        WHERE c.user_id = $1
        ORDER BY r.name, r.id
    ",
    )
    .bind(session.user_id)
    .fetch_all(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    if recipes.is_empty() {
        return Err(HtmlError::InvalidRequest.new("Shopping cart is empty"));
    }

    let rows = fetch_cart_ingredients(session.user_id, pool).await?;
    let recipes = recipes.into_iter().map(|r| r.0).collect();

    Ok(ShoppingList::new(compiled_on, rows, recipes))
}

/// The shopping list as the text file offered for download.
pub async fn download_shopping_list(
    session: &SessionData,
    compiled_on: NaiveDate,
    pool: &Pool<Postgres>,
) -> Result<ShoppingListFile, potion::Error> {
    let list = build_shopping_list(session, compiled_on, pool).await?;
    log::debug!(
        "Compiled shopping list of {} items for user {}",
        list.items.len(),
        session.user_id
    );

    Ok(list.into_file())
}

#[cfg(test)]
mod tests {
    use sqlx::PgPool;

    use super::*;
    use crate::{schema::UserRole, shopping_list::ShoppingListItem};

    fn session(user_id: Uuid) -> SessionData {
        SessionData {
            user_id,
            email: "cook@example.com".to_string(),
            role: UserRole::User,
            is_admin: false,
        }
    }

    async fn insert_id(pool: &PgPool, sql: &str) -> Uuid {
        let (id,): (Uuid,) = sqlx::query_as(sql).fetch_one(pool).await.unwrap();
        id
    }

    async fn cart_two_recipes(pool: &PgPool) -> (Uuid, Uuid, Uuid) {
        let user = insert_id(
            pool,
            "INSERT INTO users (email, username, first_name, last_name, password) \
             VALUES ('cook@example.com', 'cook', 'Anna', 'Smith', 'x') RETURNING id",
        )
        .await;
        let beetroot = insert_id(
            pool,
            "INSERT INTO ingredients (name, measurement_unit) VALUES ('beetroot', 'g') RETURNING id",
        )
        .await;
        let salt = insert_id(
            pool,
            "INSERT INTO ingredients (name, measurement_unit) VALUES ('salt', 'g') RETURNING id",
        )
        .await;

        for (name, parts) in [
            ("Salad", vec![(beetroot, 200)]),
            ("Borscht", vec![(beetroot, 300), (salt, 5)]),
        ] {
            let (recipe,): (Uuid,) = sqlx::query_as(
                "INSERT INTO recipes (author_id, name, image, text, cooking_time) \
                 VALUES ($1, $2, '/media/recipes/images/a.png', 'Cook it', 30) RETURNING id",
            )
            .bind(user)
            .bind(name)
            .fetch_one(pool)
            .await
            .unwrap();

            for (ingredient, amount) in parts {
                sqlx::query(
                    "INSERT INTO recipe_ingredients (recipe_id, ingredient_id, amount) VALUES ($1, $2, $3)",
                )
                .bind(recipe)
                .bind(ingredient)
                .bind(amount)
                .execute(pool)
                .await
                .unwrap();
            }
            sqlx::query("INSERT INTO shopping_carts (user_id, recipe_id) VALUES ($1, $2)")
                .bind(user)
                .bind(recipe)
                .execute(pool)
                .await
                .unwrap();
        }

        (user, beetroot, salt)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn list_sums_amounts_across_carted_recipes(pool: PgPool) {
        let (user, beetroot, salt) = cart_two_recipes(&pool).await;

        let list = build_shopping_list(&session(user), date(), &pool)
            .await
            .ok()
            .unwrap();

        assert_eq!(list.recipes, vec!["Borscht".to_string(), "Salad".to_string()]);
        assert_eq!(
            list.items,
            vec![
                ShoppingListItem {
                    ingredient_id: beetroot,
                    name: "beetroot".to_string(),
                    measurement_unit: "g".to_string(),
                    total_amount: 500,
                },
                ShoppingListItem {
                    ingredient_id: salt,
                    name: "salt".to_string(),
                    measurement_unit: "g".to_string(),
                    total_amount: 5,
                },
            ]
        );

        let file = download_shopping_list(&session(user), date(), &pool)
            .await
            .ok()
            .unwrap();
        assert_eq!(file.filename, "shopping_list.txt");
        assert!(file.content.contains("1. Beetroot — 500 g"));
        assert!(file.content.contains("2. Salt — 5 g"));
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn empty_cart_has_no_list(pool: PgPool) {
        let (user, _, _) = cart_two_recipes(&pool).await;
        sqlx::query("DELETE FROM shopping_carts WHERE user_id = $1")
            .bind(user)
            .execute(&pool)
            .await
            .unwrap();

        assert!(build_shopping_list(&session(user), date(), &pool).await.is_err());
    }
}
