use std::collections::{HashMap, HashSet};

use potion::HtmlError;
use redis::aio::MultiplexedConnection;
use sqlx::{PgConnection, Pool, Postgres, QueryBuilder};

use super::{
    ingredients::missing_ingredients,
    tags::missing_tags,
    users::PROFILE_COLUMNS,
};
use crate::{
    authentication::{jwt::SessionData, permissions::ActionType},
    cache::cache::{refresh_cache_bind, CacheKeyType, CacheLifetime, RedisValue},
    constants::{RECIPE_IMAGE_DIR, SHORT_LINK_PREFIX},
    error::{not_found, QueryError},
    media::MediaStore,
    pagination::{PageContext, PageQuery},
    schema::{
        LinkedRecipeTag, Recipe, RecipeDetail, RecipeFilter, RecipeIngredient, RecipeRow,
        ShortRecipe, Tag, UserProfile, Uuid,
    },
    validation::RecipePayload,
};

async fn find_recipe(id: Uuid, pool: &Pool<Postgres>) -> Result<Option<Recipe>, potion::Error> {
    let row: Option<Recipe> = sqlx::query_as("SELECT * FROM recipes WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    Ok(row)
}

pub async fn get_recipe(id: Uuid, pool: &Pool<Postgres>) -> Result<Recipe, potion::Error> {
    find_recipe(id, pool)
        .await?
        .ok_or_else(|| not_found("Recipe"))
}

pub async fn get_recipe_cached(
    id: Uuid,
    pool: &Pool<Postgres>,
    cache: &mut MultiplexedConnection,
) -> Result<Recipe, potion::Error> {
    let pool = pool.clone();
    let key = CacheKeyType::Recipe.new(id);
    let recipe = RedisValue::get_or_optional(key, cache, move || async move {
        find_recipe(id, &pool).await
    })
    .await?;

    recipe.map(|r| r.value).ok_or_else(|| not_found("Recipe"))
}

pub(crate) async fn get_short_recipe(
    id: Uuid,
    pool: &Pool<Postgres>,
) -> Result<ShortRecipe, potion::Error> {
    let row: Option<ShortRecipe> =
        sqlx::query_as("SELECT id, name, image, cooking_time FROM recipes WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(|e| QueryError::from(e).into())?;

    row.ok_or_else(|| not_found("Recipe"))
}

/// Recipe the session may edit: its author's or any for admins.
pub async fn get_recipe_mut(
    id: Uuid,
    session: &SessionData,
    pool: &Pool<Postgres>,
) -> Result<Recipe, potion::Error> {
    let recipe = get_recipe(id, pool).await?;
    session.authenticate_owner(
        recipe.author_id,
        ActionType::ManageOwnRecipes,
        ActionType::ManageAllRecipes,
    )?;

    Ok(recipe)
}

pub async fn get_recipe_detail(
    id: Uuid,
    viewer: Option<&SessionData>,
    pool: &Pool<Postgres>,
) -> Result<RecipeDetail, potion::Error> {
    let recipe = get_recipe(id, pool).await?;
    let mut list = hydrate(vec![recipe], viewer, pool).await?;

    list.pop().ok_or_else(|| not_found("Recipe"))
}

/// Newest recipes first. Favorite and cart filters only apply to signed in viewers.
pub async fn fetch_recipes(
    filter: &RecipeFilter,
    viewer: Option<&SessionData>,
    query: PageQuery,
    pool: &Pool<Postgres>,
) -> Result<PageContext<RecipeDetail>, potion::Error> {
    let mut query_builder: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT r.*, COUNT(*) OVER() AS count FROM recipes r WHERE TRUE");

    if let Some(author) = filter.author {
        query_builder.push(" AND r.author_id = ").push_bind(author);
    }
    if !filter.tags.is_empty() {
        query_builder
            .push(
                " AND EXISTS (SELECT 1 FROM recipe_tags rt JOIN tags t ON t.id = rt.tag_id \
                 WHERE rt.recipe_id = r.id AND t.slug = ANY(",
            )
            .push_bind(filter.tags.clone())
            .push("))");
    }
    if let Some(viewer) = viewer {
        if filter.is_favorited {
            query_builder
                .push(" AND EXISTS (SELECT 1 FROM favorites f WHERE f.recipe_id = r.id AND f.user_id = ")
                .push_bind(viewer.user_id)
                .push(")");
        }
        if filter.is_in_shopping_cart {
            query_builder
                .push(" AND EXISTS (SELECT 1 FROM shopping_carts c WHERE c.recipe_id = r.id AND c.user_id = ")
                .push_bind(viewer.user_id)
                .push(")");
        }
    }
    query_builder
        .push(" ORDER BY r.pub_date DESC, r.id DESC LIMIT ")
        .push_bind(query.limit)
        .push(" OFFSET ")
        .push_bind(query.offset());

    let rows: Vec<RecipeRow> = query_builder
        .build_query_as()
        .fetch_all(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    let total_count = rows.first().map(|r| r.count).unwrap_or(0);
    let recipes = rows.into_iter().map(|r| r.recipe).collect();
    let rows = hydrate(recipes, viewer, pool).await?;

    Ok(PageContext::from_rows(rows, total_count, query))
}

async fn viewer_recipe_set(
    table: &str,
    user_id: Uuid,
    ids: &[Uuid],
    pool: &Pool<Postgres>,
) -> Result<HashSet<Uuid>, potion::Error> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(&format!(
        "SELECT recipe_id FROM {table} WHERE user_id = $1 AND recipe_id = ANY($2)"
    ))
    .bind(user_id)
    .bind(ids)
    .fetch_all(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}

/// Attaches tags, ingredients, author and viewer flags, keeping the input order.
async fn hydrate(
    recipes: Vec<Recipe>,
    viewer: Option<&SessionData>,
    pool: &Pool<Postgres>,
) -> Result<Vec<RecipeDetail>, potion::Error> {
    if recipes.is_empty() {
        return Ok(vec![]);
    }
    let ids: Vec<Uuid> = recipes.iter().map(|r| r.id).collect();
    let author_ids: Vec<Uuid> = recipes.iter().map(|r| r.author_id).collect();
    let viewer_id = viewer.map(|v| v.user_id);

    let tags: Vec<LinkedRecipeTag> = sqlx::query_as(
        "
        SELECT rt.recipe_id, t.id, t.name, t.slug
        FROM recipe_tags rt
        INNER JOIN tags t ON t.id = rt.tag_id
        WHERE rt.recipe_id = ANY($1)
        ORDER BY t.name, t.id
    ",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    let ingredients: Vec<RecipeIngredient> = sqlx::query_as(
        "
        SELECT ri.recipe_id, i.id, i.name, i.measurement_unit, ri.amount
        FROM recipe_ingredients ri
        INNER JOIN ingredients i ON i.id = ri.ingredient_id
        WHERE ri.recipe_id = ANY($1)
        ORDER BY ri.id
    ",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    let authors: Vec<UserProfile> = sqlx::query_as(&format!(
        "SELECT {PROFILE_COLUMNS} FROM users u WHERE u.id = ANY($2)"
    ))
    .bind(viewer_id)
    .bind(&author_ids)
    .fetch_all(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    let (favorites, cart) = match viewer_id {
        Some(user_id) => (
            viewer_recipe_set("favorites", user_id, &ids, pool).await?,
            viewer_recipe_set("shopping_carts", user_id, &ids, pool).await?,
        ),
        None => (HashSet::new(), HashSet::new()),
    };

    let mut tag_map: HashMap<Uuid, Vec<Tag>> = HashMap::new();
    for row in tags {
        tag_map.entry(row.recipe_id).or_default().push(row.tag);
    }
    let mut ingredient_map: HashMap<Uuid, Vec<RecipeIngredient>> = HashMap::new();
    for row in ingredients {
        ingredient_map.entry(row.recipe_id).or_default().push(row);
    }
    let authors: HashMap<Uuid, UserProfile> = authors.into_iter().map(|a| (a.id, a)).collect();

    let mut list = Vec::with_capacity(recipes.len());
    for recipe in recipes {
        let author = authors.get(&recipe.author_id).cloned().ok_or_else(|| {
            log::error!("Author {} of recipe {} is missing", recipe.author_id, recipe.id);
            HtmlError::InternalServerError.new("Recipe author missing")
        })?;

        list.push(RecipeDetail {
            id: recipe.id,
            tags: tag_map.remove(&recipe.id).unwrap_or_default(),
            author,
            ingredients: ingredient_map.remove(&recipe.id).unwrap_or_default(),
            is_favorited: favorites.contains(&recipe.id),
            is_in_shopping_cart: cart.contains(&recipe.id),
            name: recipe.name,
            image: recipe.image,
            text: recipe.text,
            cooking_time: recipe.cooking_time,
            pub_date: recipe.pub_date,
        });
    }

    Ok(list)
}

async fn check_references(
    payload: &RecipePayload,
    pool: &Pool<Postgres>,
) -> Result<(), potion::Error> {
    let tags = missing_tags(&payload.tags, pool).await?;
    if !tags.is_empty() {
        return Err(HtmlError::InvalidRequest.new(&format!("Unknown tags: {tags:?}")));
    }

    let ingredients = missing_ingredients(&payload.ingredient_ids(), pool).await?;
    if !ingredients.is_empty() {
        return Err(HtmlError::InvalidRequest.new(&format!("Unknown ingredients: {ingredients:?}")));
    }
    Ok(())
}

async fn insert_links(
    recipe_id: Uuid,
    payload: &RecipePayload,
    conn: &mut PgConnection,
) -> Result<(), potion::Error> {
    let mut query_builder: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO recipe_tags (recipe_id, tag_id) ");
    query_builder.push_values(&payload.tags, |mut b, tag_id| {
        b.push_bind(recipe_id).push_bind(*tag_id);
    });
    query_builder
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    let mut query_builder: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO recipe_ingredients (recipe_id, ingredient_id, amount) ");
    query_builder.push_values(&payload.ingredients, |mut b, item| {
        b.push_bind(recipe_id)
            .push_bind(item.id)
            .push_bind(item.amount);
    });
    query_builder
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    Ok(())
}

async fn insert_recipe(
    author_id: Uuid,
    image: &str,
    payload: &RecipePayload,
    pool: &Pool<Postgres>,
) -> Result<Uuid, potion::Error> {
    let mut tr = pool.begin().await.map_err(|e| QueryError::from(e).into())?;

    let id: (Uuid,) = sqlx::query_as(
        "
        INSERT INTO recipes (author_id, name, image, text, cooking_time)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
    ",
    )
    .bind(author_id)
    .bind(payload.name.trim())
    .bind(image)
    .bind(&payload.text)
    .bind(payload.cooking_time)
    .fetch_one(&mut *tr)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    insert_links(id.0, payload, &mut tr).await?;
    tr.commit().await.map_err(|e| QueryError::from(e).into())?;

    Ok(id.0)
}

async fn replace_recipe(
    id: Uuid,
    image: &str,
    payload: &RecipePayload,
    pool: &Pool<Postgres>,
) -> Result<(), potion::Error> {
    let mut tr = pool.begin().await.map_err(|e| QueryError::from(e).into())?;

    sqlx::query("UPDATE recipes SET name = $2, image = $3, text = $4, cooking_time = $5 WHERE id = $1")
        .bind(id)
        .bind(payload.name.trim())
        .bind(image)
        .bind(&payload.text)
        .bind(payload.cooking_time)
        .execute(&mut *tr)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    sqlx::query("DELETE FROM recipe_tags WHERE recipe_id = $1")
        .bind(id)
        .execute(&mut *tr)
        .await
        .map_err(|e| QueryError::from(e).into())?;
    sqlx::query("DELETE FROM recipe_ingredients WHERE recipe_id = $1")
        .bind(id)
        .execute(&mut *tr)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    insert_links(id, payload, &mut tr).await?;
    tr.commit().await.map_err(|e| QueryError::from(e).into())?;

    Ok(())
}

pub async fn create_recipe(
    session: &SessionData,
    payload: RecipePayload,
    media: &MediaStore,
    pool: &Pool<Postgres>,
) -> Result<RecipeDetail, potion::Error> {
    session.authenticate(ActionType::CreateRecipes)?;
    payload.validate().map_err(|e| e.into())?;
    check_references(&payload, pool).await?;

    let image = media
        .save_image(RECIPE_IMAGE_DIR, &payload.image, None)
        .await?;
    let id = match insert_recipe(session.user_id, &image, &payload, pool).await {
        Ok(id) => id,
        Err(e) => {
            media.delete(&image).await;
            return Err(e);
        }
    };

    log::info!("User {} created recipe {}", session.user_id, id);
    get_recipe_detail(id, Some(session), pool).await
}

/// Replaces every field, tag and ingredient amount of the recipe.
pub async fn update_recipe(
    id: Uuid,
    session: &SessionData,
    payload: RecipePayload,
    media: &MediaStore,
    pool: &Pool<Postgres>,
    cache: &mut MultiplexedConnection,
) -> Result<RecipeDetail, potion::Error> {
    let recipe = get_recipe_mut(id, session, pool).await?;
    payload.validate().map_err(|e| e.into())?;
    check_references(&payload, pool).await?;

    let image = media
        .save_image(RECIPE_IMAGE_DIR, &payload.image, Some(recipe.image.as_str()))
        .await?;
    if let Err(e) = replace_recipe(id, &image, &payload, pool).await {
        if image != recipe.image {
            media.delete(&image).await;
        }
        return Err(e);
    }
    if image != recipe.image {
        media.delete(&recipe.image).await;
    }

    refresh_cache_bind(CacheLifetime::BindRecipeCache, cache).await?;
    log::info!("User {} updated recipe {}", session.user_id, id);
    get_recipe_detail(id, Some(session), pool).await
}

pub async fn delete_recipe(
    id: Uuid,
    session: &SessionData,
    media: &MediaStore,
    pool: &Pool<Postgres>,
    cache: &mut MultiplexedConnection,
) -> Result<(), potion::Error> {
    let recipe = get_recipe_mut(id, session, pool).await?;

    sqlx::query("DELETE FROM recipes WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    media.delete(&recipe.image).await;
    refresh_cache_bind(CacheLifetime::BindRecipeCache, cache).await?;
    log::info!("User {} deleted recipe {}", session.user_id, id);
    Ok(())
}

pub fn short_link(public_url: &str, id: Uuid) -> String {
    format!(
        "{}{}{}/",
        public_url.trim_end_matches('/'),
        SHORT_LINK_PREFIX,
        id
    )
}

pub async fn recipe_short_link(
    id: Uuid,
    public_url: &str,
    pool: &Pool<Postgres>,
) -> Result<String, potion::Error> {
    let recipe = get_recipe(id, pool).await?;

    Ok(short_link(public_url, recipe.id))
}

#[cfg(test)]
mod tests {
    use sqlx::PgPool;

    use super::*;
    use crate::validation::IngredientAmount;

    #[test]
    fn short_links() {
        assert_eq!(short_link("https://foodgram.example", 12), "https://foodgram.example/r/12/");
        assert_eq!(short_link("http://localhost/", 3), "http://localhost/r/3/");
    }

    async fn insert_id(pool: &PgPool, sql: &str) -> Uuid {
        let (id,): (Uuid,) = sqlx::query_as(sql).fetch_one(pool).await.unwrap();
        id
    }

    struct Fixture {
        author: Uuid,
        tags: [Uuid; 2],
        ingredients: [Uuid; 2],
    }

    async fn fixture(pool: &PgPool) -> Fixture {
        let author = insert_id(
            pool,
            "INSERT INTO users (email, username, first_name, last_name, password) \
             VALUES ('cook@example.com', 'cook', 'Anna', 'Smith', 'x') RETURNING id",
        )
        .await;

        Fixture {
            author,
            tags: [
                insert_id(pool, "INSERT INTO tags (name, slug) VALUES ('Breakfast', 'breakfast') RETURNING id").await,
                insert_id(pool, "INSERT INTO tags (name, slug) VALUES ('Dinner', 'dinner') RETURNING id").await,
            ],
            ingredients: [
                insert_id(pool, "INSERT INTO ingredients (name, measurement_unit) VALUES ('egg', 'pcs') RETURNING id").await,
                insert_id(pool, "INSERT INTO ingredients (name, measurement_unit) VALUES ('milk', 'ml') RETURNING id").await,
            ],
        }
    }

    fn payload(tags: Vec<Uuid>, ingredients: Vec<(Uuid, i32)>) -> RecipePayload {
        RecipePayload {
            name: "Omelette".to_string(),
            text: "Whisk and fry".to_string(),
            image: String::new(),
            cooking_time: 10,
            tags,
            ingredients: ingredients
                .into_iter()
                .map(|(id, amount)| IngredientAmount { id, amount })
                .collect(),
        }
    }

    async fn links(id: Uuid, pool: &PgPool) -> (Vec<Uuid>, Vec<(Uuid, i32)>) {
        let tags: Vec<(Uuid,)> =
            sqlx::query_as("SELECT tag_id FROM recipe_tags WHERE recipe_id = $1 ORDER BY tag_id")
                .bind(id)
                .fetch_all(pool)
                .await
                .unwrap();
        let ingredients: Vec<(Uuid, i32)> = sqlx::query_as(
            "SELECT ingredient_id, amount FROM recipe_ingredients WHERE recipe_id = $1 ORDER BY ingredient_id",
        )
        .bind(id)
        .fetch_all(pool)
        .await
        .unwrap();

        (tags.into_iter().map(|t| t.0).collect(), ingredients)
    }

    async fn count(pool: &PgPool, table: &str) -> i64 {
        let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .unwrap();
        n
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn update_replaces_every_link(pool: PgPool) {
        let f = fixture(&pool).await;
        let [breakfast, dinner] = f.tags;
        let [egg, milk] = f.ingredients;

        let created = payload(vec![breakfast], vec![(egg, 2), (milk, 100)]);
        let id = insert_recipe(f.author, "/media/a.png", &created, &pool)
            .await
            .ok()
            .unwrap();
        assert_eq!(links(id, &pool).await, (vec![breakfast], vec![(egg, 2), (milk, 100)]));

        let updated = payload(vec![dinner], vec![(milk, 250)]);
        replace_recipe(id, "/media/b.png", &updated, &pool)
            .await
            .ok()
            .unwrap();

        assert_eq!(links(id, &pool).await, (vec![dinner], vec![(milk, 250)]));
        let recipe = get_recipe(id, &pool).await.ok().unwrap();
        assert_eq!(recipe.image, "/media/b.png");
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn failed_create_leaves_nothing_behind(pool: PgPool) {
        let f = fixture(&pool).await;
        let [breakfast, _] = f.tags;
        let [egg, _] = f.ingredients;

        let broken = payload(vec![breakfast], vec![(egg, 2), (egg + 1000, 1)]);
        assert!(insert_recipe(f.author, "/media/a.png", &broken, &pool)
            .await
            .is_err());

        assert_eq!(count(&pool, "recipes").await, 0);
        assert_eq!(count(&pool, "recipe_tags").await, 0);
        assert_eq!(count(&pool, "recipe_ingredients").await, 0);
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn failed_update_keeps_old_links(pool: PgPool) {
        let f = fixture(&pool).await;
        let [breakfast, dinner] = f.tags;
        let [egg, milk] = f.ingredients;

        let created = payload(vec![breakfast], vec![(egg, 2)]);
        let id = insert_recipe(f.author, "/media/a.png", &created, &pool)
            .await
            .ok()
            .unwrap();

        let broken = payload(vec![dinner], vec![(milk, 100), (milk + 1000, 1)]);
        assert!(replace_recipe(id, "/media/b.png", &broken, &pool).await.is_err());

        assert_eq!(links(id, &pool).await, (vec![breakfast], vec![(egg, 2)]));
        assert_eq!(get_recipe(id, &pool).await.ok().unwrap().image, "/media/a.png");
    }
}
