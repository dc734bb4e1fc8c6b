use potion::HtmlError;
use redis::aio::MultiplexedConnection;
use sqlx::{Pool, Postgres, QueryBuilder};

use crate::{
    authentication::{jwt::SessionData, permissions::ActionType},
    cache::cache::{refresh_cache_bind, CacheKeyType, CacheLifetime, RedisValue},
    constants::INGREDIENT_FIELD_LENGTH,
    error::{not_found, QueryError, ValidationError},
    schema::{Ingredient, NewIngredient, Uuid},
};

// Three binds per row
const IMPORT_CHUNK_SIZE: usize = 65535 / 3;

/// `LIKE` pattern matching values that start with `prefix`.
pub fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.trim().chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn check_field(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::EmptyField(field));
    }
    if value.chars().count() > INGREDIENT_FIELD_LENGTH {
        return Err(ValidationError::TooLong {
            field,
            max: INGREDIENT_FIELD_LENGTH,
        });
    }
    Ok(())
}

pub async fn create_ingredient(
    session: &SessionData,
    name: &str,
    measurement_unit: &str,
    pool: &Pool<Postgres>,
    cache: &mut MultiplexedConnection,
) -> Result<Ingredient, potion::Error> {
    session.authenticate(ActionType::ManageIngredients)?;
    let (name, measurement_unit) = (name.trim(), measurement_unit.trim());
    check_field("name", name).map_err(|e| e.into())?;
    check_field("measurement_unit", measurement_unit).map_err(|e| e.into())?;

    let ingredient: Option<Ingredient> = sqlx::query_as(
        "INSERT INTO ingredients (name, measurement_unit) VALUES ($1, $2) ON CONFLICT DO NOTHING RETURNING *",
    )
    .bind(name)
    .bind(measurement_unit)
    .fetch_optional(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    let ingredient = match ingredient {
        Some(ingredient) => ingredient,
        None => return Err(HtmlError::InvalidRequest.new("Ingredient already exists")),
    };

    refresh_cache_bind(CacheLifetime::BindIngredientCache, cache).await?;
    log::info!("Created ingredient {} ({})", ingredient.name, ingredient.id);
    Ok(ingredient)
}

pub async fn get_ingredient(id: Uuid, pool: &Pool<Postgres>) -> Result<Ingredient, potion::Error> {
    let row: Option<Ingredient> = sqlx::query_as("SELECT * FROM ingredients WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    row.ok_or_else(|| not_found("Ingredient"))
}

/// Ingredients whose name starts with `name_prefix`, ignoring case.
pub async fn list_ingredients(
    name_prefix: Option<&str>,
    pool: &Pool<Postgres>,
) -> Result<Vec<Ingredient>, potion::Error> {
    let pattern = like_prefix(name_prefix.unwrap_or_default());

    let rows: Vec<Ingredient> = sqlx::query_as(
        "SELECT * FROM ingredients WHERE LOWER(name) LIKE LOWER($1) ORDER BY LOWER(name), measurement_unit, id",
    )
    .bind(pattern)
    .fetch_all(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    Ok(rows)
}

pub async fn list_ingredients_cached(
    name_prefix: Option<&str>,
    pool: &Pool<Postgres>,
    cache: &mut MultiplexedConnection,
) -> Result<Vec<Ingredient>, potion::Error> {
    let prefix = name_prefix.unwrap_or_default().trim().to_string();
    let key = CacheKeyType::Ingredients.new(prefix.clone());
    let pool = pool.clone();

    let list = RedisValue::get_or_list(key, cache, move || async move {
        list_ingredients(Some(&prefix), &pool).await
    })
    .await?;

    Ok(list.value)
}

/// Inserts every new (name, unit) pair in one transaction and returns how many were added.
pub async fn import_ingredients(
    session: &SessionData,
    items: Vec<NewIngredient>,
    pool: &Pool<Postgres>,
    cache: &mut MultiplexedConnection,
) -> Result<u64, potion::Error> {
    session.authenticate(ActionType::ManageIngredients)?;
    if items.is_empty() {
        return Ok(0);
    }

    let mut tr = pool.begin().await.map_err(|e| QueryError::from(e).into())?;
    let mut inserted = 0;

    for chunk in items.chunks(IMPORT_CHUNK_SIZE) {
        let mut query_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO ingredients (name, measurement_unit) ");

        query_builder.push_values(chunk, |mut b, item| {
            b.push_bind(&item.name).push_bind(&item.measurement_unit);
        });
        query_builder.push(" ON CONFLICT DO NOTHING");

        let query = query_builder
            .build()
            .execute(&mut *tr)
            .await
            .map_err(|e| QueryError::from(e).into())?;
        inserted += query.rows_affected();
    }

    tr.commit().await.map_err(|e| QueryError::from(e).into())?;
    refresh_cache_bind(CacheLifetime::BindIngredientCache, cache).await?;

    log::info!("Imported {inserted} of {} ingredients", items.len());
    Ok(inserted)
}

/// Ids from `ids` that have no ingredient row.
pub(crate) async fn missing_ingredients(
    ids: &[Uuid],
    pool: &Pool<Postgres>,
) -> Result<Vec<Uuid>, potion::Error> {
    let found: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM ingredients WHERE id = ANY($1)")
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

#[cfg(test)]
mod tests {
    use sqlx::PgPool;

    use super::*;

    #[test]
    fn prefix_pattern_escapes_wildcards() {
        assert_eq!(like_prefix("сах"), "сах%");
        assert_eq!(like_prefix(" 100%_rye\\ "), "100\\%\\_rye\\\\%");
        assert_eq!(like_prefix(""), "%");
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn prefix_search_ignores_case(pool: PgPool) {
        sqlx::query(
            "INSERT INTO ingredients (name, measurement_unit) \
             VALUES ('Sugar', 'g'), ('sugar syrup', 'ml'), ('salt', 'g'), ('100%_rye', 'g')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let found = list_ingredients(Some("SUG"), &pool).await.ok().unwrap();
        let names: Vec<&str> = found.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Sugar", "sugar syrup"]);

        let found = list_ingredients(Some("100%_"), &pool).await.ok().unwrap();
        assert_eq!(found.len(), 1);
        assert!(list_ingredients(Some("1%"), &pool).await.ok().unwrap().is_empty());
    }
}
