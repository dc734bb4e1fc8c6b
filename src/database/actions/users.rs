use potion::HtmlError;
use sqlx::{Pool, Postgres};

use crate::{
    authentication::{
        cryptography::{hash_password, verify_password},
        jwt::{generate_jwt_session, SessionData},
    },
    constants::AVATAR_DIR,
    error::{not_found, QueryError},
    media::MediaStore,
    pagination::{PageContext, PageQuery},
    schema::{User, UserProfile, UserProfileRow, Uuid},
    validation::{validate_password, NewUser},
};

/// Public user columns as seen by the viewer bound to `$1`.
pub(crate) const PROFILE_COLUMNS: &str = "u.id, u.email, u.username, u.first_name, u.last_name, u.avatar, \
    EXISTS(SELECT 1 FROM follows f WHERE f.author_id = u.id AND f.user_id = $1) AS is_subscribed";

fn hashing_error(e: argon2::password_hash::Error) -> potion::Error {
    log::error!("Password hashing failed: {e}");
    HtmlError::InternalServerError.new("Password hashing failed")
}

pub async fn get_user_by_id(
    pool: &Pool<Postgres>,
    user_id: Uuid,
) -> Result<Option<User>, potion::Error> {
    let row: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&*pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    Ok(row)
}

pub async fn get_user_by_email(
    pool: &Pool<Postgres>,
    email: &str,
) -> Result<Option<User>, potion::Error> {
    let row: Option<User> = sqlx::query_as("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
        .bind(email.trim())
        .fetch_optional(&*pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    Ok(row)
}

/// Creates a user with the hashed version of their password.
pub async fn register_user(
    user: NewUser,
    pool: &Pool<Postgres>,
) -> Result<UserProfile, potion::Error> {
    user.validate().map_err(|e| e.into())?;
    let password = hash_password(&user.password).map_err(hashing_error)?;

    let taken: Option<(String,)> = sqlx::query_as(
        "SELECT username FROM users WHERE LOWER(email) = LOWER($1) OR username = $2 LIMIT 1",
    )
    .bind(&user.email)
    .bind(&user.username)
    .fetch_optional(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;
    if taken.is_some() {
        return Err(HtmlError::InvalidRequest.new("Email or username is already taken"));
    }

    let created: UserProfile = sqlx::query_as(
        "
        INSERT INTO users (email, username, first_name, last_name, password)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, email, username, first_name, last_name, avatar, FALSE AS is_subscribed
    ",
    )
    .bind(user.email.trim())
    .bind(&user.username)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(password)
    .fetch_one(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    log::info!("Registered user {} ({})", created.username, created.id);
    Ok(created)
}

/// Returns a signed session token for valid credentials.
pub async fn login_user(
    email: &str,
    password: &str,
    secret: &str,
    lifetime_hours: i64,
    pool: &Pool<Postgres>,
) -> Result<String, potion::Error> {
    let user = match get_user_by_email(pool, email).await? {
        Some(user) => user,
        None => return Err(HtmlError::InvalidRequest.new("Invalid credentials")),
    };

    let authenticated = verify_password(password, &user.password).map_err(hashing_error)?;
    if !authenticated {
        log::debug!("Failed login for user {}", user.id);
        return Err(HtmlError::InvalidRequest.new("Invalid credentials"));
    }

    generate_jwt_session(&user, secret, lifetime_hours)
}

pub async fn get_user_profile(
    user_id: Uuid,
    viewer: Option<&SessionData>,
    pool: &Pool<Postgres>,
) -> Result<UserProfile, potion::Error> {
    let row: Option<UserProfile> = sqlx::query_as(&format!(
        "SELECT {PROFILE_COLUMNS} FROM users u WHERE u.id = $2"
    ))
    .bind(viewer.map(|s| s.user_id))
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    row.ok_or_else(|| not_found("User"))
}

pub async fn list_users(
    viewer: Option<&SessionData>,
    query: PageQuery,
    pool: &Pool<Postgres>,
) -> Result<PageContext<UserProfile>, potion::Error> {
    let rows: Vec<UserProfileRow> = sqlx::query_as(&format!(
        "
        SELECT {PROFILE_COLUMNS}, COUNT(*) OVER() AS count
        FROM users u
        ORDER BY u.username, u.id
        LIMIT $2 OFFSET $3
    "
    ))
    .bind(viewer.map(|s| s.user_id))
    .bind(query.limit)
    .bind(query.offset())
    .fetch_all(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    let count = rows.first().map(|r| r.count).unwrap_or(0);
    let rows = rows.into_iter().map(|r| r.profile).collect();

    Ok(PageContext::from_rows(rows, count, query))
}

pub async fn set_password(
    session: &SessionData,
    current_password: &str,
    new_password: &str,
    pool: &Pool<Postgres>,
) -> Result<(), potion::Error> {
    validate_password(new_password).map_err(|e| e.into())?;

    let user = get_user_by_id(pool, session.user_id)
        .await?
        .ok_or_else(|| not_found("User"))?;
    if !verify_password(current_password, &user.password).map_err(hashing_error)? {
        return Err(HtmlError::InvalidRequest.new("Current password is incorrect"));
    }

    let password = hash_password(new_password).map_err(hashing_error)?;
    sqlx::query("UPDATE users SET password = $2 WHERE id = $1")
        .bind(user.id)
        .bind(password)
        .execute(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    log::info!("User {} changed their password", user.id);
    Ok(())
}

/// Stores a new avatar from a data URI and returns its URL.
pub async fn set_avatar(
    session: &SessionData,
    image: &str,
    media: &MediaStore,
    pool: &Pool<Postgres>,
) -> Result<String, potion::Error> {
    let user = get_user_by_id(pool, session.user_id)
        .await?
        .ok_or_else(|| not_found("User"))?;
    let url = media
        .save_image(AVATAR_DIR, image, user.avatar.as_deref())
        .await?;

    sqlx::query("UPDATE users SET avatar = $2 WHERE id = $1")
        .bind(user.id)
        .bind(&url)
        .execute(pool)
        .await
        .map_err(|e| QueryError::from(e).into())?;

    if let Some(old) = user.avatar.filter(|old| old != &url) {
        media.delete(&old).await;
    }
    Ok(url)
}

pub async fn delete_avatar(
    session: &SessionData,
    media: &MediaStore,
    pool: &Pool<Postgres>,
) -> Result<(), potion::Error> {
    let old: Option<(Option<String>,)> = sqlx::query_as(
        "UPDATE users u SET avatar = NULL FROM users old WHERE u.id = $1 AND old.id = u.id RETURNING old.avatar",
    )
    .bind(session.user_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| QueryError::from(e).into())?;

    match old {
        None => Err(not_found("User")),
        Some((avatar,)) => {
            if let Some(avatar) = avatar {
                media.delete(&avatar).await;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use sqlx::PgPool;

    use super::*;

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL"]
    async fn users_are_listed_by_username(pool: PgPool) {
        for name in ["zoe", "anna", "mika"] {
            sqlx::query(
                "INSERT INTO users (email, username, first_name, last_name, password) \
                 VALUES ($1, $2, 'First', 'Last', 'x')",
            )
            .bind(format!("{name}@example.com"))
            .bind(name)
            .execute(&pool)
            .await
            .unwrap();
        }

        let page = list_users(None, PageQuery::new(1, 2), &pool)
            .await
            .ok()
            .unwrap();
        let names: Vec<&str> = page.rows.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["anna", "mika"]);
        assert_eq!(page.total_rows, 3);

        let page = list_users(None, PageQuery::new(2, 2), &pool)
            .await
            .ok()
            .unwrap();
        assert_eq!(page.rows[0].username, "zoe");
    }
}
