use chrono::Duration;
use chrono::Local;
use hmac::{Hmac, Mac};
use jwt::SignWithKey;
use jwt::VerifyWithKey;
use potion::HtmlError;
use serde::Deserialize;
use serde::Serialize;
use sha2::Sha256;

use crate::database::schema::User;
use crate::schema::{UserRole, Uuid};

use super::permissions::ActionType;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtSessionData {
    pub user_id: Uuid,
    pub email: String,
    pub role: UserRole,
    iat: i64,
    exp: i64,
}

impl JwtSessionData {
    pub fn new(id: Uuid, email: String, role: UserRole, lifetime_hours: i64) -> Self {
        let now = Local::now();
        let iat = now.timestamp();
        let exp = (now + Duration::hours(lifetime_hours)).timestamp();

        Self {
            user_id: id,
            email,
            role,
            iat,
            exp,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionData {
    pub user_id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub is_admin: bool,
}

impl SessionData {
    pub fn authenticate(&self, action: ActionType) -> Result<(), potion::Error> {
        if !action.authenticate(self) {
            return Err(
                HtmlError::Unauthorized.new("You don't have permission to perform this action")
            );
        }
        Ok(())
    }

    /// Owners may touch their own rows; `all` widens that to everyone's rows.
    pub fn authenticate_owner(
        &self,
        owner_id: Uuid,
        own: ActionType,
        all: ActionType,
    ) -> Result<(), potion::Error> {
        if all.authenticate(self) {
            return Ok(());
        }
        self.authenticate(own)?;
        if owner_id != self.user_id {
            return Err(HtmlError::Unauthorized.default());
        }
        Ok(())
    }
}

impl From<JwtSessionData> for SessionData {
    fn from(value: JwtSessionData) -> Self {
        SessionData {
            user_id: value.user_id,
            email: value.email,
            is_admin: value.role == UserRole::Admin,
            role: value.role,
        }
    }
}

fn signing_key(secret: &str) -> Result<Hmac<Sha256>, potion::Error> {
    Hmac::new_from_slice(secret.as_bytes()).map_err(|_| {
        log::error!("Invalid session signing key");
        HtmlError::InternalServerError.new("Invalid session signing key")
    })
}

fn sign_session(claims: &JwtSessionData, secret: &str) -> Result<String, potion::Error> {
    let key = signing_key(secret)?;

    claims.sign_with_key(&key).map_err(|e| {
        log::error!("Failed to sign session: {e}");
        HtmlError::InternalServerError.new("Failed to sign session")
    })
}

pub fn generate_jwt_session(
    user: &User,
    secret: &str,
    lifetime_hours: i64,
) -> Result<String, potion::Error> {
    let claims = JwtSessionData::new(
        user.id,
        user.email.to_owned(),
        user.role.to_owned(),
        lifetime_hours,
    );

    sign_session(&claims, secret)
}

pub fn verify_jwt_session(token: &str, secret: &str) -> Result<JwtSessionData, potion::Error> {
    let key = signing_key(secret)?;

    let session: JwtSessionData = token
        .verify_with_key(&key)
        .map_err(|_| HtmlError::InvalidSession.new("Invalid Session; Invalid token"))?;

    let now = Local::now().timestamp();
    if (session.exp - now).is_negative() {
        return Err(HtmlError::InvalidSession.new("Invalid session; Token expired"));
    }
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: 42,
            email: "anna@example.com".to_string(),
            username: "anna".to_string(),
            first_name: "Anna".to_string(),
            last_name: "Smith".to_string(),
            password: String::new(),
            avatar: None,
            role: UserRole::User,
        }
    }

    #[test]
    fn issued_token_verifies() {
        let token = generate_jwt_session(&user(), "secret", 1).ok().unwrap();
        let session = verify_jwt_session(&token, "secret").ok().unwrap();

        assert_eq!(session.user_id, 42);
        assert_eq!(session.email, "anna@example.com");

        let session: SessionData = session.into();
        assert!(!session.is_admin);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = generate_jwt_session(&user(), "secret", 1).ok().unwrap();

        assert!(verify_jwt_session(&token, "other").is_err());
        assert!(verify_jwt_session("garbage", "secret").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Local::now().timestamp();
        let claims = JwtSessionData {
            user_id: 42,
            email: "anna@example.com".to_string(),
            role: UserRole::User,
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = sign_session(&claims, "secret").ok().unwrap();

        assert!(verify_jwt_session(&token, "secret").is_err());
    }

    #[test]
    fn owner_checks() {
        let session = SessionData {
            user_id: 1,
            email: "a@b.cd".to_string(),
            role: UserRole::User,
            is_admin: false,
        };

        assert!(session
            .authenticate_owner(1, ActionType::ManageOwnRecipes, ActionType::ManageAllRecipes)
            .is_ok());
        assert!(session
            .authenticate_owner(2, ActionType::ManageOwnRecipes, ActionType::ManageAllRecipes)
            .is_err());

        let admin = SessionData {
            role: UserRole::Admin,
            is_admin: true,
            ..session
        };
        assert!(admin
            .authenticate_owner(2, ActionType::ManageOwnRecipes, ActionType::ManageAllRecipes)
            .is_ok());
    }
}
