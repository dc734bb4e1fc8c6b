use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    constants::{
        EMAIL_LENGTH, EMAIL_PATTERN, FORBIDDEN_USERNAMES, MAX_AMOUNT, MAX_COOKING_TIME,
        MIN_AMOUNT, MIN_COOKING_TIME, RECIPE_NAME_LENGTH, SLUG_PATTERN, TAG_FIELD_LENGTH,
        USERNAME_PATTERN, USER_FIELD_LENGTH,
    },
    error::{TypeError, ValidationError},
    form::Form,
    schema::Uuid,
};

fn username_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(USERNAME_PATTERN).expect("static pattern"))
}

fn slug_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(SLUG_PATTERN).expect("static pattern"))
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(EMAIL_PATTERN).expect("static pattern"))
}

fn require(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(field));
    }
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngredientAmount {
    pub id: Uuid,
    pub amount: i32,
}

/// Body of a recipe create or update request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecipePayload {
    pub name: String,
    pub text: String,
    pub image: String,
    pub cooking_time: i32,
    pub tags: Vec<Uuid>,
    pub ingredients: Vec<IngredientAmount>,
}

impl TryFrom<&Form> for RecipePayload {
    type Error = potion::Error;

    fn try_from(form: &Form) -> Result<Self, Self::Error> {
        let ingredients = form
            .get_value::<Vec<Value>>("ingredients")?
            .into_iter()
            .map(|item| -> Result<IngredientAmount, potion::Error> {
                let item = Form::from_value(item)?;
                Ok(IngredientAmount {
                    id: item.get_number("id")?,
                    amount: item.get_number("amount")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: form.get_str("name").map_err(|e| e.into())?,
            text: form.get_str("text").map_err(|e| e.into())?,
            image: form.get_str("image").map_err(|e| e.into())?,
            cooking_time: form.get_number("cooking_time")?,
            tags: form.get_value("tags")?,
            ingredients,
        })
    }
}

impl RecipePayload {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("name", &self.name, RECIPE_NAME_LENGTH)?;
        if self.text.trim().is_empty() {
            return Err(ValidationError::EmptyField("text"));
        }
        if self.image.trim().is_empty() {
            return Err(ValidationError::EmptyField("image"));
        }
        if !(MIN_COOKING_TIME..=MAX_COOKING_TIME).contains(&self.cooking_time) {
            return Err(ValidationError::CookingTimeOutOfRange(self.cooking_time));
        }

        if self.tags.is_empty() {
            return Err(ValidationError::NoTags);
        }
        let mut seen = HashSet::new();
        for tag in &self.tags {
            if !seen.insert(*tag) {
                return Err(ValidationError::DuplicateTag(*tag));
            }
        }

        if self.ingredients.is_empty() {
            return Err(ValidationError::NoIngredients);
        }
        let mut seen = HashSet::new();
        for item in &self.ingredients {
            if !seen.insert(item.id) {
                return Err(ValidationError::DuplicateIngredient(item.id));
            }
            if !(MIN_AMOUNT..=MAX_AMOUNT).contains(&item.amount) {
                return Err(ValidationError::AmountOutOfRange {
                    ingredient: item.id,
                    amount: item.amount,
                });
            }
        }

        Ok(())
    }

    pub fn ingredient_ids(&self) -> Vec<Uuid> {
        self.ingredients.iter().map(|i| i.id).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

impl TryFrom<&Form> for NewUser {
    type Error = TypeError;

    fn try_from(form: &Form) -> Result<Self, Self::Error> {
        Ok(Self {
            email: form.get_str("email")?,
            username: form.get_str("username")?,
            first_name: form.get_str("first_name")?,
            last_name: form.get_str("last_name")?,
            password: form.get_str("password")?,
        })
    }
}

impl NewUser {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_email(&self.email)?;
        validate_username(&self.username)?;
        require("first_name", &self.first_name, USER_FIELD_LENGTH)?;
        require("last_name", &self.last_name, USER_FIELD_LENGTH)?;
        validate_password(&self.password)
    }
}

pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.chars().count() > EMAIL_LENGTH || !email_regex().is_match(email) {
        return Err(ValidationError::InvalidEmail(email.to_string()));
    }
    Ok(())
}

pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    require("username", username, USER_FIELD_LENGTH)?;
    if FORBIDDEN_USERNAMES
        .iter()
        .any(|forbidden| forbidden.eq_ignore_ascii_case(username))
    {
        return Err(ValidationError::ForbiddenUsername(username.to_string()));
    }
    if !username_regex().is_match(username) {
        return Err(ValidationError::InvalidUsername(username.to_string()));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    require("password", password, USER_FIELD_LENGTH)
}

pub fn validate_tag(name: &str, slug: &str) -> Result<(), ValidationError> {
    require("name", name, TAG_FIELD_LENGTH)?;
    require("slug", slug, TAG_FIELD_LENGTH)?;
    if !slug_regex().is_match(slug) {
        return Err(ValidationError::InvalidSlug(slug.to_string()));
    }
    Ok(())
}

pub fn validate_follow(user_id: Uuid, author_id: Uuid) -> Result<(), ValidationError> {
    if user_id == author_id {
        return Err(ValidationError::SelfFollow);
    }
    Ok(())
}

/// `recipes_limit` query parameter of the subscription views. `None` means unlimited.
pub fn parse_recipes_limit(value: Option<&str>) -> Result<Option<i64>, ValidationError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => match v.parse::<i64>() {
            Ok(n) if n >= 0 => Ok(Some(n)),
            _ => Err(ValidationError::InvalidLimit(v.to_string())),
        },
    }
}
