use std::fmt::{self, Display};

use potion::{Error, HtmlError};
use thiserror::Error as ThisError;
use warp::reject::Rejection;

use crate::constants::{
    EMAIL_LENGTH, MAX_AMOUNT, MAX_COOKING_TIME, MIN_AMOUNT, MIN_COOKING_TIME,
};

pub struct QueryError {
    info: String,
    conflict: bool,
}

impl QueryError {
    pub fn new(info: String) -> Self {
        Self {
            info,
            conflict: false,
        }
    }

    /// Constraint violations caused by the request rather than the server.
    pub fn conflict(info: String) -> Self {
        Self {
            info,
            conflict: true,
        }
    }
}

impl From<sqlx::Error> for QueryError {
    fn from(value: sqlx::Error) -> Self {
        match value {
            sqlx::Error::Database(e) => {
                let constraint = e.constraint().unwrap_or("unknown").to_owned();
                if e.is_unique_violation() {
                    Self::conflict(format!("Entry already exists ({constraint})"))
                } else if e.is_foreign_key_violation() {
                    Self::conflict(format!("Referenced entry does not exist ({constraint})"))
                } else if e.is_check_violation() {
                    Self::conflict(format!("Value out of allowed range ({constraint})"))
                } else {
                    Self::new(format!("{e}"))
                }
            }
            sqlx::Error::RowNotFound => Self::new(format!("RowNotFound")),
            sqlx::Error::PoolTimedOut => Self::new(format!("Pool timed out")),
            sqlx::Error::PoolClosed => Self::new(format!("Pool closed")),
            sqlx::Error::ColumnNotFound(e) => Self::new(format!("Column not found: {e}")),
            sqlx::Error::ColumnDecode { index, source } => {
                Self::new(format!("Column decode {index} ({source})"))
            }
            sqlx::Error::Migrate(e) => Self::new(format!("{e}")),
            e => Self::new(format!("{e}")),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for QueryError {
    fn from(value: sqlx::migrate::MigrateError) -> Self {
        Self::new(format!("Migration failed: {value}"))
    }
}

impl Into<Error> for QueryError {
    fn into(self) -> Error {
        if self.conflict {
            return HtmlError::InvalidRequest.new(&self.info);
        }
        Error {
            code: 500,
            info: Some(self.info),
            redirect: None,
        }
    }
}

pub struct CacheError {
    info: String,
}

impl From<redis::RedisError> for CacheError {
    fn from(value: redis::RedisError) -> Self {
        Self {
            info: format!("{:?} - {:?}", value.code(), value.detail()),
        }
    }
}

impl CacheError {
    pub fn new(info: String) -> Self {
        Self { info }
    }
}

impl Into<Error> for CacheError {
    fn into(self) -> Error {
        Error {
            code: 500,
            info: Some(self.info),
            redirect: None,
        }
    }
}

#[derive(Debug)]
pub struct TypeError {
    info: String,
}

impl TypeError {
    pub fn new(info: &str) -> Self {
        Self {
            info: info.to_string(),
        }
    }

    pub fn field(key: &str, info: &str) -> Self {
        Self {
            info: format!("{key}: {info}"),
        }
    }
}

impl Into<potion::Error> for TypeError {
    fn into(self) -> potion::Error {
        HtmlError::InvalidRequest.new(&self.info)
    }
}

impl Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.info)
    }
}

impl std::error::Error for TypeError {}
impl Into<Rejection> for TypeError {
    fn into(self) -> Rejection {
        HtmlError::InvalidRequest.new(&self.info).into()
    }
}

/// Payload rules that can be checked without touching the database.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Field '{0}' may not be empty")]
    EmptyField(&'static str),

    #[error("Field '{field}' may not be longer than {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("Cooking time must be between {min} and {max} minutes, got {0}", min = MIN_COOKING_TIME, max = MAX_COOKING_TIME)]
    CookingTimeOutOfRange(i32),

    #[error("A recipe needs at least one tag")]
    NoTags,

    #[error("Tags must be unique, tag {0} is listed twice")]
    DuplicateTag(i32),

    #[error("A recipe needs at least one ingredient")]
    NoIngredients,

    #[error("Ingredients must be unique, ingredient {0} is listed twice")]
    DuplicateIngredient(i32),

    #[error("Amount of ingredient {ingredient} must be between {min} and {max}, got {amount}", min = MIN_AMOUNT, max = MAX_AMOUNT)]
    AmountOutOfRange { ingredient: i32, amount: i32 },

    #[error("Username '{0}' contains characters other than letters, digits and @/./+/-/_")]
    InvalidUsername(String),

    #[error("Username '{0}' is reserved")]
    ForbiddenUsername(String),

    #[error("'{0}' is not a valid email address (at most {max} characters)", max = EMAIL_LENGTH)]
    InvalidEmail(String),

    #[error("Slug '{0}' may only contain latin letters, digits, '-' and '_'")]
    InvalidSlug(String),

    #[error("Invalid image: {0}")]
    InvalidImage(&'static str),

    #[error("Invalid recipes_limit '{0}'")]
    InvalidLimit(String),

    #[error("Invalid {field} '{value}'")]
    InvalidPage { field: &'static str, value: String },

    #[error("Invalid filter {field} '{value}'")]
    InvalidFilter { field: &'static str, value: String },

    #[error("You can not subscribe to yourself")]
    SelfFollow,

    #[error("Line {line}: {info}")]
    InvalidImportLine { line: usize, info: String },
}

impl Into<potion::Error> for ValidationError {
    fn into(self) -> potion::Error {
        HtmlError::InvalidRequest.new(&self.to_string())
    }
}

pub fn not_found(what: &str) -> Error {
    Error {
        code: 404,
        info: Some(format!("{what} not found")),
        redirect: None,
    }
}
