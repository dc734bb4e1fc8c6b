pub const RECIPE_COUNT_PER_PAGE: i64 = 6;
pub const MAX_PAGE_SIZE: i64 = 100;

pub const MIN_COOKING_TIME: i32 = 1;
pub const MAX_COOKING_TIME: i32 = 32000;
pub const MIN_AMOUNT: i32 = 1;
pub const MAX_AMOUNT: i32 = 32000;

pub const TAG_FIELD_LENGTH: usize = 32;
pub const INGREDIENT_FIELD_LENGTH: usize = 200;
pub const RECIPE_NAME_LENGTH: usize = 256;
pub const USER_FIELD_LENGTH: usize = 150;
pub const EMAIL_LENGTH: usize = 254;

pub const FORBIDDEN_USERNAMES: &[&str] = &["me"];

pub const USERNAME_PATTERN: &str = r"^[\w.@+-]+$";
pub const SLUG_PATTERN: &str = r"^[-a-zA-Z0-9_]+$";
pub const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

pub const SHOPPING_LIST_FILENAME: &str = "shopping_list.txt";
pub const SHORT_LINK_PREFIX: &str = "/r/";

pub const RECIPE_IMAGE_DIR: &str = "recipes/images";
pub const AVATAR_DIR: &str = "users";

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

/// Seconds a cached query result lives before redis evicts it.
pub const CACHE_EXPIRY_SECONDS: u64 = 60 * 60;
