use std::{fmt::Debug, future::Future};

use potion::HtmlError;
use redis::{aio::MultiplexedConnection, AsyncCommands, FromRedisValue, ToRedisArgs};
use redis_macros::{FromRedisValue, ToRedisArgs};
use serde::{Deserialize, Serialize};

use crate::{constants::CACHE_EXPIRY_SECONDS, error::CacheError};

// Caching - keys

#[derive(Serialize, ToRedisArgs, FromRedisValue, Clone, Debug)]
pub struct CacheKey<T: ToString + Serialize> {
    _value: T,
    _type: CacheKeyType,
}

impl<T: ToString + Serialize> CacheKey<T> {
    pub fn from(r#type: CacheKeyType, key: T) -> Self {
        Self {
            _value: key,
            _type: r#type,
        }
    }

    pub fn to_string(&self) -> String {
        self.into()
    }
}

impl<T: ToString + Serialize> Into<String> for &CacheKey<T> {
    fn into(self) -> String {
        match self._type {
            CacheKeyType::Tags => format!("tags-{}", self._value.to_string()),
            CacheKeyType::Ingredients => {
                format!("ingredients-{}", self._value.to_string().to_lowercase())
            }
            CacheKeyType::Recipe => format!("recipe-{}", self._value.to_string()),
            CacheKeyType::Custom(_) => self._value.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum CacheKeyType {
    Tags,
    Ingredients,
    Recipe,
    Custom(String),
}

impl CacheKeyType {
    pub fn new<T: ToString + Serialize>(self, key: T) -> CacheKey<T> {
        CacheKey::from(self, key)
    }
}

impl<T: ToString + Serialize> Into<CacheLifetime> for CacheKey<T> {
    fn into(self) -> CacheLifetime {
        match self._type {
            CacheKeyType::Tags => CacheLifetime::BindTagCache,
            CacheKeyType::Ingredients => CacheLifetime::BindIngredientCache,
            CacheKeyType::Recipe => CacheLifetime::BindRecipeCache,
            CacheKeyType::Custom(value) => CacheLifetime::Custom(value),
        }
    }
}

// Cache - wrappers

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum CacheLifetime {
    Infinite,
    Custom(String),
    BindTagCache,
    BindIngredientCache,
    BindRecipeCache,
}

impl CacheLifetime {
    /// Redis key holding the current bind of this lifetime.
    pub fn bind_key(&self) -> Option<&'static str> {
        match self {
            CacheLifetime::BindTagCache => Some("tag-cache-key"),
            CacheLifetime::BindIngredientCache => Some("ingredient-cache-key"),
            CacheLifetime::BindRecipeCache => Some("recipe-cache-key"),
            CacheLifetime::Infinite | CacheLifetime::Custom(_) => None,
        }
    }

    pub async fn get_cache_bind(
        &self,
        cache: &mut MultiplexedConnection,
    ) -> Result<Option<String>, potion::Error> {
        match self {
            CacheLifetime::Custom(value) => Ok(Some(value.to_owned())),
            _ => match self.bind_key() {
                Some(key) => get_cache_value::<&str, String>(key, cache).await,
                None => Ok(None),
            },
        }
    }

    pub async fn validate_cache_bind(
        &self,
        bind: &Option<String>,
        lifetime: Self,
        cache: &mut MultiplexedConnection,
    ) -> Result<bool, potion::Error> {
        match self {
            CacheLifetime::Custom(value) => match lifetime {
                CacheLifetime::Custom(_value) => Ok(value == &_value),
                _ => {
                    log::error!("Found conflicting bindings");
                    Err(HtmlError::InternalServerError.new("Conflicting cache bindings"))
                }
            },
            _ => Ok(bind == &self.get_cache_bind(cache).await?),
        }
    }
}

#[derive(Serialize, serde::Deserialize, FromRedisValue, ToRedisArgs, Clone)]
pub struct RedisValue<T: serde::Serialize + Send + Sync + Clone> {
    pub value: T,
    _lifetime: CacheLifetime,
    _bind: Option<String>,
}

impl<T: serde::Serialize + Send + Sync + Clone + for<'a> Deserialize<'a>> RedisValue<T> {
    fn new(value: T, lifetime: CacheLifetime, bind: Option<String>) -> Self {
        Self {
            value,
            _lifetime: lifetime,
            _bind: bind,
        }
    }

    /// Cached value under `key`, or the callback's result stored under it.
    /// `None` from the callback is returned without being cached.
    pub async fn get_or_optional<'a, F, Fut, K>(
        key: CacheKey<K>,
        cache: &mut MultiplexedConnection,
        callback: F,
    ) -> Result<Option<RedisValue<T>>, potion::Error>
    where
        K: ToString + Serialize + Clone + Send + Sync,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>, potion::Error>> + Send + 'a,
    {
        if let Some(value) = lookup::<T, K>(&key, cache).await? {
            return Ok(Some(value));
        }

        let lifetime: CacheLifetime = key.to_owned().into();
        let bind = lifetime.get_cache_bind(cache).await?;

        log::trace!("> Fetching {:?}", key.to_string());
        match callback().await? {
            Some(value) => Ok(Some(store(&key, value, bind, cache).await)),
            None => Ok(None),
        }
    }

    pub async fn get_or_list<'a, F, Fut, K>(
        key: CacheKey<K>,
        cache: &mut MultiplexedConnection,
        callback: F,
    ) -> Result<RedisValue<Vec<T>>, potion::Error>
    where
        K: ToString + Serialize + Clone + Send + Sync,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<T>, potion::Error>> + Send + 'a,
    {
        if let Some(value) = lookup::<Vec<T>, K>(&key, cache).await? {
            return Ok(value);
        }

        let lifetime: CacheLifetime = key.to_owned().into();
        let bind = lifetime.get_cache_bind(cache).await?;

        log::trace!("> Fetching {:?}", key.to_string());
        let value = callback().await?;
        Ok(store(&key, value, bind, cache).await)
    }
}

/// Reads `key` and drops it when its bind has moved or it no longer deserializes.
async fn lookup<V, K>(
    key: &CacheKey<K>,
    cache: &mut MultiplexedConnection,
) -> Result<Option<RedisValue<V>>, potion::Error>
where
    V: Serialize + Send + Sync + Clone + for<'a> Deserialize<'a>,
    K: ToString + Serialize + Clone,
{
    let value = match get_cache_value::<String, RedisValue<V>>(key.into(), cache).await {
        Ok(value) => value,
        Err(_) => {
            let mut c = cache.clone();
            let k = key.to_string();
            tokio::spawn(async move {
                log::error!("> Failed to deserialize cached value. Deleting {}", &k);
                if let Err(e) = delete_cache_value(k, &mut c).await {
                    log::error!("> Failed to delete cached value! {e:?}");
                }
            });
            None
        }
    };

    let Some(value) = value else {
        return Ok(None);
    };
    let lifetime: CacheLifetime = key.to_owned().into();
    if value
        ._lifetime
        .validate_cache_bind(&value._bind, lifetime, cache)
        .await?
    {
        log::trace!("> Found {:?}", key.to_string());
        Ok(Some(value))
    } else {
        log::trace!("> Invalidated {:?}", key.to_string());
        if let Err(e) = delete_cache_value(key.to_string(), cache).await {
            log::error!("> Failed to delete invalidated value! {e:?}");
        }
        Ok(None)
    }
}

/// Stores `value` under the bind that was current before it was fetched.
async fn store<V, K>(
    key: &CacheKey<K>,
    value: V,
    bind: Option<String>,
    cache: &mut MultiplexedConnection,
) -> RedisValue<V>
where
    V: Serialize + Send + Sync + Clone + for<'a> Deserialize<'a>,
    K: ToString + Serialize + Clone,
{
    let lifetime: CacheLifetime = key.to_owned().into();
    let value = RedisValue::new(value, lifetime, bind);

    if let Err(e) = set_cache_value_ex::<String, RedisValue<V>>(
        key.into(),
        value.clone(),
        CACHE_EXPIRY_SECONDS,
        cache,
    )
    .await
    {
        log::error!("> Failed to cache {}: {e:?}", key.to_string());
    }
    value
}

/// Invalidates every value stored under `lifetime` by moving its bind.
pub async fn refresh_cache_bind(
    lifetime: CacheLifetime,
    cache: &mut MultiplexedConnection,
) -> Result<(), potion::Error> {
    if let Some(key) = lifetime.bind_key() {
        let bind = uuid::Uuid::new_v4().to_string();
        log::trace!("> Refreshing {key} to {bind}");
        set_cache_value(key, bind, cache).await?;
    }
    Ok(())
}

// Cache - raw handlers

pub async fn set_cache_value<K: ToRedisArgs + Send + Sync, V: ToRedisArgs + Send + Sync>(
    key: K,
    value: V,
    cache: &mut MultiplexedConnection,
) -> Result<(), potion::Error> {
    let _: () = cache
        .set(key, value)
        .await
        .map_err(|e| CacheError::from(e).into())?;

    Ok(())
}

/// Like `set_cache_value`, but redis drops the key after `seconds`.
pub async fn set_cache_value_ex<K: ToRedisArgs + Send + Sync, V: ToRedisArgs + Send + Sync>(
    key: K,
    value: V,
    seconds: u64,
    cache: &mut MultiplexedConnection,
) -> Result<(), potion::Error> {
    let _: () = cache
        .set_ex(key, value, seconds)
        .await
        .map_err(|e| CacheError::from(e).into())?;

    Ok(())
}

pub async fn delete_cache_value<K: ToRedisArgs + Send + Sync>(
    key: K,
    cache: &mut MultiplexedConnection,
) -> Result<(), potion::Error> {
    let _: () = cache
        .del(key)
        .await
        .map_err(|e| CacheError::from(e).into())?;

    Ok(())
}

pub async fn get_cache_value<K: ToRedisArgs + Send + Sync, V: FromRedisValue>(
    key: K,
    cache: &mut MultiplexedConnection,
) -> Result<Option<V>, potion::Error> {
    let value: Option<V> = cache
        .get(key)
        .await
        .map_err(|e| CacheError::from(e).into())?;

    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[test]
    fn key_names() {
        assert_eq!(CacheKeyType::Tags.new("all").to_string(), "tags-all");
        assert_eq!(CacheKeyType::Ingredients.new("SaL").to_string(), "ingredients-sal");
        assert_eq!(CacheKeyType::Recipe.new(12).to_string(), "recipe-12");
        assert_eq!(
            CacheKeyType::Custom("x".to_string()).new("plain").to_string(),
            "plain"
        );
    }

    #[test]
    fn keys_bind_to_their_family() {
        let lifetime: CacheLifetime = CacheKeyType::Ingredients.new("sal").into();
        assert_eq!(lifetime, CacheLifetime::BindIngredientCache);
        assert_eq!(lifetime.bind_key(), Some("ingredient-cache-key"));

        let lifetime: CacheLifetime = CacheKeyType::Custom("v1".to_string()).new("k").into();
        assert_eq!(lifetime, CacheLifetime::Custom("v1".to_string()));
        assert_eq!(lifetime.bind_key(), None);
        assert_eq!(CacheLifetime::Infinite.bind_key(), None);
    }

    async fn connection() -> MultiplexedConnection {
        let url = std::env::var("REDIS_URL").unwrap();
        redis::Client::open(url)
            .unwrap()
            .get_multiplexed_async_connection()
            .await
            .unwrap()
    }

    fn unique(prefix: &str) -> String {
        format!("{prefix}-{}", uuid::Uuid::new_v4())
    }

    #[tokio::test]
    #[ignore = "needs REDIS_URL"]
    async fn cached_values_expire() {
        let mut cache = connection().await;
        let key = CacheKeyType::Tags.new(unique("expiry"));

        let list = RedisValue::get_or_list(key.clone(), &mut cache, || async { Ok(vec![1, 2, 3]) })
            .await
            .ok()
            .unwrap();
        assert_eq!(list.value, vec![1, 2, 3]);

        let ttl: i64 = cache.ttl(key.to_string()).await.unwrap();
        assert!(ttl > 0 && ttl <= CACHE_EXPIRY_SECONDS as i64);
        delete_cache_value(key.to_string(), &mut cache).await.ok().unwrap();
    }

    #[tokio::test]
    #[ignore = "needs REDIS_URL"]
    async fn refresh_during_fetch_is_not_masked() {
        let mut cache = connection().await;
        let key = CacheKeyType::Ingredients.new(unique("race"));
        let calls = Arc::new(AtomicUsize::new(0));

        let (c, mut conn) = (calls.clone(), cache.clone());
        let first = RedisValue::get_or_list(key.clone(), &mut cache, move || async move {
            c.fetch_add(1, Ordering::SeqCst);
            refresh_cache_bind(CacheLifetime::BindIngredientCache, &mut conn).await?;
            Ok(vec!["stale".to_string()])
        })
        .await
        .ok()
        .unwrap();
        assert_eq!(first.value, vec!["stale".to_string()]);

        let c = calls.clone();
        let second = RedisValue::get_or_list(key.clone(), &mut cache, move || async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["fresh".to_string()])
        })
        .await
        .ok()
        .unwrap();

        assert_eq!(second.value, vec!["fresh".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        delete_cache_value(key.to_string(), &mut cache).await.ok().unwrap();
    }
}
