//! Redis store backend implementation.

use super::CacheBackend;
use crate::error::{Error, Result};
use deadpool_redis::redis::{AsyncCommands, Script};
use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};
use std::time::Duration;

/// Default Redis connection pool size.
/// Formula: (CPU cores × 2) + 1
/// Override with REDIS_POOL_SIZE environment variable
const DEFAULT_POOL_SIZE: u32 = 16;

/// SADD plus an expiry that only grows. `ARGV[2]` is the TTL in
/// milliseconds; `0` makes the set persistent.
const SADD_WITH_TTL_LUA: &str = r"
local current = redis.call('PTTL', KEYS[1])
redis.call('SADD', KEYS[1], ARGV[1])
local ttl = tonumber(ARGV[2])
if ttl == 0 then
    redis.call('PERSIST', KEYS[1])
elseif current == -2 or (current >= 0 and current < ttl) then
    redis.call('PEXPIRE', KEYS[1], ttl)
end
return 1
";

/// Configuration for Redis backend.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: u32,
    pub pool_size: u32,
    pub connection_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            host: "localhost".to_string(),
            port: 6379,
            username: None,
            password: None,
            database: 0,
            pool_size: DEFAULT_POOL_SIZE,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// Build Redis connection string.
    pub fn connection_string(&self) -> String {
        if let Some(password) = &self.password {
            if let Some(username) = &self.username {
                format!(
                    "redis://{}:{}@{}:{}/{}",
                    username, password, self.host, self.port, self.database
                )
            } else {
                format!(
                    "redis://default:{}@{}:{}/{}",
                    password, self.host, self.port, self.database
                )
            }
        } else {
            format!("redis://{}:{}/{}", self.host, self.port, self.database)
        }
    }
}

/// Redis backend with connection pooling and async operations.
///
/// Tag indices are native Redis sets, grown by a Lua script so the member
/// add and the expiry update are atomic, and prefix
/// invalidation uses cursor-based `SCAN`, so nothing here blocks the server
/// the way `KEYS` would.
///
/// # Example
///
/// ```no_run
/// # use resilient_cache::backend::{RedisBackend, RedisConfig, CacheBackend};
/// # use resilient_cache::error::Result;
/// # async fn example() -> Result<()> {
/// let backend = RedisBackend::new(RedisConfig::default()).await?;
///
/// backend.set("cache:key", b"value".to_vec(), None).await?;
/// let value = backend.get("cache:key").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
    sadd_script: Script,
}

impl RedisBackend {
    /// Create new Redis backend from configuration.
    ///
    /// # Errors
    /// Returns `Err` if pool creation fails.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let backend = Self::build(
            &config.connection_string(),
            config.pool_size,
            Some(config.connection_timeout),
        )?;
        info!("Redis backend initialized: {}:{}", config.host, config.port);
        Ok(backend)
    }

    /// Create from connection string directly.
    ///
    /// Pool size is determined by:
    /// 1. `REDIS_POOL_SIZE` environment variable (if set)
    /// 2. `DEFAULT_POOL_SIZE` constant (16)
    ///
    /// # Errors
    /// Returns `Err` if pool creation fails.
    pub async fn from_connection_string(conn_str: &str) -> Result<Self> {
        let pool_size = std::env::var("REDIS_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_POOL_SIZE);

        let backend = Self::build(conn_str, pool_size, None)?;
        info!(
            "Redis backend initialized from connection string (pool size: {})",
            pool_size
        );
        Ok(backend)
    }

    fn build(conn_str: &str, pool_size: u32, connect_timeout: Option<Duration>) -> Result<Self> {
        let mut pool_cfg = deadpool_redis::PoolConfig::new(pool_size as usize);
        // Bounds both waiting for a free connection and opening a new one.
        pool_cfg.timeouts.wait = connect_timeout;
        pool_cfg.timeouts.create = connect_timeout;

        let mut cfg = PoolConfig::from_url(conn_str);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::BackendError(format!("Failed to create Redis pool: {}", e)))?;

        Ok(RedisBackend {
            pool,
            sadd_script: Script::new(SADD_WITH_TTL_LUA),
        })
    }

    async fn conn(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| match e {
                deadpool_redis::PoolError::Timeout(kind) => {
                    Error::Timeout(format!("Redis connection {:?} timed out", kind))
                }
                other => Error::BackendError(format!("Failed to get Redis connection: {}", other)),
            })
    }
}

impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;

        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| Error::BackendError(format!("Redis GET failed for key {}: {}", key, e)))?;

        if value.is_some() {
            debug!("Redis GET {} -> HIT", key);
        } else {
            debug!("Redis GET {} -> MISS", key);
        }

        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn().await?;

        match ttl {
            Some(duration) => {
                // SETEX rejects 0; one second is the smallest expiry Redis accepts here
                let seconds = duration.as_secs().max(1);
                conn.set_ex::<_, _, ()>(key, value, seconds)
                    .await
                    .map_err(|e| {
                        Error::BackendError(format!("Redis SET_EX failed for key {}: {}", key, e))
                    })?;
                debug!("Redis SET {} (TTL: {}s)", key, seconds);
            }
            None => {
                conn.set::<_, _, ()>(key, value).await.map_err(|e| {
                    Error::BackendError(format!("Redis SET failed for key {}: {}", key, e))
                })?;
                debug!("Redis SET {}", key);
            }
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;

        conn.del::<_, ()>(key)
            .await
            .map_err(|e| Error::BackendError(format!("Redis DEL failed for key {}: {}", key, e)))?;

        debug!("Redis DELETE {}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;

        let exists: bool = conn.exists(key).await.map_err(|e| {
            Error::BackendError(format!("Redis EXISTS failed for key {}: {}", key, e))
        })?;

        Ok(exists)
    }

    async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn().await?;

        let values: Vec<Option<Vec<u8>>> = deadpool_redis::redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut *conn)
            .await
            .map_err(|e| Error::BackendError(format!("Redis MGET failed: {}", e)))?;

        debug!("Redis MGET {} keys", keys.len());
        Ok(values)
    }

    async fn mdelete(&self, keys: &[&str]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn().await?;

        let removed: u64 = conn
            .del(keys)
            .await
            .map_err(|e| Error::BackendError(format!("Redis DEL (bulk) failed: {}", e)))?;

        debug!("Redis MDELETE {} keys ({} removed)", keys.len(), removed);
        Ok(removed)
    }

    async fn sadd_with_ttl(
        &self,
        set_key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut conn = self.conn().await?;
        let ttl_ms = ttl.map_or(0, |d| d.as_millis().clamp(1, i64::MAX as u128) as i64);

        self.sadd_script
            .key(set_key)
            .arg(member)
            .arg(ttl_ms)
            .invoke_async::<i64>(&mut *conn)
            .await
            .map_err(|e| {
                Error::BackendError(format!("Redis SADD failed for key {}: {}", set_key, e))
            })?;

        debug!("Redis SADD {} {} (ttl {:?})", set_key, member, ttl);
        Ok(())
    }

    async fn smembers(&self, set_key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;

        let members: Vec<String> = conn.smembers(set_key).await.map_err(|e| {
            Error::BackendError(format!("Redis SMEMBERS failed for key {}: {}", set_key, e))
        })?;

        Ok(members)
    }

    async fn scan(&self, pattern: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>)> {
        let mut conn = self.conn().await?;

        let (next, keys): (u64, Vec<String>) = deadpool_redis::redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut *conn)
            .await
            .map_err(|e| Error::BackendError(format!("Redis SCAN failed: {}", e)))?;

        debug!("Redis SCAN {} @{} -> {} keys", pattern, cursor, keys.len());
        Ok((next, keys))
    }

    async fn health_check(&self) -> Result<bool> {
        let mut conn = self.conn().await?;

        let pong: String = deadpool_redis::redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| Error::BackendError(format!("Redis PING failed: {}", e)))?;

        Ok(pong.contains("PONG"))
    }

    async fn clear_all(&self) -> Result<()> {
        let mut conn = self.conn().await?;

        deadpool_redis::redis::cmd("FLUSHDB")
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| Error::BackendError(format!("Redis FLUSHDB failed: {}", e)))?;

        warn!("Redis FLUSHDB executed - all keys removed!");
        Ok(())
    }
}
