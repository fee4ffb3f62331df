//! Server-side login lockout
//!
//! Failed login attempts are counted per account inside a fixed window.
//! Once the count reaches the configured maximum the account is refused
//! until the window expires. Counters live in Redis when configured,
//! otherwise in process memory.

use crate::config::{LockoutConfig, RedisConfig};
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A failure counter and the seconds left before it resets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptWindow {
    pub failures: u32,
    pub resets_in_secs: u64,
}

/// Storage for failure counters
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Current window for a key, if any. `window` is reported when the
    /// store cannot tell how long the counter has left.
    async fn current(&self, key: &str, window: Duration) -> Result<Option<AttemptWindow>>;

    /// Count one more failure; the first failure opens the window
    async fn increment(&self, key: &str, window: Duration) -> Result<AttemptWindow>;

    async fn clear(&self, key: &str) -> Result<()>;
}

/// Redis-backed counters (`INCR` + `EXPIRE`)
pub struct RedisAttemptStore {
    connection: MultiplexedConnection,
    key_prefix: String,
}

impl RedisAttemptStore {
    pub async fn connect(url: &str, config: &RedisConfig) -> Result<Self> {
        let client = Client::open(url).map_err(|e| AppError::CacheError {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        info!("Lockout counters stored in Redis");
        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:lockout:{}", self.key_prefix, key)
    }

    /// Redis reports -2 for a missing key and -1 for no expiry
    fn remaining(ttl: i64, window: Duration) -> u64 {
        if ttl >= 0 {
            ttl as u64
        } else {
            window.as_secs()
        }
    }
}

#[async_trait]
impl AttemptStore for RedisAttemptStore {
    async fn current(&self, key: &str, window: Duration) -> Result<Option<AttemptWindow>> {
        let full_key = self.key(key);
        let mut conn = self.connection.clone();

        let failures: Option<u32> = conn.get(&full_key).await?;
        let Some(failures) = failures else {
            return Ok(None);
        };
        let ttl: i64 = conn.ttl(&full_key).await?;

        Ok(Some(AttemptWindow {
            failures,
            resets_in_secs: Self::remaining(ttl, window),
        }))
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<AttemptWindow> {
        let full_key = self.key(key);
        let mut conn = self.connection.clone();

        let failures: u32 = conn.incr(&full_key, 1).await?;
        let mut ttl: i64 = conn.ttl(&full_key).await?;
        if failures == 1 || ttl == -1 {
            let _: bool = conn.expire(&full_key, window.as_secs() as i64).await?;
            ttl = window.as_secs() as i64;
        }

        debug!(key = %full_key, failures, "Login failure counted");
        Ok(AttemptWindow {
            failures,
            resets_in_secs: Self::remaining(ttl, window),
        })
    }

    async fn clear(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.del(self.key(key)).await?;
        Ok(())
    }
}

/// Tracked keys above which `increment` sweeps expired counters
const SWEEP_THRESHOLD: usize = 1024;

/// Process-local counters. Expired entries are dropped on read and swept
/// once the map grows past [`SWEEP_THRESHOLD`].
#[derive(Default)]
pub struct InMemoryAttemptStore {
    entries: Mutex<HashMap<String, (u32, Instant)>>,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of counters currently held, expired ones included
    pub async fn tracked_keys(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn current(&self, key: &str, _window: Duration) -> Result<Option<AttemptWindow>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(&(failures, expires)) if expires > now => Ok(Some(AttemptWindow {
                failures,
                resets_in_secs: expires.duration_since(now).as_secs().max(1),
            })),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<AttemptWindow> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if entries.len() >= SWEEP_THRESHOLD {
            let before = entries.len();
            entries.retain(|_, (_, expires)| *expires > now);
            debug!(swept = before - entries.len(), "Expired lockout counters removed");
        }
        let entry = entries
            .entry(key.to_string())
            .or_insert((0, now + window));
        if entry.1 <= now {
            *entry = (0, now + window);
        }
        entry.0 += 1;

        Ok(AttemptWindow {
            failures: entry.0,
            resets_in_secs: entry.1.duration_since(now).as_secs().max(1),
        })
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// Per-account login throttle
#[derive(Clone)]
pub struct LoginThrottle {
    store: Arc<dyn AttemptStore>,
    max_attempts: u32,
    window: Duration,
}

impl LoginThrottle {
    pub fn new(store: Arc<dyn AttemptStore>, config: &LockoutConfig) -> Self {
        Self {
            store,
            max_attempts: config.max_attempts.max(1),
            window: Duration::from_secs(config.window_secs),
        }
    }

    /// In-memory throttle, used when no Redis URL is configured
    pub fn in_memory(config: &LockoutConfig) -> Self {
        Self::new(Arc::new(InMemoryAttemptStore::new()), config)
    }

    /// Counter key for an account; the raw account name never reaches storage
    pub fn account_key(account: &str) -> String {
        let normalized = account.trim().to_lowercase();
        hex::encode(Sha256::digest(normalized.as_bytes()))
    }

    /// Refuse the attempt if the account is currently locked
    pub async fn check(&self, account: &str) -> Result<()> {
        let key = Self::account_key(account);
        match self.store.current(&key, self.window).await? {
            Some(window) if window.failures >= self.max_attempts => {
                metrics::record_login("locked");
                Err(AppError::AccountLocked {
                    retry_after_secs: window.resets_in_secs,
                })
            }
            _ => Ok(()),
        }
    }

    /// Count a rejected attempt. Returns the attempts left, or
    /// `AccountLocked` once the maximum is reached.
    pub async fn register_failure(&self, account: &str) -> Result<u32> {
        let key = Self::account_key(account);
        let window = self.store.increment(&key, self.window).await?;

        if window.failures >= self.max_attempts {
            warn!(
                account_key = %key,
                failures = window.failures,
                retry_after_secs = window.resets_in_secs,
                "Account locked after repeated login failures"
            );
            return Err(AppError::AccountLocked {
                retry_after_secs: window.resets_in_secs,
            });
        }

        Ok(self.max_attempts - window.failures)
    }

    /// Reset the counter after a successful login
    pub async fn register_success(&self, account: &str) -> Result<()> {
        self.store.clear(&Self::account_key(account)).await
    }
}
