//! Key-value store backends.
//!
//! The cache engine talks to the shared store only through [`CacheBackend`].
//! Keys follow the `<namespace>:<logical-key>` convention for values and
//! `tag:<tagname>` for tag indices; ops tooling inspecting the store relies
//! on that layout.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;

pub mod inmemory;
#[cfg(feature = "redis")]
pub mod redis;

pub use inmemory::InMemoryBackend;
#[cfg(feature = "redis")]
pub use redis::{RedisBackend, RedisConfig};

/// Trait for key-value store implementations.
///
/// Abstracts storage operations, allowing swappable backends.
/// Implementations: InMemory (default), Redis.
///
/// **IMPORTANT:** All methods use `&self` instead of `&mut self` to allow concurrent access.
/// Backend implementations should use interior mutability or external storage.
///
/// **ASYNC:** All methods return `Send` futures so engine calls can run inside
/// spawned background tasks. Implementations may use plain `async fn`.
pub trait CacheBackend: Send + Sync + Clone + 'static {
    /// Retrieve value from the store by key.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))` - Value found
    /// - `Ok(None)` - Key absent or expired
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs (connection lost, wrong type, etc.)
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Store value with optional TTL. `None` means no expiry.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove a single key. Deleting a missing key is not an error.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Check if key exists (optional optimization).
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.get(key).await?.is_some()) }
    }

    /// Bulk get operation (optional optimization).
    ///
    /// Default implementation calls `get()` for each key.
    /// Override for batch efficiency (e.g., Redis MGET).
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn mget(&self, keys: &[&str]) -> impl Future<Output = Result<Vec<Option<Vec<u8>>>>> + Send {
        async move {
            let mut results = Vec::with_capacity(keys.len());
            for key in keys {
                results.push(self.get(key).await?);
            }
            Ok(results)
        }
    }

    /// Bulk delete in one batch, returning how many keys actually existed.
    ///
    /// Default implementation checks and deletes key by key.
    /// Override for batch efficiency (e.g., a single Redis DEL).
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    fn mdelete(&self, keys: &[&str]) -> impl Future<Output = Result<u64>> + Send {
        async move {
            let mut removed = 0;
            for key in keys {
                if self.exists(key).await? {
                    removed += 1;
                }
                self.delete(key).await?;
            }
            Ok(removed)
        }
    }

    /// Add `member` to the set stored at `set_key`, creating it if needed.
    ///
    /// The set's expiry only ever grows:
    /// - a new set expires after `ttl`;
    /// - an existing set with an earlier expiry is extended to `ttl`;
    /// - an existing set without expiry keeps none;
    /// - `ttl = None` removes any expiry.
    ///
    /// # Errors
    /// Returns `Err` if the key holds a plain value or the backend fails
    fn sadd_with_ttl(
        &self,
        set_key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// All members of the set stored at `set_key` (empty if absent).
    ///
    /// # Errors
    /// Returns `Err` if the key holds a plain value or the backend fails
    fn smembers(&self, set_key: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Incrementally iterate keys matching a glob `pattern` in Redis `MATCH`
    /// syntax. Wrap literal text with [`escape_glob`].
    ///
    /// Start with cursor `0`; iteration is complete when the returned cursor
    /// is `0` again. `count` is a hint for the page size.
    ///
    /// # Errors
    /// Returns `Err` if the backend cannot scan or the scan fails
    fn scan(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> impl Future<Output = Result<(u64, Vec<String>)>> + Send {
        let _ = (pattern, cursor, count);
        async {
            Err(crate::error::Error::NotImplemented(
                "scan not implemented for this backend".to_string(),
            ))
        }
    }

    /// Health check - verify backend is accessible (PING).
    ///
    /// # Errors
    /// Returns `Err` if backend is not accessible
    fn health_check(&self) -> impl Future<Output = Result<bool>> + Send {
        async { Ok(true) }
    }

    /// Optional: Clear the whole store (use with caution).
    ///
    /// # Errors
    /// Returns `Err` if operation is not implemented or fails
    fn clear_all(&self) -> impl Future<Output = Result<()>> + Send {
        async {
            Err(crate::error::Error::NotImplemented(
                "clear_all not implemented for this backend".to_string(),
            ))
        }
    }
}

/// Escape `*`, `?`, `[`, `]` and `\` so `literal` matches only itself in a
/// `scan` pattern.
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for ch in literal.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

enum GlobToken {
    AnyRun,
    AnyOne,
    Literal(char),
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl GlobToken {
    fn matches(&self, ch: char) -> bool {
        match self {
            GlobToken::AnyRun | GlobToken::AnyOne => true,
            GlobToken::Literal(lit) => *lit == ch,
            GlobToken::Class { negated, ranges } => {
                ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(&ch)) != *negated
            }
        }
    }
}

fn parse_glob(pattern: &str) -> Vec<GlobToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars().peekable();

    while let Some(ch) = chars.next() {
        let token = match ch {
            '*' => GlobToken::AnyRun,
            '?' => GlobToken::AnyOne,
            '\\' => GlobToken::Literal(chars.next().unwrap_or('\\')),
            '[' => {
                let negated = chars.next_if_eq(&'^').is_some();
                let mut ranges = Vec::new();
                // An unterminated class runs to the end of the pattern, as in Redis.
                while let Some(c) = chars.next() {
                    match c {
                        ']' => break,
                        '\\' => {
                            if let Some(esc) = chars.next() {
                                ranges.push((esc, esc));
                            }
                        }
                        _ => {
                            let mut ahead = chars.clone();
                            match (ahead.next(), ahead.next()) {
                                (Some('-'), Some(end)) if end != ']' => {
                                    chars.next();
                                    chars.next();
                                    ranges.push((c.min(end), c.max(end)));
                                }
                                _ => ranges.push((c, c)),
                            }
                        }
                    }
                }
                GlobToken::Class { negated, ranges }
            }
            c => GlobToken::Literal(c),
        };
        tokens.push(token);
    }
    tokens
}

/// Glob matching for `scan` patterns with Redis `MATCH` rules: `*` matches
/// any run, `?` one character, `[...]` a class (`^` negates, `a-z` ranges)
/// and `\` escapes the next character.
pub(crate) fn glob_match(pattern: &str, candidate: &str) -> bool {
    let tokens = parse_glob(pattern);
    let c: Vec<char> = candidate.chars().collect();
    let (mut ti, mut ci) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ci < c.len() {
        match tokens.get(ti) {
            Some(GlobToken::AnyRun) => {
                star = Some((ti, ci));
                ti += 1;
            }
            Some(token) if token.matches(c[ci]) => {
                ti += 1;
                ci += 1;
            }
            _ => match star {
                Some((st, sc)) => {
                    ti = st + 1;
                    ci = sc + 1;
                    star = Some((st, sc + 1));
                }
                None => return false,
            },
        }
    }

    while matches!(tokens.get(ti), Some(GlobToken::AnyRun)) {
        ti += 1;
    }
    ti == tokens.len()
}
