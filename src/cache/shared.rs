//! Shared key-value tier: a Redis server or an in-process stand-in with the
//! same expiry semantics

use crate::error::{AttributionError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// A key-value store reachable by every process of a deployment
pub trait SharedStore: Send + Sync + fmt::Debug {
    fn backend(&self) -> &'static str;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` for `ttl`
    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Remove `key`; a missing key is not an error
    fn delete(&self, key: &str) -> Result<()>;

    /// Remove every key starting with `prefix`; returns how many went
    fn delete_prefix(&self, prefix: &str) -> Result<usize>;
}

/// Blocking Redis client.
///
/// Every call opens a connection with the configured timeout applied to
/// connect, read and write.
pub struct RedisStore {
    client: redis::Client,
    timeout: Duration,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Open a client for `url` and verify the server answers PING
    pub fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let store = Self { client, timeout };
        let mut con = store.connection()?;
        let pong: String = redis::cmd("PING").query(&mut con)?;
        debug!(reply = %pong, "Shared store reachable");
        Ok(store)
    }

    fn connection(&self) -> Result<redis::Connection> {
        let con = self.client.get_connection_with_timeout(self.timeout)?;
        con.set_read_timeout(Some(self.timeout))?;
        con.set_write_timeout(Some(self.timeout))?;
        Ok(con)
    }
}

impl SharedStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut con = self.connection()?;
        Ok(redis::cmd("GET").arg(key).query(&mut con)?)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut con = self.connection()?;
        let millis = ttl.as_millis().clamp(1, u64::MAX as u128) as u64;
        redis::cmd("PSETEX")
            .arg(key)
            .arg(millis)
            .arg(value)
            .query::<()>(&mut con)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut con = self.connection()?;
        redis::cmd("DEL").arg(key).query::<i64>(&mut con)?;
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut con = self.connection()?;
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut removed = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(256)
                .query(&mut con)?;
            if !keys.is_empty() {
                let n: i64 = redis::cmd("DEL").arg(&keys).query(&mut con)?;
                removed += n.max(0) as usize;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(removed)
    }
}

/// Process-local store used when no server is configured or reachable
#[derive(Debug, Default)]
pub struct InMemorySharedStore {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl InMemorySharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|(_, exp)| *exp > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SharedStore for InMemorySharedStore {
    fn backend(&self) -> &'static str {
        "simulated"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| AttributionError::Cache(format!("ttl {:?} out of range", ttl)))?;
        self.entries.lock().insert(key.to_string(), (value.to_vec(), expires_at));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_simulated_round_trip() {
        let store = InMemorySharedStore::new();
        assert_eq!(store.get("ns:a").unwrap(), None);
        store.set("ns:a", b"payload", Duration::from_secs(60)).unwrap();
        assert_eq!(store.get("ns:a").unwrap(), Some(b"payload".to_vec()));
        store.delete("ns:a").unwrap();
        store.delete("ns:a").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_simulated_expiry() {
        let store = InMemorySharedStore::new();
        store.set("ns:a", b"x", Duration::from_millis(40)).unwrap();
        thread::sleep(Duration::from_millis(70));
        assert_eq!(store.get("ns:a").unwrap(), None);
    }

    #[test]
    fn test_prefix_delete() {
        let store = InMemorySharedStore::new();
        let ttl = Duration::from_secs(60);
        store.set("teams:a", b"1", ttl).unwrap();
        store.set("teams:b", b"2", ttl).unwrap();
        store.set("players:a", b"3", ttl).unwrap();
        assert_eq!(store.delete_prefix("teams:").unwrap(), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unreachable_redis_is_an_error() {
        let result = RedisStore::connect("redis://127.0.0.1:1/", Duration::from_millis(100));
        assert!(matches!(result, Err(AttributionError::Cache(_))));
    }
}
