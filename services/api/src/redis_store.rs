//! Redis backend for [`KvStore`].

use crate::config::RedisConfig;
use crate::kv_store::{KvStore, StoreError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};
use std::collections::HashSet;
use std::future::Future;
use tracing::{debug, info, instrument};

/// Keys requested per SCAN page
const SCAN_COUNT: usize = 100;

/// Writes KEYS[1] = ARGV[1] and adds ARGV[2] to the set KEYS[2]. The index
/// type is checked first: EXEC would apply the SET even when SADD fails.
const SET_AND_INDEX_SCRIPT: &str = r#"
local index_type = redis.call('TYPE', KEYS[2]).ok
if index_type ~= 'set' and index_type ~= 'none' then
  return redis.error_reply('WRONGTYPE Operation against a key holding the wrong kind of value: ' .. KEYS[2])
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('SADD', KEYS[2], ARGV[2])
return 1
"#;

/// Redis-backed record store.
///
/// Holds one multiplexed, auto-reconnecting connection shared by every
/// request; cloning the manager is cheap.
pub struct RedisKvStore {
    conn: ConnectionManager,
    set_and_index: Script,
}

impl RedisKvStore {
    /// Connect to Redis
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str()).context("Invalid Redis URL")?;

        let conn = tokio::time::timeout(config.connect_timeout(), ConnectionManager::new(client))
            .await
            .context("Timed out connecting to Redis")?
            .context("Failed to connect to Redis")?;

        info!("Connected to Redis");

        Ok(Self {
            conn,
            set_and_index: Script::new(SET_AND_INDEX_SCRIPT),
        })
    }
}

fn map_err(err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        StoreError::Connection(err.to_string())
    } else {
        StoreError::Operation(err.to_string())
    }
}

/// Follow a SCAN cursor until it returns to 0.
///
/// SCAN may report a key on more than one page; only the first sighting is
/// kept. An error on any page fails the whole enumeration.
async fn scan_pages<F, Fut>(mut fetch_page: F) -> Result<Vec<String>, StoreError>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<(u64, Vec<String>), StoreError>>,
{
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    let mut cursor = 0;

    loop {
        let (next, page) = fetch_page(cursor).await?;
        for key in page {
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }

        if next == 0 {
            return Ok(keys);
        }
        cursor = next;
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(map_err)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        redis::cmd("MGET")
            .arg(keys)
            .query_async::<_, Vec<Option<String>>>(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await.map_err(map_err)
    }

    async fn set_nx(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        conn.set_nx(key, value).await.map_err(map_err)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1i64).await.map_err(map_err)
    }

    #[instrument(skip(self))]
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let pattern = format!("{}*", prefix);

        let keys = scan_pages(|cursor| {
            let mut conn = self.conn.clone();
            let pattern = pattern.clone();
            async move {
                redis::cmd("SCAN")
                    .cursor_arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query_async::<_, (u64, Vec<String>)>(&mut conn)
                    .await
                    .map_err(map_err)
            }
        })
        .await?;

        debug!(count = keys.len(), "Scanned keys");
        Ok(keys)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.smembers(key).await.map_err(map_err)
    }

    async fn set_and_index(
        &self,
        key: &str,
        value: &str,
        index_key: &str,
        member: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.set_and_index
            .key(key)
            .key(index_key)
            .arg(value)
            .arg(member)
            .invoke_async::<_, ()>(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(map_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::ErrorKind;
    use std::collections::HashMap;

    fn page(next: u64, keys: &[&str]) -> Result<(u64, Vec<String>), StoreError> {
        Ok((next, keys.iter().map(|k| k.to_string()).collect()))
    }

    #[test]
    fn test_map_err_classifies_failures() {
        let io = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(matches!(map_err(io), StoreError::Connection(_)));

        let op = RedisError::from((ErrorKind::TypeError, "not an integer"));
        assert!(matches!(map_err(op), StoreError::Operation(_)));
    }

    #[tokio::test]
    async fn test_scan_pages_drops_repeated_keys() {
        let mut pages = HashMap::new();
        pages.insert(0, page(5, &["group:1", "group:2"]));
        pages.insert(5, page(0, &["group:1", "group:3"]));

        let keys = scan_pages(|cursor| {
            let reply = pages.get(&cursor).cloned().unwrap_or_else(|| page(0, &[]));
            async move { reply }
        })
        .await
        .unwrap();

        assert_eq!(keys, vec!["group:1", "group:2", "group:3"]);
    }

    #[tokio::test]
    async fn test_scan_pages_fails_on_later_page_error() {
        let mut pages = HashMap::new();
        pages.insert(0, page(5, &["group:1"]));
        pages.insert(
            5,
            Err(StoreError::Operation("LOADING Redis is loading".to_string())),
        );

        let res = scan_pages(|cursor| {
            let reply = pages.get(&cursor).cloned().unwrap_or_else(|| page(0, &[]));
            async move { reply }
        })
        .await;

        assert!(matches!(res, Err(StoreError::Operation(_))));
    }

    #[tokio::test]
    async fn test_scan_pages_single_page() {
        let keys = scan_pages(|_| async { page(0, &[]) }).await.unwrap();
        assert!(keys.is_empty());
    }

    /// Needs a disposable Redis at GIFGROUP_TEST_REDIS_URL
    #[tokio::test]
    #[ignore]
    async fn test_set_and_index_leaves_nothing_on_wrong_index_type() {
        let url = std::env::var("GIFGROUP_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let store = RedisKvStore::new(&RedisConfig {
            url,
            ..Default::default()
        })
        .await
        .unwrap();

        store.set("gifsForGroup:9001", "oops").await.unwrap();
        let mut conn = store.conn.clone();
        conn.del::<_, ()>("gif:9001").await.unwrap();

        let res = store
            .set_and_index("gif:9001", "{}", "gifsForGroup:9001", "gif:9001")
            .await;
        assert!(matches!(res, Err(StoreError::Operation(_))));
        assert_eq!(store.get("gif:9001").await.unwrap(), None);

        conn.del::<_, ()>("gifsForGroup:9001").await.unwrap();
        store
            .set_and_index("gif:9001", "{}", "gifsForGroup:9001", "gif:9001")
            .await
            .unwrap();
        assert_eq!(
            store.smembers("gifsForGroup:9001").await.unwrap(),
            vec!["gif:9001".to_string()]
        );

        conn.del::<_, ()>(vec!["gif:9001", "gifsForGroup:9001"])
            .await
            .unwrap();
    }
}
