//! Redis-backed store adapter.
//!
//! Uses a `ConnectionManager` so reconnection is handled inside the client;
//! every command clones the manager handle rather than holding a pooled
//! connection across awaits. Ownership-checked deletion runs as a Lua
//! script so the compare and the delete cannot interleave with another
//! writer.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::info;

use crate::{KvStore, StoreError};

const COMPARE_AND_DELETE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

pub struct RedisStore {
    manager: ConnectionManager,
    compare_and_delete: Script,
}

impl RedisStore {
    /// Connect and verify the server answers a PING.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client =
            Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let mut conn = manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        info!("connected to shared store at {url}");
        Ok(Self {
            manager,
            compare_and_delete: Script::new(COMPARE_AND_DELETE_SCRIPT),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn command_err(e: redis::RedisError) -> StoreError {
    StoreError::Command(e.to_string())
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        conn.get(key).await.map_err(command_err)
    }

    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(command_err)?;
        Ok(())
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(command_err)?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: i64 = conn.del(key).await.map_err(command_err)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        conn.exists(key).await.map_err(command_err)
    }

    async fn list_push_head(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: i64 = conn.lpush(key, value).await.map_err(command_err)?;
        Ok(())
    }

    async fn list_pop_tail(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        conn.rpop(key, None).await.map_err(command_err)
    }

    async fn list_index(&self, key: &str, index: i64) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        conn.lindex(key, index as isize).await.map_err(command_err)
    }

    async fn list_remove(&self, key: &str, count: i64, value: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        let removed: i64 = conn.lrem(key, count as isize, value).await.map_err(command_err)?;
        Ok(removed.max(0) as u64)
    }

    async fn list_len(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        let len: i64 = conn.llen(key).await.map_err(command_err)?;
        Ok(len.max(0) as u64)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let deleted: i64 = self
            .compare_and_delete
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(command_err)?;
        Ok(deleted == 1)
    }

    async fn incr_px(&self, key: &str, ttl_ms: u64) -> Result<i64, StoreError> {
        let mut conn = self.conn();
        let value: i64 = conn.incr(key, 1).await.map_err(command_err)?;
        if value == 1 {
            let _: bool = conn.pexpire(key, ttl_ms as i64).await.map_err(command_err)?;
        }
        Ok(value)
    }

    fn is_ready(&self) -> bool {
        true
    }
}
