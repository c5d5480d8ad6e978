//! Single Redis instance backend.

use async_trait::async_trait;
use ::redis::aio::ConnectionManager;
use ::redis::{Client, IntoConnectionInfo, Script};
use std::time::Duration;
use tracing::{debug, info};

use super::Coordinator;
use crate::error::CoordinatorError;

/// Deletes KEYS[1] only if it still holds ARGV[1].
const COMPARE_AND_DELETE: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
"#;

#[derive(Clone)]
pub struct RedisCoordinator {
    conn: ConnectionManager,
    release_script: Script,
    node: String,
}

impl RedisCoordinator {
    pub async fn connect(node: &str, password: Option<&str>) -> Result<Self, CoordinatorError> {
        let (host, port) = parse_node(node)?;
        let mut connection_info = (host, port).into_connection_info()?;
        connection_info.redis.password = password.map(str::to_string);

        let client = Client::open(connection_info)?;
        let conn = ConnectionManager::new(client).await?;

        let coordinator = Self {
            conn,
            release_script: Script::new(COMPARE_AND_DELETE),
            node: node.to_string(),
        };
        coordinator.ping().await?;
        info!(node = %coordinator.node, "Redis coordinator connected");
        Ok(coordinator)
    }
}

#[async_trait]
impl Coordinator for RedisCoordinator {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinatorError> {
        let mut conn = self.conn.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        // SET ... NX replies OK when the key was set and nil otherwise.
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CoordinatorError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = ::redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
    ) -> Result<bool, CoordinatorError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release_script
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        debug!(%key, node = %self.node, deleted, "compare_and_delete");
        Ok(deleted == 1)
    }

    async fn ping(&self) -> Result<(), CoordinatorError> {
        let mut conn = self.conn.clone();
        let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Parses a `host:port` node entry. The port defaults to `6379`, and a
/// `redis://` prefix is tolerated.
pub fn parse_node(node: &str) -> Result<(&str, u16), CoordinatorError> {
    let node = node.trim().trim_start_matches("redis://");
    let node = node.split('/').next().unwrap_or(node);

    match node.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|_| {
                CoordinatorError::Unavailable(format!("invalid port in redis node: {node}"))
            })?;
            Ok((host, port))
        }
        None => Ok((node, 6379)),
    }
}
