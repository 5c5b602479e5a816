// Redis-backed lease store
//
// Both operations run as Lua scripts, which Redis executes atomically.
// `redis::Script` invokes them by SHA and loads them on first use.

use crate::{
    store::{LeaseStore, LockReply},
    time::Timestamp,
    Error, Result,
};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, ErrorKind, Script};
use std::fmt;

const GET_LOCK: &str = include_str!("lua/get_lock.lua");
const EXTEND_LOCK: &str = include_str!("lua/extend_lock.lua");

#[derive(Clone)]
pub struct RedisLeaseStore {
    connection: ConnectionManager,
    get_lock: Script,
    extend_lock: Script,
}

impl RedisLeaseStore {
    /// Connects to `url` (e.g. `redis://127.0.0.1/`).
    ///
    /// Fails straight away if the server can't be reached. Once connected,
    /// the connection manager reconnects on its own.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = client.get_connection_manager().await?;
        Ok(Self::with_connection(connection))
    }

    pub fn with_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            get_lock: Script::new(GET_LOCK),
            extend_lock: Script::new(EXTEND_LOCK),
        }
    }

    async fn invoke(
        &self,
        script: &Script,
        key: &str,
        first: Timestamp,
        second: Timestamp,
    ) -> Result<LockReply> {
        let mut connection = self.connection.clone();

        let (flag, locked_until): (i64, String) = script
            .key(key)
            .arg(first.to_string())
            .arg(second.to_string())
            .invoke_async(&mut connection)
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::TypeError {
                    Error::MalformedReply {
                        key: key.to_string(),
                        reason: err.to_string(),
                    }
                } else {
                    Error::store(key, err)
                }
            })?;

        let locked_until = locked_until.parse().map_err(|_| Error::MalformedReply {
            key: key.to_string(),
            reason: format!("expiry {locked_until:?} is not a number"),
        })?;

        Ok(LockReply {
            acquired: flag == 1,
            locked_until,
        })
    }
}

impl fmt::Debug for RedisLeaseStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisLeaseStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn get_lock(&self, key: &str, now: Timestamp, candidate: Timestamp) -> Result<LockReply> {
        self.invoke(&self.get_lock, key, now, candidate).await
    }

    async fn extend_lock(&self, key: &str, token: Timestamp, candidate: Timestamp) -> Result<LockReply> {
        self.invoke(&self.extend_lock, key, token, candidate).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_use_one_key_and_two_args() {
        for script in [GET_LOCK, EXTEND_LOCK] {
            assert!(script.contains("KEYS[1]"));
            assert!(script.contains("ARGV[1]"));
            assert!(script.contains("ARGV[2]"));
            assert!(!script.contains("KEYS[2]"));
        }
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let err = RedisLeaseStore::connect("not a url").await.unwrap_err();
        assert!(matches!(err, Error::Redis(_)));
    }
}
