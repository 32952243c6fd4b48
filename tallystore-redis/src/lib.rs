//! Redis store for `tallystore` (companion crate).
//! Bring your own `redis::Client`; batches run as `MULTI`/`EXEC` transactions.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{ErrorKind, RedisError, Value};
use std::collections::HashMap;
use tallystore::store::{Batch, Command, Reply, ScriptHandle, Store, StoreError};

/// [`Store`] over a managed, auto-reconnecting Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("conn", &"<redis::aio::ConnectionManager>").finish()
    }
}

impl RedisStore {
    /// Open a managed connection from `client`.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] if the server cannot be reached.
    pub async fn connect(client: redis::Client) -> Result<Self, StoreError> {
        let conn = ConnectionManager::new(client).await.map_err(map_error)?;
        Ok(Self { conn })
    }

    /// Wrap an existing connection manager.
    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn missing_script(&self, handles: &[ScriptHandle]) -> Result<Option<ScriptHandle>, StoreError> {
        if handles.is_empty() {
            return Ok(None);
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SCRIPT");
        cmd.arg("EXISTS");
        for handle in handles {
            cmd.arg(handle.as_str());
        }
        let exists: Vec<bool> = cmd.query_async(&mut conn).await.map_err(map_error)?;
        Ok(handles.iter().zip(exists).find(|(_, known)| !known).map(|(h, _)| h.clone()))
    }
}

fn append(pipe: &mut redis::Pipeline, command: &Command) {
    match command {
        Command::HSet { key, field, value } => {
            pipe.cmd("HSET").arg(key).arg(field).arg(value);
        }
        Command::HSetMany { key, fields } => {
            let cmd = pipe.cmd("HSET").arg(key);
            for (field, value) in fields {
                cmd.arg(field).arg(value);
            }
        }
        Command::HIncrBy { key, field, delta } => {
            pipe.cmd("HINCRBY").arg(key).arg(field).arg(*delta);
        }
        Command::Expire { key, seconds } => {
            pipe.cmd("EXPIRE").arg(key).arg(*seconds);
        }
        Command::SAdd { key, member } => {
            pipe.cmd("SADD").arg(key).arg(member);
        }
        Command::ZAdd { key, score, member } => {
            pipe.cmd("ZADD").arg(key).arg(*score).arg(member);
        }
        Command::ZRemRangeByScore { key, min, max } => {
            pipe.cmd("ZREMRANGEBYSCORE").arg(key).arg(*min).arg(*max);
        }
        Command::ZCard { key } => {
            pipe.cmd("ZCARD").arg(key);
        }
        Command::EvalSha { handle, keys, args } => {
            pipe.cmd("EVALSHA").arg(handle.as_str()).arg(keys.len()).arg(keys).arg(args);
        }
    }
}

fn to_reply(value: Value) -> Result<Reply, StoreError> {
    match value {
        Value::Okay => Ok(Reply::Ok),
        Value::Int(n) => Ok(Reply::Int(n)),
        Value::Nil => Ok(Reply::Nil),
        Value::SimpleString(s) if s == "OK" => Ok(Reply::Ok),
        Value::SimpleString(s) => Ok(Reply::Bulk(s)),
        Value::BulkString(bytes) => Ok(Reply::Bulk(String::from_utf8_lossy(&bytes).into_owned())),
        other => Err(StoreError::Protocol(format!("unexpected reply {:?}", other))),
    }
}

fn map_error(e: RedisError) -> StoreError {
    map_batch_error(e, None)
}

/// Classify an error raised by `EXEC`. The batch already passed the
/// `SCRIPT EXISTS` check, so a `NOSCRIPT` here means the scripts were flushed
/// while the transaction ran: the other commands were applied.
fn map_batch_error(e: RedisError, script: Option<&ScriptHandle>) -> StoreError {
    if let (ErrorKind::NoScriptError, Some(handle)) = (e.kind(), script) {
        StoreError::ScriptsNotApplied(handle.clone())
    } else if e.is_io_error()
        || e.is_timeout()
        || e.is_connection_dropped()
        || e.is_connection_refusal()
    {
        StoreError::Unavailable(e.to_string())
    } else if e.kind() == ErrorKind::NoScriptError
        || (e.kind() == ErrorKind::ResponseError
            && e.detail().map_or(false, |d| d.contains("script")))
    {
        StoreError::Script(e.to_string())
    } else {
        StoreError::Protocol(e.to_string())
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn exec(&self, batch: Batch) -> Result<Vec<Reply>, StoreError> {
        let handles = batch.script_handles();
        if let Some(handle) = self.missing_script(&handles).await? {
            tracing::debug!(target: "tallystore::redis", %handle, "refusing batch: script not loaded");
            return Err(StoreError::NoScript(handle));
        }
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in batch.commands() {
            append(&mut pipe, command);
        }
        let mut conn = self.conn.clone();
        let transaction_failed = |e: RedisError| {
            tracing::warn!(target: "tallystore::redis", error = %e, commands = batch.len(), "transaction failed");
            map_batch_error(e, handles.first())
        };
        let values: Vec<Value> = pipe.query_async(&mut conn).await.map_err(transaction_failed)?;
        // Errors raised by individual commands inside EXEC come back as values.
        let values = values
            .into_iter()
            .map(|value| value.extract_error().map_err(transaction_failed))
            .collect::<Result<Vec<_>, _>>()?;
        if values.len() != batch.len() {
            return Err(StoreError::Protocol(format!(
                "expected {} replies, got {}",
                batch.len(),
                values.len()
            )));
        }
        values.into_iter().map(to_reply).collect()
    }

    async fn script_load(&self, source: &str) -> Result<ScriptHandle, StoreError> {
        let mut conn = self.conn.clone();
        let digest: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(source)
            .query_async(&mut conn)
            .await
            .map_err(map_error)?;
        Ok(ScriptHandle::new(digest))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("HGETALL").arg(key).query_async(&mut conn).await.map_err(map_error)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("SMEMBERS").arg(key).query_async(&mut conn).await.map_err(map_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_map_to_store_replies() {
        assert_eq!(to_reply(Value::Okay).unwrap(), Reply::Ok);
        assert_eq!(to_reply(Value::Int(3)).unwrap(), Reply::Int(3));
        assert_eq!(to_reply(Value::Nil).unwrap(), Reply::Nil);
        assert_eq!(to_reply(Value::SimpleString("OK".into())).unwrap(), Reply::Ok);
        assert_eq!(to_reply(Value::BulkString(b"x".to_vec())).unwrap(), Reply::Bulk("x".into()));
        assert!(matches!(to_reply(Value::Array(vec![])), Err(StoreError::Protocol(_))));
    }

    #[test]
    fn io_errors_are_unavailable() {
        let e = RedisError::from(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "down"));
        assert!(map_error(e).is_unavailable());
    }

    #[test]
    fn noscript_during_exec_reports_the_batch_handle() {
        let noscript =
            || RedisError::from((ErrorKind::NoScriptError, "NOSCRIPT", "no matching script".to_string()));
        let handle = ScriptHandle::of("return 1");
        assert_eq!(
            map_batch_error(noscript(), Some(&handle)),
            StoreError::ScriptsNotApplied(handle)
        );
        assert!(matches!(map_error(noscript()), StoreError::Script(_)));
    }

    #[test]
    fn noscript_inside_exec_is_not_a_whole_batch_refusal() {
        let e = RedisError::from((ErrorKind::NoScriptError, "NOSCRIPT", "no matching script".to_string()));
        let mapped = map_batch_error(e, Some(&ScriptHandle::of("return 1")));
        assert!(!mapped.is_no_script());
        assert!(matches!(mapped, StoreError::ScriptsNotApplied(_)));
    }

    #[test]
    fn commands_encode_in_order() {
        let mut batch = Batch::new();
        batch.zadd("k", 5, "5:0.1").zrem_range_by_score("k", 0, 4).zcard("k");
        let mut pipe = redis::pipe();
        for command in batch.commands() {
            append(&mut pipe, command);
        }
        let packed = String::from_utf8(pipe.get_packed_pipeline()).unwrap();
        let zadd = packed.find("ZADD").unwrap();
        let zrem = packed.find("ZREMRANGEBYSCORE").unwrap();
        let zcard = packed.find("ZCARD").unwrap();
        assert!(zadd < zrem && zrem < zcard);
    }
}
