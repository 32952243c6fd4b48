//! Storage abstraction for all coordination state.
//!
//! Nothing in `tallystore` keeps shared mutable state in process memory: every
//! hit and every reading lands in a [`Store`], and the store's atomic batch and
//! server-side scripting primitives are what make concurrent callers (threads,
//! processes or machines) safe.
//!
//! The trait is shaped after the Redis primitives the limiter and aggregator
//! need. [`InMemoryStore`] implements it for tests and single-process use; the
//! `tallystore-redis` crate implements it over a real Redis connection.

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fmt;

pub use crate::error::StoreError;

mod memory;
pub use memory::InMemoryStore;

/// Content-addressed handle of a compiled server-side script (SHA-1 hex of its source).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScriptHandle(String);

impl ScriptHandle {
    /// Wrap a digest returned by the store.
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    /// Compute the handle a store assigns to `source`.
    pub fn of(source: &str) -> Self {
        Self(format!("{:x}", Sha1::digest(source.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One store operation queued in a [`Batch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Set one hash field.
    HSet { key: String, field: String, value: String },
    /// Set several hash fields at once.
    HSetMany { key: String, fields: Vec<(String, String)> },
    /// Add `delta` to an integer hash field (absent counts as 0).
    HIncrBy { key: String, field: String, delta: i64 },
    /// Set a key's time-to-live.
    Expire { key: String, seconds: u64 },
    /// Add a member to a set.
    SAdd { key: String, member: String },
    /// Add (or rescore) a sorted-set member.
    ZAdd { key: String, score: i64, member: String },
    /// Remove sorted-set members with `min <= score <= max`.
    ZRemRangeByScore { key: String, min: i64, max: i64 },
    /// Count sorted-set members.
    ZCard { key: String },
    /// Run a compiled script.
    EvalSha { handle: ScriptHandle, keys: Vec<String>, args: Vec<String> },
}

impl Command {
    /// Key the command touches (scripts: their first declared key).
    pub fn key(&self) -> Option<&str> {
        match self {
            Command::HSet { key, .. }
            | Command::HSetMany { key, .. }
            | Command::HIncrBy { key, .. }
            | Command::Expire { key, .. }
            | Command::SAdd { key, .. }
            | Command::ZAdd { key, .. }
            | Command::ZRemRangeByScore { key, .. }
            | Command::ZCard { key } => Some(key),
            Command::EvalSha { keys, .. } => keys.first().map(String::as_str),
        }
    }
}

/// Reply to one command of an executed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Int(i64),
    Nil,
    Bulk(String),
}

impl Reply {
    /// Integer value, if this is an integer reply.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Int(n) => Some(*n),
            _ => None,
        }
    }
}

/// A group of commands applied as one indivisible unit.
///
/// Nothing is sent until the batch is passed to [`Store::exec`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    commands: Vec<Command>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn hset(&mut self, key: &str, field: &str, value: impl Into<String>) -> &mut Self {
        self.push(Command::HSet { key: key.into(), field: field.into(), value: value.into() })
    }

    pub fn hset_many(&mut self, key: &str, fields: Vec<(String, String)>) -> &mut Self {
        self.push(Command::HSetMany { key: key.into(), fields })
    }

    pub fn hincr_by(&mut self, key: &str, field: &str, delta: i64) -> &mut Self {
        self.push(Command::HIncrBy { key: key.into(), field: field.into(), delta })
    }

    pub fn expire(&mut self, key: &str, seconds: u64) -> &mut Self {
        self.push(Command::Expire { key: key.into(), seconds })
    }

    pub fn sadd(&mut self, key: &str, member: impl Into<String>) -> &mut Self {
        self.push(Command::SAdd { key: key.into(), member: member.into() })
    }

    pub fn zadd(&mut self, key: &str, score: i64, member: impl Into<String>) -> &mut Self {
        self.push(Command::ZAdd { key: key.into(), score, member: member.into() })
    }

    pub fn zrem_range_by_score(&mut self, key: &str, min: i64, max: i64) -> &mut Self {
        self.push(Command::ZRemRangeByScore { key: key.into(), min, max })
    }

    pub fn zcard(&mut self, key: &str) -> &mut Self {
        self.push(Command::ZCard { key: key.into() })
    }

    pub fn evalsha(
        &mut self,
        handle: ScriptHandle,
        keys: Vec<String>,
        args: Vec<String>,
    ) -> &mut Self {
        self.push(Command::EvalSha { handle, keys, args })
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Distinct script handles referenced by this batch, in first-use order.
    pub fn script_handles(&self) -> Vec<ScriptHandle> {
        let mut handles: Vec<ScriptHandle> = Vec::new();
        for command in &self.commands {
            if let Command::EvalSha { handle, .. } = command {
                if !handles.contains(handle) {
                    handles.push(handle.clone());
                }
            }
        }
        handles
    }
}

/// Backing store interface.
///
/// Implementations must apply each [`Batch`] atomically with respect to every
/// other batch: no other caller observes a partially applied batch, and a
/// failed batch leaves no effect. A batch referencing a script the store does
/// not know must be refused whole with [`StoreError::NoScript`]. The one
/// exception is a script lost after the batch started applying: the store
/// then reports [`StoreError::ScriptsNotApplied`] and only the script
/// invocations are missing.
#[async_trait]
pub trait Store: Send + Sync {
    /// Apply `batch` as one unit and return one reply per command, in order.
    async fn exec(&self, batch: Batch) -> Result<Vec<Reply>, StoreError>;

    /// Compile a server-side script and return its handle.
    async fn script_load(&self, source: &str) -> Result<ScriptHandle, StoreError>;

    /// All fields of a hash; empty when the key is absent.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// All members of a set; empty when the key is absent.
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;
}
