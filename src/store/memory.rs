use super::{Batch, Command, Reply, ScriptHandle, Store, StoreError};
use crate::clock::{Clock, SystemClock};
use crate::script::{ScriptOperation, COMPARE_AND_UPDATE_SOURCE};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Single-process store with the same batch semantics as the Redis backend.
///
/// Every batch runs under one lock against a staged copy of the keys it
/// touches; the copy is written back only if every command succeeds, so a
/// failing batch leaves nothing behind. Keys expire lazily against the
/// injected [`Clock`].
///
/// Only the bundled compare-and-update script can be evaluated. Loading any
/// other source succeeds, but running it fails with [`StoreError::Script`].
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    scripts: HashMap<ScriptHandle, Arc<str>>,
    unavailable: bool,
    fail_next: usize,
    lose_scripts_mid_batch: bool,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<u64>,
}

#[derive(Debug, Clone)]
enum Value {
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
    ZSet(HashMap<String, i64>),
}

impl Entry {
    fn new(value: Value) -> Self {
        Self { value, expires_at: None }
    }

    fn expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn is_empty(&self) -> bool {
        match &self.value {
            Value::Hash(h) => h.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::ZSet(z) => z.is_empty(),
        }
    }
}

type Staged = HashMap<String, Option<Entry>>;

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Use `clock` for TTL bookkeeping.
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self { state: Arc::new(Mutex::new(State::default())), clock: Arc::new(clock) }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop every compiled script, as a store restart would.
    pub fn flush_scripts(&self) {
        self.lock().scripts.clear();
    }

    /// Drop all keys.
    pub fn flush_all(&self) {
        self.lock().entries.clear();
    }

    /// While `true`, every call fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Fail the next `n` calls with [`StoreError::Unavailable`].
    pub fn fail_next(&self, n: usize) {
        self.lock().fail_next = n;
    }

    /// Make the next batch that invokes a script lose every compiled script
    /// after it starts: its other commands apply and it fails with
    /// [`StoreError::ScriptsNotApplied`], as Redis does when a script flush
    /// races a transaction.
    pub fn lose_scripts_during_next_batch(&self) {
        self.lock().lose_scripts_mid_batch = true;
    }

    /// Remaining time-to-live of `key` in milliseconds, if it is live and has one.
    pub fn ttl_millis(&self, key: &str) -> Option<u64> {
        let now = self.clock.now_millis();
        let state = self.lock();
        let entry = state.entries.get(key).filter(|e| !e.expired(now))?;
        entry.expires_at.map(|at| at.saturating_sub(now))
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        let now = self.clock.now_millis();
        self.lock().entries.values().filter(|e| !e.expired(now)).count()
    }
}

impl State {
    fn check_available(&mut self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("in-memory store marked unavailable".into()));
        }
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }

    fn write_back(&mut self, staged: Staged) {
        for (key, entry) in staged {
            match entry {
                Some(entry) if !entry.is_empty() => {
                    self.entries.insert(key, entry);
                }
                _ => {
                    self.entries.remove(&key);
                }
            }
        }
    }

    fn live(&self, key: &str, now: u64) -> Option<&Entry> {
        self.entries.get(key).filter(|e| !e.expired(now))
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Protocol(format!(
        "WRONGTYPE operation against key '{}' holding the wrong kind of value",
        key
    ))
}

fn slot<'a>(staged: &'a mut Staged, key: &str) -> &'a mut Option<Entry> {
    staged.entry(key.to_string()).or_insert(None)
}

fn hash_mut<'a>(
    staged: &'a mut Staged,
    key: &str,
) -> Result<&'a mut HashMap<String, String>, StoreError> {
    let entry = slot(staged, key).get_or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
    match &mut entry.value {
        Value::Hash(h) => Ok(h),
        _ => Err(wrong_type(key)),
    }
}

fn set_mut<'a>(staged: &'a mut Staged, key: &str) -> Result<&'a mut BTreeSet<String>, StoreError> {
    let entry = slot(staged, key).get_or_insert_with(|| Entry::new(Value::Set(BTreeSet::new())));
    match &mut entry.value {
        Value::Set(s) => Ok(s),
        _ => Err(wrong_type(key)),
    }
}

fn zset_mut<'a>(
    staged: &'a mut Staged,
    key: &str,
) -> Result<&'a mut HashMap<String, i64>, StoreError> {
    let entry =
        slot(staged, key).get_or_insert_with(|| Entry::new(Value::ZSet(HashMap::new())));
    match &mut entry.value {
        Value::ZSet(z) => Ok(z),
        _ => Err(wrong_type(key)),
    }
}

fn apply(
    scripts: &HashMap<ScriptHandle, Arc<str>>,
    staged: &mut Staged,
    command: &Command,
    now: u64,
) -> Result<Reply, StoreError> {
    match command {
        Command::HSet { key, field, value } => {
            let added = hash_mut(staged, key)?.insert(field.clone(), value.clone()).is_none();
            Ok(Reply::Int(i64::from(added)))
        }
        Command::HSetMany { key, fields } => {
            let hash = hash_mut(staged, key)?;
            let mut added = 0;
            for (field, value) in fields {
                if hash.insert(field.clone(), value.clone()).is_none() {
                    added += 1;
                }
            }
            Ok(Reply::Int(added))
        }
        Command::HIncrBy { key, field, delta } => {
            let hash = hash_mut(staged, key)?;
            let current = match hash.get(field) {
                Some(raw) => raw.parse::<i64>().map_err(|_| {
                    StoreError::Protocol(format!("hash value {:?} is not an integer", raw))
                })?,
                None => 0,
            };
            let next = current
                .checked_add(*delta)
                .ok_or_else(|| StoreError::Protocol("increment would overflow".into()))?;
            hash.insert(field.clone(), next.to_string());
            Ok(Reply::Int(next))
        }
        Command::Expire { key, seconds } => match slot(staged, key) {
            Some(entry) => {
                entry.expires_at = Some(now.saturating_add(seconds.saturating_mul(1000)));
                Ok(Reply::Int(1))
            }
            None => Ok(Reply::Int(0)),
        },
        Command::SAdd { key, member } => {
            let added = set_mut(staged, key)?.insert(member.clone());
            Ok(Reply::Int(i64::from(added)))
        }
        Command::ZAdd { key, score, member } => {
            let added = zset_mut(staged, key)?.insert(member.clone(), *score).is_none();
            Ok(Reply::Int(i64::from(added)))
        }
        Command::ZRemRangeByScore { key, min, max } => match slot(staged, key) {
            None => Ok(Reply::Int(0)),
            Some(Entry { value: Value::ZSet(z), .. }) => {
                let before = z.len();
                z.retain(|_, score| *score < *min || *score > *max);
                Ok(Reply::Int((before - z.len()) as i64))
            }
            Some(_) => Err(wrong_type(key)),
        },
        Command::ZCard { key } => match slot(staged, key) {
            None => Ok(Reply::Int(0)),
            Some(Entry { value: Value::ZSet(z), .. }) => Ok(Reply::Int(z.len() as i64)),
            Some(_) => Err(wrong_type(key)),
        },
        Command::EvalSha { handle, keys, args } => {
            let source = scripts.get(handle).ok_or_else(|| StoreError::NoScript(handle.clone()))?;
            if source.trim() != COMPARE_AND_UPDATE_SOURCE.trim() {
                return Err(StoreError::Script(format!(
                    "in-memory store cannot evaluate script {}",
                    handle
                )));
            }
            let key = keys
                .first()
                .ok_or_else(|| StoreError::Script("compare-and-update needs one key".into()))?;
            compare_and_update(hash_mut(staged, key)?, args)
        }
    }
}

/// Native rendition of `scripts/compare_and_update.lua`.
fn compare_and_update(
    hash: &mut HashMap<String, String>,
    args: &[String],
) -> Result<Reply, StoreError> {
    let [field, value, op] = args else {
        return Err(StoreError::Script(format!(
            "compare-and-update expects 3 arguments, got {}",
            args.len()
        )));
    };
    let op = ScriptOperation::from_symbol(op)
        .ok_or_else(|| StoreError::Script(format!("unknown comparison {:?}", op)))?;
    let candidate: f64 =
        value.parse().map_err(|_| StoreError::Script(format!("{:?} is not a number", value)))?;
    let replace = match hash.get(field) {
        None => true,
        Some(raw) => {
            let current: f64 = raw
                .parse()
                .map_err(|_| StoreError::Script(format!("{:?} is not a number", raw)))?;
            op.holds(candidate, current)
        }
    };
    if replace {
        hash.insert(field.clone(), value.clone());
    }
    Ok(Reply::Int(i64::from(replace)))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn exec(&self, batch: Batch) -> Result<Vec<Reply>, StoreError> {
        let now = self.clock.now_millis();
        let mut state = self.lock();
        state.check_available()?;

        if let Some(missing) =
            batch.script_handles().into_iter().find(|h| !state.scripts.contains_key(h))
        {
            return Err(StoreError::NoScript(missing));
        }

        let mut staged = Staged::new();
        for command in batch.commands() {
            let keys: Vec<&str> = match command {
                Command::EvalSha { keys, .. } => keys.iter().map(String::as_str).collect(),
                other => other.key().into_iter().collect(),
            };
            for key in keys {
                if !staged.contains_key(key) {
                    staged.insert(key.to_string(), state.live(key, now).cloned());
                }
            }
        }

        let handles = batch.script_handles();
        if state.lose_scripts_mid_batch && !handles.is_empty() {
            state.lose_scripts_mid_batch = false;
            state.scripts.clear();
            for command in batch.commands() {
                if !matches!(command, Command::EvalSha { .. }) {
                    apply(&state.scripts, &mut staged, command, now)?;
                }
            }
            state.write_back(staged);
            return Err(StoreError::ScriptsNotApplied(handles[0].clone()));
        }

        let mut replies = Vec::with_capacity(batch.len());
        for command in batch.commands() {
            replies.push(apply(&state.scripts, &mut staged, command, now)?);
        }
        state.write_back(staged);
        Ok(replies)
    }

    async fn script_load(&self, source: &str) -> Result<ScriptHandle, StoreError> {
        let mut state = self.lock();
        state.check_available()?;
        let handle = ScriptHandle::of(source);
        state.scripts.insert(handle.clone(), Arc::from(source));
        Ok(handle)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let now = self.clock.now_millis();
        let mut state = self.lock();
        state.check_available()?;
        match state.live(key, now) {
            None => Ok(HashMap::new()),
            Some(Entry { value: Value::Hash(h), .. }) => Ok(h.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now_millis();
        let mut state = self.lock();
        state.check_available()?;
        match state.live(key, now) {
            None => Ok(Vec::new()),
            Some(Entry { value: Value::Set(s), .. }) => Ok(s.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }
}
