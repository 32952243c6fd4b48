//! Server-side compare-and-update of numeric hash fields.
//!
//! A client-side "read field, compare, write field" sequence loses updates
//! under concurrent writers. [`CompareAndUpdate`] instead enqueues a script
//! invocation into an open [`Batch`]; the store evaluates the comparison and
//! the write as one step when the batch commits.

use crate::adaptive::DynamicConfig;
use crate::error::{StoreError, TallyError};
use crate::store::{Batch, ScriptHandle, Store};
use std::path::Path;
use std::sync::Arc;

/// Source of the bundled compare-and-update script.
pub const COMPARE_AND_UPDATE_SOURCE: &str = include_str!("../scripts/compare_and_update.lua");

/// Comparison applied by the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOperation {
    /// Overwrite when the candidate is strictly greater.
    GreaterThan,
    /// Overwrite when the candidate is strictly less.
    LessThan,
}

impl ScriptOperation {
    /// Operator symbol passed to the script.
    pub fn symbol(self) -> &'static str {
        match self {
            ScriptOperation::GreaterThan => ">",
            ScriptOperation::LessThan => "<",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            ">" => Some(ScriptOperation::GreaterThan),
            "<" => Some(ScriptOperation::LessThan),
            _ => None,
        }
    }

    /// Whether `candidate` should replace `current`.
    pub fn holds(self, candidate: f64, current: f64) -> bool {
        match self {
            ScriptOperation::GreaterThan => candidate > current,
            ScriptOperation::LessThan => candidate < current,
        }
    }
}

/// Compiled compare-and-update script.
///
/// Cheap to clone; clones share the cached handle, so a [`reload`](Self::reload)
/// through one clone is seen by all of them.
#[derive(Debug, Clone)]
pub struct CompareAndUpdate {
    source: Arc<str>,
    handle: DynamicConfig<ScriptHandle>,
}

impl CompareAndUpdate {
    /// Read the script from `path` and compile it on `store`.
    ///
    /// # Errors
    /// [`TallyError::Configuration`] if the file cannot be read; a store error
    /// if compilation fails.
    pub async fn load<S>(store: &S, path: impl AsRef<Path>) -> Result<Self, TallyError>
    where
        S: Store + ?Sized,
    {
        let path = path.as_ref();
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| TallyError::Configuration { path: path.to_path_buf(), source })?;
        Ok(Self::from_source(store, source).await?)
    }

    /// Compile the script shipped with this crate.
    pub async fn bundled<S>(store: &S) -> Result<Self, StoreError>
    where
        S: Store + ?Sized,
    {
        Self::from_source(store, COMPARE_AND_UPDATE_SOURCE).await
    }

    pub async fn from_source<S>(store: &S, source: impl Into<Arc<str>>) -> Result<Self, StoreError>
    where
        S: Store + ?Sized,
    {
        let source = source.into();
        let handle = store.script_load(&source).await?;
        tracing::debug!(target: "tallystore::script", handle = %handle, "compare-and-update script loaded");
        Ok(Self { source, handle: DynamicConfig::new(handle) })
    }

    /// Handle currently used for invocations.
    pub fn handle(&self) -> ScriptHandle {
        self.handle.get().as_ref().clone()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Recompile after the store reported the handle unknown (e.g. it restarted).
    pub async fn reload<S>(&self, store: &S) -> Result<ScriptHandle, StoreError>
    where
        S: Store + ?Sized,
    {
        let handle = store.script_load(&self.source).await?;
        tracing::warn!(target: "tallystore::script", handle = %handle, "compare-and-update script recompiled");
        self.handle.set(handle.clone());
        Ok(handle)
    }

    /// Queue "set `field` to `value` if absent or `value` > current".
    pub fn update_if_greater(&self, batch: &mut Batch, key: &str, field: &str, value: f64) {
        self.update(batch, key, field, value, ScriptOperation::GreaterThan);
    }

    /// Queue "set `field` to `value` if absent or `value` < current".
    pub fn update_if_less(&self, batch: &mut Batch, key: &str, field: &str, value: f64) {
        self.update(batch, key, field, value, ScriptOperation::LessThan);
    }

    pub fn update(
        &self,
        batch: &mut Batch,
        key: &str,
        field: &str,
        value: f64,
        op: ScriptOperation,
    ) {
        batch.evalsha(
            self.handle(),
            vec![key.to_string()],
            vec![field.to_string(), value.to_string(), op.symbol().to_string()],
        );
    }
}
