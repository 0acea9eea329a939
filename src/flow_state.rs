//! The opaque user state capability.
//!
//! The engine never inspects a flow's state beyond its `flow_id` accessor;
//! everything else is a caller concern. [`MapState`] is a ready-to-use
//! implementation for callers who would rather not define their own type,
//! built with the same fluent, `#[must_use]`-chained constructor idiom used
//! elsewhere in this crate.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::ids::FlowId;

/// A caller-defined record carried through a flow's execution.
///
/// The only field the engine reads is [`flow_id`](FlowState::flow_id); every
/// other mutation happens inside step and compensation bodies the caller
/// supplies. The `Serialize + DeserializeOwned` bound is what lets the
/// default checkpoint stores persist arbitrary state without the engine
/// knowing its shape.
pub trait FlowState: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    fn flow_id(&self) -> &FlowId;
}

/// A [`FlowState`] backed by a JSON-like map, for callers who don't need a
/// bespoke state type (demos, tests, quick prototypes).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapState {
    flow_id: FlowId,
    fields: BTreeMap<String, Value>,
}

impl MapState {
    #[must_use]
    pub fn new(flow_id: impl Into<FlowId>) -> Self {
        Self {
            flow_id: flow_id.into(),
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn builder(flow_id: impl Into<FlowId>) -> MapStateBuilder {
        MapStateBuilder {
            state: Self::new(flow_id),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.fields.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(Value::as_i64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// Appends `entry` to a `log` array field, creating it if absent.
    ///
    /// Several of the crate's own scenario tests use this to record the
    /// order branches and steps ran in without needing a bespoke state type.
    pub fn push_log(&mut self, entry: impl Into<String>) -> &mut Self {
        let log = self
            .fields
            .entry("log".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(entries) = log {
            entries.push(Value::String(entry.into()));
        }
        self
    }

    #[must_use]
    pub fn log(&self) -> Vec<String> {
        self.fields
            .get("log")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Materializes the `Value` array stored under `key`, or an empty vec if
    /// absent. Intended for use as a `ForEach` collection selector.
    #[must_use]
    pub fn array(&self, key: &str) -> Vec<Value> {
        self.fields
            .get(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }
}

impl FlowState for MapState {
    fn flow_id(&self) -> &FlowId {
        &self.flow_id
    }
}

/// Fluent constructor for [`MapState`], mirroring the `with_*`-chained
/// builders used throughout this crate's definition surface.
pub struct MapStateBuilder {
    state: MapState,
}

impl MapStateBuilder {
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.state.set(key, value);
        self
    }

    #[must_use]
    pub fn build(self) -> MapState {
        self.state
    }
}
