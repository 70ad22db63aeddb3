// Store - the data reflected to the dashboards
//
// Holds two trees: `$config` (dash, tabs, grids, widgets) which determines the
// structure of the dashboard, and the server data (`sd`) being visualized.
// Every structural change funnels through `mutate`, which applies it locally
// and then either publishes the touched topic or queues it until
// `stop_queueing`.

mod path;
mod structure;

pub use path::{lookup, split_path, walk_tree};

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::model::{CONFIG_PREFIX, DEFAULT_TITLE};
use crate::sink::EventSink;
use path::{parse_index, type_name};

/// Single error kind for all store and path contract violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0}")]
    Path(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Duplicate(String),

    #[error("{0}")]
    Invalid(String),
}

/// One low-level config change: `path` is relative to `$config`, `None` deletes
#[derive(Clone, Debug, PartialEq)]
pub struct Mutation {
    pub path: String,
    pub value: Option<Value>,
}

impl Mutation {
    pub fn set(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: None,
        }
    }

    /// The emittable unit touched by this mutation: `dash`, or `<collection>/<id>`
    pub fn topic(&self) -> String {
        let segs = split_path(&self.path);
        match segs.as_slice() {
            [] => String::new(),
            ["dash", ..] => "dash".to_string(),
            [collection] => collection.to_string(),
            [collection, id, ..] => format!("{collection}/{id}"),
        }
    }
}

pub struct Store {
    config: Value,
    sd: Value,
    sink: Arc<dyn EventSink>,
    default_title: String,
    // during a deploy mutations are queued because a ton of stuff gets ripped
    // out and reinstated; by queueing only the final version is sent.
    // Each queued topic keeps its value from before the first queued change.
    do_queue: bool,
    queued: BTreeMap<String, Option<Value>>,
}

impl Store {
    /// Create a store seeded with `config`; a config without `dash.title`
    /// is replaced by an empty dashboard.
    pub fn new(config: Value, sink: Arc<dyn EventSink>) -> Self {
        Self::with_default_title(config, DEFAULT_TITLE, sink)
    }

    /// Like [`Store::new`], naming the dashboard `title` when the seed has no title
    pub fn with_default_title(config: Value, title: &str, sink: Arc<dyn EventSink>) -> Self {
        let has_title = config
            .pointer("/dash/title")
            .and_then(Value::as_str)
            .is_some_and(|t| !t.is_empty());
        let mut store = Self {
            config,
            sd: Value::Object(Map::new()),
            sink,
            default_title: title.to_string(),
            do_queue: false,
            queued: BTreeMap::new(),
        };
        if has_title {
            store.ensure_collections();
        } else {
            store.init_dash();
        }
        store
    }

    /// Reset the config to an empty dashboard
    pub fn init_dash(&mut self) {
        self.config = json!({
            "dash": { "title": self.default_title, "tabs": [] },
            "tabs": {},
            "grids": {},
            "widgets": {},
        });
    }

    fn ensure_collections(&mut self) {
        if let Value::Object(map) = &mut self.config {
            for key in ["tabs", "grids", "widgets"] {
                let slot = map
                    .entry(key.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
            }
        }
    }

    /// Title used for a dashboard that has none
    pub fn default_title(&self) -> &str {
        &self.default_title
    }

    pub fn config(&self) -> &Value {
        &self.config
    }

    pub fn server_data(&self) -> &Value {
        &self.sd
    }

    // =========================================================================
    // Path based access
    // =========================================================================

    /// Split `path`, pick the tree it addresses and walk to the parent of the
    /// final segment. Returns the parent node and the final segment.
    fn prep_update<'a, 'p>(
        &'a mut self,
        path: &'p str,
    ) -> Result<(&'a mut Value, &'p str), StoreError> {
        let (root, mut segs) = Self::route(&mut self.config, &mut self.sd, path)?;
        let last = segs
            .pop()
            .ok_or_else(|| StoreError::Path("Cannot replace entire hierarchy".into()))?;
        let dir = walk_tree(root, &segs)?;
        Ok((dir, last))
    }

    fn route<'a, 'p>(
        config: &'a mut Value,
        sd: &'a mut Value,
        path: &'p str,
    ) -> Result<(&'a mut Value, Vec<&'p str>), StoreError> {
        let mut segs = split_path(path);
        if segs.is_empty() {
            return Err(StoreError::Path("Cannot replace entire hierarchy".into()));
        }
        if segs[0] == CONFIG_PREFIX {
            if segs.len() == 1 {
                return Err(StoreError::Path(format!(
                    "Cannot replace entire {CONFIG_PREFIX}"
                )));
            }
            segs.remove(0);
            return Ok((config, segs));
        }
        Ok((sd, segs))
    }

    /// Set the value at `path`, creating object levels as needed.
    ///
    /// If the parent level is an array the final segment must be an index:
    /// an existing element is replaced, one past the end appends.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), StoreError> {
        self.apply(path, Some(value))
    }

    /// Delete the value at `path`; array elements cannot be deleted this way
    pub fn unset(&mut self, path: &str) -> Result<(), StoreError> {
        self.apply(path, None)
    }

    fn apply(&mut self, path: &str, value: Option<Value>) -> Result<(), StoreError> {
        let (dir, p) = self.prep_update(path)?;
        match dir {
            Value::Array(items) => {
                let ix = parse_index(p)
                    .ok_or_else(|| StoreError::Path(format!("Array index '{p}' is not a number")))?;
                let len = items.len() as i64;
                match value {
                    None if (0..=len).contains(&ix) => Err(StoreError::Path(format!(
                        "Cannot delete array element '{ix}' in '{path}'"
                    ))),
                    Some(v) if (0..len).contains(&ix) => {
                        items[ix as usize] = v;
                        Ok(())
                    }
                    Some(v) if ix == len => {
                        items.push(v);
                        Ok(())
                    }
                    _ => Err(StoreError::Path(format!(
                        "Array index '{ix}' in '{path}' > {len}"
                    ))),
                }
            }
            Value::Object(map) => {
                match value {
                    Some(v) => {
                        map.insert(p.to_string(), v);
                    }
                    None => {
                        map.remove(p);
                    }
                }
                Ok(())
            }
            other => Err(StoreError::Path(format!(
                "Parent of '{path}' is neither Array nor Object: {}",
                type_name(other)
            ))),
        }
    }

    /// Read the value at `path` without creating any intermediate level
    pub fn get(&self, path: &str) -> Result<Option<&Value>, StoreError> {
        let mut segs = split_path(path);
        if segs.is_empty() {
            return Err(StoreError::Path("Cannot access entire hierarchy".into()));
        }
        let root = if segs[0] == CONFIG_PREFIX {
            if segs.len() == 1 {
                return Err(StoreError::Path(format!(
                    "Cannot access entire {CONFIG_PREFIX}"
                )));
            }
            segs.remove(0);
            &self.config
        } else {
            &self.sd
        };
        lookup(root, &segs)
    }

    /// Resolve `path` to its slot, creating an empty array there if nothing exists
    fn array_slot(&mut self, path: &str) -> Result<&mut Vec<Value>, StoreError> {
        let (dir, p) = self.prep_update(path)?;
        let slot = match dir {
            Value::Object(map) => map.entry(p.to_string()).or_insert(Value::Null),
            Value::Array(items) => {
                let len = items.len();
                let ix = parse_index(p)
                    .filter(|ix| *ix >= 0 && (*ix as usize) < len)
                    .ok_or_else(|| StoreError::Path(format!("Array index '{p}' in '{path}' > {len}")))?;
                &mut items[ix as usize]
            }
            other => {
                return Err(StoreError::Path(format!(
                    "Parent of '{path}' is neither Array nor Object: {}",
                    type_name(other)
                )))
            }
        };
        if slot.is_null() {
            *slot = Value::Array(Vec::new());
        }
        match slot {
            Value::Array(items) => Ok(items),
            other => Err(StoreError::Invalid(format!(
                "Cannot push onto '{path}': {}",
                type_name(other)
            ))),
        }
    }

    /// Append `value` to the array at `path`, creating the array if absent
    pub fn push(&mut self, path: &str, value: Value) -> Result<(), StoreError> {
        self.array_slot(path)?.push(value);
        Ok(())
    }

    /// Remove and return the first element of the array at `path`
    pub fn shift(&mut self, path: &str) -> Result<Option<Value>, StoreError> {
        let (dir, p) = self.prep_update(path)?;
        let slot = match dir {
            Value::Object(map) => map.get_mut(p),
            Value::Array(items) => parse_index(p)
                .and_then(|ix| usize::try_from(ix).ok())
                .and_then(|ix| items.get_mut(ix)),
            _ => None,
        };
        match slot {
            Some(Value::Array(items)) if items.is_empty() => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items.remove(0))),
            _ => Err(StoreError::Invalid(format!("Cannot shift '{path}'"))),
        }
    }

    // =========================================================================
    // Mutation queueing and broadcast
    // =========================================================================

    pub fn is_queueing(&self) -> bool {
        self.do_queue
    }

    pub fn set_queueing(&mut self, queue: bool) {
        self.do_queue = queue;
    }

    /// Topics waiting for `stop_queueing`
    pub fn queued_topics(&self) -> impl Iterator<Item = &str> {
        self.queued.keys().map(String::as_str)
    }

    /// Central choke point for config changes: apply `mutations` locally,
    /// then publish (or queue) the topics they touch.
    ///
    /// The tagline only serves diagnostics. If one mutation fails, the ones
    /// already applied are still published and the error is returned.
    pub fn mutate(&mut self, tagline: &str, mutations: Vec<Mutation>) -> Result<(), StoreError> {
        debug!(tagline, count = mutations.len(), "config mutation");
        let mut topics = Vec::with_capacity(mutations.len());
        let mut failure = None;
        for m in mutations {
            let topic = m.topic();
            let full = format!("{CONFIG_PREFIX}/{}", m.path);
            if self.do_queue && !self.queued.contains_key(&topic) {
                let before = self.topic_value(&topic).cloned();
                self.queued.insert(topic.clone(), before);
            }
            if let Err(e) = self.apply(&full, m.value) {
                failure = Some(e);
                break;
            }
            topics.push(topic);
        }

        if !self.do_queue {
            for topic in topics {
                self.send_mutation(&topic);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Publish the current value of a config topic. Deleted entities are
    /// published as null.
    fn send_mutation(&self, topic: &str) {
        let null = Value::Null;
        self.sink.publish(
            &format!("{CONFIG_PREFIX}/{topic}"),
            self.topic_value(topic).unwrap_or(&null),
        );
    }

    fn topic_value(&self, topic: &str) -> Option<&Value> {
        lookup(&self.config, &split_path(topic)).ok().flatten()
    }

    /// Flush every queued topic once with its current value and leave queue
    /// mode. Topics that ended up back at their value from before queueing
    /// are not sent.
    pub fn stop_queueing(&mut self) {
        let queued = std::mem::take(&mut self.queued);
        let changed: Vec<&String> = queued
            .iter()
            .filter(|(topic, before)| self.topic_value(topic) != before.as_ref())
            .map(|(topic, _)| topic)
            .collect();
        if !queued.is_empty() {
            debug!(count = queued.len(), changed = changed.len(), "flushing queued mutations");
        }
        for topic in changed {
            self.send_mutation(topic);
        }
        self.do_queue = false;
    }
}
