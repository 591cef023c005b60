use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex};

use crate::common::error::{ChatError, ChatResult};

/// What a realtime listener receives.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// Full current value of the observed node (`Null` when absent).
    Snapshot(Value),
    /// The backend dropped the listener; nothing follows.
    Cancelled(String),
}

/// A continuous listener on one node. Dropping it detaches the listener.
#[derive(Debug)]
pub struct NodeSubscription {
    path: String,
    events: mpsc::UnboundedReceiver<NodeEvent>,
}

impl NodeSubscription {
    pub fn new(path: impl Into<String>, events: mpsc::UnboundedReceiver<NodeEvent>) -> Self {
        Self { path: path.into(), events }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn next(&mut self) -> Option<NodeEvent> {
        self.events.recv().await
    }
}

/// Hierarchical key-value store with live listeners.
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// Attach a listener. The current value is delivered first, then every change.
    async fn observe_node(&self, path: &str) -> ChatResult<NodeSubscription>;
    /// Replace the value at `path`; `Value::Null` removes it.
    async fn write_node(&self, path: &str, value: Value) -> ChatResult<()>;
    /// Allocate a fresh child key under `path` without writing anything.
    async fn push_child(&self, path: &str) -> ChatResult<String>;
}

pub fn split_path(path: &str) -> Vec<String> {
    path.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect()
}

pub fn child_path(parent: &str, child: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), child)
}

pub(crate) fn value_at(node: &Value, segments: &[String]) -> Value {
    let mut current = node;
    for segment in segments {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// Writes `value` below `node`, creating objects on the way and pruning
/// parents that end up empty after a removal.
pub(crate) fn set_value_at(node: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else { return };
    if rest.is_empty() {
        if value.is_null() {
            map.remove(head);
        } else {
            map.insert(head.clone(), value);
        }
        return;
    }
    let child = map.entry(head.clone()).or_insert(Value::Null);
    set_value_at(child, rest, value);
    let empty = child.is_null() || child.as_object().map_or(false, |m| m.is_empty());
    if empty {
        map.remove(head);
    }
}

struct Observer {
    segments: Vec<String>,
    last: Value,
    tx: mpsc::UnboundedSender<NodeEvent>,
}

#[derive(Default)]
struct Tree {
    root: Value,
    observers: Vec<Observer>,
    failing_writes: Vec<String>,
    failing_deletes: Vec<String>,
    rejected_observers: HashMap<String, String>,
}

impl Tree {
    fn notify(&mut self, written: &[String]) {
        let root = &self.root;
        self.observers.retain_mut(|observer| {
            let related = observer.segments.starts_with(written) || written.starts_with(&observer.segments);
            if !related {
                return !observer.tx.is_closed();
            }
            let current = value_at(root, &observer.segments);
            if current == observer.last {
                return !observer.tx.is_closed();
            }
            observer.last = current.clone();
            observer.tx.send(NodeEvent::Snapshot(current)).is_ok()
        });
    }
}

/// Process-local realtime store. Cloning shares the same tree.
///
/// Besides the store contract it can inject write failures and listener
/// cancellations, which is how the aggregator's failure paths are exercised.
#[derive(Clone, Default)]
pub struct InMemoryRealtimeStore {
    inner: Arc<Mutex<Tree>>,
}

impl InMemoryRealtimeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn read_node(&self, path: &str) -> Value {
        let tree = self.inner.lock().await;
        value_at(&tree.root, &split_path(path))
    }

    /// Non-null writes at or below `prefix` fail from now on.
    pub async fn fail_writes_under(&self, prefix: &str) {
        self.inner.lock().await.failing_writes.push(prefix.to_string());
    }

    /// Removals (null writes) at or below `prefix` fail from now on.
    pub async fn fail_deletes_under(&self, prefix: &str) {
        self.inner.lock().await.failing_deletes.push(prefix.to_string());
    }

    /// `observe_node(path)` is refused with `message`.
    pub async fn reject_observers_at(&self, path: &str, message: &str) {
        self.inner
            .lock()
            .await
            .rejected_observers
            .insert(split_path(path).join("/"), message.to_string());
    }

    pub async fn clear_failures(&self) {
        let mut tree = self.inner.lock().await;
        tree.failing_writes.clear();
        tree.failing_deletes.clear();
        tree.rejected_observers.clear();
    }

    /// Cancel every listener attached exactly at `path`. Returns how many were cancelled.
    pub async fn cancel_observers(&self, path: &str, message: &str) -> usize {
        let segments = split_path(path);
        let mut tree = self.inner.lock().await;
        let mut cancelled = 0;
        tree.observers.retain(|observer| {
            if observer.segments != segments {
                return true;
            }
            let _ = observer.tx.send(NodeEvent::Cancelled(message.to_string()));
            cancelled += 1;
            false
        });
        debug!("[RTDB:MEM] cancelled {} listener(s) on {}", cancelled, path);
        cancelled
    }

    /// Live listeners attached exactly at `path`.
    pub async fn observer_count(&self, path: &str) -> usize {
        let segments = split_path(path);
        let mut tree = self.inner.lock().await;
        tree.observers.retain(|observer| !observer.tx.is_closed());
        tree.observers.iter().filter(|o| o.segments == segments).count()
    }
}

#[async_trait]
impl RealtimeStore for InMemoryRealtimeStore {
    async fn observe_node(&self, path: &str) -> ChatResult<NodeSubscription> {
        let segments = split_path(path);
        let mut tree = self.inner.lock().await;
        if let Some(message) = tree.rejected_observers.get(&segments.join("/")) {
            return Err(ChatError::Remote(message.clone()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let current = value_at(&tree.root, &segments);
        let _ = tx.send(NodeEvent::Snapshot(current.clone()));
        tree.observers.push(Observer { segments, last: current, tx });
        Ok(NodeSubscription::new(path, rx))
    }

    async fn write_node(&self, path: &str, value: Value) -> ChatResult<()> {
        let segments = split_path(path);
        let mut tree = self.inner.lock().await;
        let failing = if value.is_null() { &tree.failing_deletes } else { &tree.failing_writes };
        if failing.iter().any(|prefix| path.starts_with(prefix.as_str())) {
            warn!("[RTDB:MEM] injected failure writing {}", path);
            return Err(ChatError::Remote(format!("write to {} rejected", path)));
        }
        set_value_at(&mut tree.root, &segments, value);
        tree.notify(&segments);
        Ok(())
    }

    async fn push_child(&self, _path: &str) -> ChatResult<String> {
        Ok(uuid::Uuid::new_v4().simple().to_string())
    }
}
