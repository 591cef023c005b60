use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, warn};
use redis::aio::ConnectionManager;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use crate::backend::realtime::{set_value_at, split_path, value_at, NodeEvent, NodeSubscription, RealtimeStore};
use crate::common::error::{ChatError, ChatResult};

const KEY_PREFIX: &str = "rtdb:";
const KEY_PATTERN: &str = "rtdb:*";
const MAX_WRITE_ATTEMPTS: usize = 16;

/// Realtime store on top of Redis.
///
/// Each `{collection}/{id}` node is one JSON document stored under
/// `rtdb:{collection}/{id}`. A write below a document runs as an optimistic
/// WATCH/MULTI/EXEC transaction that stores the patched document and
/// PUBLISHes it on a channel named like the key. All listeners share a
/// single pub/sub connection pattern-subscribed to `rtdb:*`; incoming
/// documents are routed to listeners by channel.
pub struct RedisRealtimeStore {
    redis_manager: Arc<Mutex<ConnectionManager>>,
    listeners: Arc<Mutex<ListenerTable>>,
}

struct Listener {
    inner_path: Vec<String>,
    last: Value,
    tx: mpsc::UnboundedSender<NodeEvent>,
}

impl Listener {
    /// Forward the node's value from a new document. Returns false once
    /// the subscriber is gone.
    fn offer(&mut self, document: &Value) -> bool {
        let current = value_at(document, &self.inner_path);
        if current == self.last {
            return !self.tx.is_closed();
        }
        self.last = current.clone();
        self.tx.send(NodeEvent::Snapshot(current)).is_ok()
    }
}

#[derive(Default)]
struct ListenerTable {
    by_channel: HashMap<String, Vec<Listener>>,
    closed: bool,
}

impl ListenerTable {
    fn dispatch(&mut self, channel: &str, document: &Value) {
        if let Some(listeners) = self.by_channel.get_mut(channel) {
            listeners.retain_mut(|l| l.offer(document));
            if listeners.is_empty() {
                self.by_channel.remove(channel);
            }
        }
    }

    fn prune(&mut self) {
        self.by_channel.retain(|_, listeners| {
            listeners.retain(|l| !l.tx.is_closed());
            !listeners.is_empty()
        });
    }

    fn close(&mut self, message: &str) {
        self.closed = true;
        for (_, listeners) in self.by_channel.drain() {
            for listener in listeners {
                let _ = listener.tx.send(NodeEvent::Cancelled(message.to_string()));
            }
        }
    }

    fn len(&self) -> usize {
        self.by_channel.values().map(Vec::len).sum()
    }
}

/// Splits a node path into its document key and the path inside the document.
fn document_key(path: &str) -> ChatResult<(String, Vec<String>)> {
    let segments = split_path(path);
    if segments.len() < 2 {
        return Err(ChatError::Remote(format!("path '{}' does not name a document", path)));
    }
    let key = format!("{}{}/{}", KEY_PREFIX, segments[0], segments[1]);
    Ok((key, segments[2..].to_vec()))
}

/// Applies a write to a stored document. Returns the JSON to store
/// (`None` when the document became empty) and the JSON to publish.
fn patch_document(mut document: Value, inner_path: &[String], value: Value) -> ChatResult<(Option<String>, String)> {
    set_value_at(&mut document, inner_path, value);
    let json = serde_json::to_string(&document)?;
    let empty = document.is_null() || document.as_object().map_or(false, |m| m.is_empty());
    Ok((if empty { None } else { Some(json.clone()) }, json))
}

impl RedisRealtimeStore {
    pub async fn connect(redis_url: &str) -> ChatResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let redis_manager = ConnectionManager::new(client.clone()).await?;

        #[allow(deprecated)]
        let mut pubsub = client.get_async_connection().await?.into_pubsub();
        pubsub.psubscribe(KEY_PATTERN).await?;
        info!("[RTDB:REDIS] connected to {}", redis_url);

        let listeners = Arc::new(Mutex::new(ListenerTable::default()));
        let table = Arc::clone(&listeners);
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                let document: Value = match serde_json::from_str(&payload) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("[RTDB:REDIS] unreadable payload on {}: {}", channel, e);
                        continue;
                    }
                };
                table.lock().await.dispatch(&channel, &document);
            }
            warn!("[RTDB:REDIS] pub/sub connection closed");
            table.lock().await.close("Realtime connection closed");
        });

        Ok(Self {
            redis_manager: Arc::new(Mutex::new(redis_manager)),
            listeners,
        })
    }

    pub async fn health_check(&self) -> ChatResult<bool> {
        let mut conn = self.redis_manager.lock().await;
        let pong: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(pong == "PONG")
    }

    /// Listeners currently attached through the shared pub/sub connection.
    pub async fn listener_count(&self) -> usize {
        let mut table = self.listeners.lock().await;
        table.prune();
        table.len()
    }

    async fn load_document(conn: &mut ConnectionManager, key: &str) -> ChatResult<Value> {
        let raw: Option<String> = redis::cmd("GET").arg(key).query_async(conn).await?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Value::Null),
        }
    }

    /// One WATCH/GET/MULTI/EXEC round. `None` when another writer touched
    /// the key in between.
    async fn try_write(
        conn: &mut ConnectionManager,
        key: &str,
        inner_path: &[String],
        value: Value,
    ) -> ChatResult<Option<()>> {
        let _: () = redis::cmd("WATCH").arg(key).query_async(conn).await?;
        let staged = async {
            let document = Self::load_document(conn, key).await?;
            patch_document(document, inner_path, value)
        }
        .await;
        let (stored, published) = match staged {
            Ok(staged) => staged,
            Err(e) => {
                let _: redis::RedisResult<()> = redis::cmd("UNWATCH").query_async(conn).await;
                return Err(e);
            }
        };

        let mut pipe = redis::pipe();
        pipe.atomic();
        match stored {
            Some(json) => pipe.cmd("SET").arg(key).arg(json),
            None => pipe.cmd("DEL").arg(key),
        };
        pipe.cmd("PUBLISH").arg(key).arg(published);
        let committed: Option<(redis::Value, redis::Value)> = pipe.query_async(conn).await?;
        Ok(committed.map(|_| ()))
    }
}

#[async_trait]
impl RealtimeStore for RedisRealtimeStore {
    async fn observe_node(&self, path: &str) -> ChatResult<NodeSubscription> {
        let (key, inner_path) = document_key(path)?;

        // the table stays locked across the read so no published document
        // reaches this listener ahead of its first snapshot
        let mut table = self.listeners.lock().await;
        if table.closed {
            return Err(ChatError::Remote("Realtime connection closed".to_string()));
        }
        table.prune();

        let document = {
            let mut conn = self.redis_manager.lock().await;
            Self::load_document(&mut conn, &key).await?
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let last = value_at(&document, &inner_path);
        let _ = tx.send(NodeEvent::Snapshot(last.clone()));
        table.by_channel.entry(key).or_default().push(Listener { inner_path, last, tx });
        debug!("[RTDB:REDIS] listening on {}", path);

        Ok(NodeSubscription::new(path, rx))
    }

    async fn write_node(&self, path: &str, value: Value) -> ChatResult<()> {
        let (key, inner_path) = document_key(path)?;
        let mut conn = self.redis_manager.lock().await;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            if Self::try_write(&mut conn, &key, &inner_path, value.clone()).await?.is_some() {
                debug!("[RTDB:REDIS] wrote {} (attempt {})", path, attempt);
                return Ok(());
            }
            debug!("[RTDB:REDIS] {} changed during write, retrying", key);
        }
        Err(ChatError::Remote(format!("write to {} kept conflicting", path)))
    }

    async fn push_child(&self, _path: &str) -> ChatResult<String> {
        Ok(uuid::Uuid::new_v4().simple().to_string())
    }
}
