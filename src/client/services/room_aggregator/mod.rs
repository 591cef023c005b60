//! Live room list.
//!
//! One listener watches the user's membership entry. Every room it names gets
//! a subscription set of four listeners: the whole record plus the
//! `last_message`, `last_message_time` and `updated_at` fields. All listener
//! tasks forward into a single reducer task which owns the room map and
//! republishes the sorted list after every change.

mod creation;

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::backend::{DocumentStore, LocalCache, NodeEvent, NodeSubscription, RealtimeStore};
use crate::client::models::{Observable, RoomListState};
use crate::common::error::{ChatError, ChatResult};
use crate::common::models::{value_as_string, ChatRoom, RoomField};

pub use creation::CREATE_FAILED_MESSAGE;

pub const ROOMS_ROOT: &str = "chatRooms";
pub const MEMBERSHIP_ROOT: &str = "userChats";

pub fn room_path(room_id: &str) -> String {
    format!("{}/{}", ROOMS_ROOT, room_id)
}

pub fn membership_path(membership_key: &str) -> String {
    format!("{}/{}", MEMBERSHIP_ROOT, membership_key)
}

#[derive(Debug, Clone, Default)]
pub struct AggregatorOptions {
    /// Also write field patches to the local cache once the first batch is stored.
    pub persist_incremental_updates: bool,
}

/// Newest `updated_at` first, compared as plain strings. Rooms without a
/// timestamp go last; equal timestamps fall back to the room id.
pub fn compare_rooms(a: &ChatRoom, b: &ChatRoom) -> Ordering {
    match (&a.updated_at, &b.updated_at) {
        (Some(x), Some(y)) => y.cmp(x).then_with(|| a.room_id.cmp(&b.room_id)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.room_id.cmp(&b.room_id),
    }
}

/// Room ids referenced by a membership snapshot, first occurrence order.
fn membership_room_ids(snapshot: &Value) -> Vec<String> {
    let values: Vec<&Value> = match snapshot {
        Value::Object(map) => map.values().collect(),
        Value::Array(items) => items.iter().collect(),
        _ => Vec::new(),
    };
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter_map(value_as_string)
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

#[derive(Debug)]
enum RoomEvent {
    Membership(Value),
    Room { room_id: String, value: Value },
    Field { room_id: String, field: RoomField, value: Value },
    Cancelled { path: String, message: String },
}

/// A spawned listener. Dropping it detaches the listener.
struct ListenerTask(JoinHandle<()>);

impl Drop for ListenerTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn forward<F>(mut subscription: NodeSubscription, events: mpsc::UnboundedSender<RoomEvent>, to_event: F) -> ListenerTask
where
    F: Fn(Value) -> RoomEvent + Send + 'static,
{
    ListenerTask(tokio::spawn(async move {
        while let Some(event) = subscription.next().await {
            let (event, last) = match event {
                NodeEvent::Snapshot(value) => (to_event(value), false),
                NodeEvent::Cancelled(message) => {
                    (RoomEvent::Cancelled { path: subscription.path().to_string(), message }, true)
                }
            };
            if events.send(event).is_err() || last {
                break;
            }
        }
    }))
}

/// The four listeners of one tracked room.
struct RoomSubscription {
    _listeners: Vec<ListenerTask>,
}

enum InitialBatch {
    AwaitingMembership,
    Pending(HashSet<String>),
    Persisted,
}

/// Reducer-owned state. Lives inside the reducer task only.
struct Aggregation {
    realtime: Arc<dyn RealtimeStore>,
    cache: Arc<dyn LocalCache>,
    state: Observable<RoomListState>,
    options: AggregatorOptions,
    events: mpsc::UnboundedSender<RoomEvent>,
    rooms: HashMap<String, ChatRoom>,
    subscriptions: HashMap<String, RoomSubscription>,
    initial: InitialBatch,
    _membership: ListenerTask,
}

impl Aggregation {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<RoomEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
    }

    async fn handle(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Membership(snapshot) => self.apply_membership(&snapshot).await,
            RoomEvent::Room { room_id, value } => {
                if !self.subscriptions.contains_key(&room_id) {
                    return;
                }
                if value.is_null() {
                    debug!("[ROOMS] record {} removed", room_id);
                    self.rooms.remove(&room_id);
                } else {
                    self.rooms.insert(room_id.clone(), ChatRoom::from_record(&room_id, &value));
                }
                self.publish();
                self.settle(&room_id).await;
                self.persist_incremental(&room_id).await;
            }
            RoomEvent::Field { room_id, field, value } => {
                let Some(room) = self.rooms.get_mut(&room_id) else {
                    debug!("[ROOMS] {} patch for untracked room {} dropped", field.key(), room_id);
                    return;
                };
                room.apply_field(field, &value);
                self.publish();
                self.persist_incremental(&room_id).await;
            }
            RoomEvent::Cancelled { path, message } => {
                warn!("[ROOMS] listener on {} cancelled: {}", path, message);
                if let Some(room_id) = path.strip_prefix(&format!("{}/", ROOMS_ROOT)) {
                    if !room_id.contains('/') {
                        let room_id = room_id.to_string();
                        self.settle(&room_id).await;
                    }
                }
                self.report(ChatError::Cancelled { path, message });
            }
        }
    }

    async fn apply_membership(&mut self, snapshot: &Value) {
        let ids = membership_room_ids(snapshot);
        let wanted: HashSet<&String> = ids.iter().collect();

        let released: Vec<String> = self
            .subscriptions
            .keys()
            .filter(|id| !wanted.contains(id))
            .cloned()
            .collect();
        for room_id in &released {
            info!("[ROOMS] releasing {}", room_id);
            self.subscriptions.remove(room_id);
            self.rooms.remove(room_id);
            if let InitialBatch::Pending(pending) = &mut self.initial {
                pending.remove(room_id);
            }
        }

        if matches!(self.initial, InitialBatch::AwaitingMembership) {
            self.initial = InitialBatch::Pending(ids.iter().cloned().collect());
        }

        for room_id in &ids {
            if !self.subscriptions.contains_key(room_id) {
                self.track_room(room_id).await;
            }
        }

        self.state.update(|s| s.ui.is_loading = false);
        self.publish();
        self.persist_initial_batch().await;
    }

    async fn track_room(&mut self, room_id: &str) {
        let mut listeners = Vec::with_capacity(1 + RoomField::ALL.len());

        let record_path = room_path(room_id);
        match self.realtime.observe_node(&record_path).await {
            Ok(subscription) => {
                let id = room_id.to_string();
                listeners.push(forward(subscription, self.events.clone(), move |value| RoomEvent::Room {
                    room_id: id.clone(),
                    value,
                }));
            }
            Err(e) => {
                warn!("[ROOMS] cannot listen on {}: {}", record_path, e);
                if let InitialBatch::Pending(pending) = &mut self.initial {
                    pending.remove(room_id);
                }
                self.report(e);
            }
        }

        for field in RoomField::ALL {
            let field_path = format!("{}/{}", record_path, field.key());
            match self.realtime.observe_node(&field_path).await {
                Ok(subscription) => {
                    let id = room_id.to_string();
                    listeners.push(forward(subscription, self.events.clone(), move |value| RoomEvent::Field {
                        room_id: id.clone(),
                        field,
                        value,
                    }));
                }
                Err(e) => {
                    warn!("[ROOMS] cannot listen on {}: {}", field_path, e);
                    self.report(e);
                }
            }
        }

        debug!("[ROOMS] tracking {} with {} listener(s)", room_id, listeners.len());
        self.subscriptions.insert(room_id.to_string(), RoomSubscription { _listeners: listeners });
    }

    /// The room delivered its first record (or never will).
    async fn settle(&mut self, room_id: &str) {
        if let InitialBatch::Pending(pending) = &mut self.initial {
            pending.remove(room_id);
        }
        self.persist_initial_batch().await;
    }

    async fn persist_initial_batch(&mut self) {
        let InitialBatch::Pending(pending) = &self.initial else { return };
        if !pending.is_empty() {
            return;
        }
        self.initial = InitialBatch::Persisted;
        let rooms: Vec<ChatRoom> = self.rooms.values().cloned().collect();
        if rooms.is_empty() {
            return;
        }
        match self.cache.upsert_rooms(&rooms).await {
            Ok(()) => info!("[ROOMS] cached initial batch of {} room(s)", rooms.len()),
            Err(e) => warn!("[ROOMS] failed to cache rooms: {}", e),
        }
    }

    async fn persist_incremental(&self, room_id: &str) {
        if !self.options.persist_incremental_updates || !matches!(self.initial, InitialBatch::Persisted) {
            return;
        }
        let Some(room) = self.rooms.get(room_id) else { return };
        if let Err(e) = self.cache.upsert_rooms(std::slice::from_ref(room)).await {
            warn!("[ROOMS] failed to cache {}: {}", room_id, e);
        }
    }

    fn publish(&self) {
        let mut rooms: Vec<ChatRoom> = self.rooms.values().cloned().collect();
        rooms.sort_by(compare_rooms);
        self.state.update(|s| s.rooms = rooms);
    }

    fn report(&self, error: ChatError) {
        let message = error.user_message();
        self.state.update(|s| {
            s.ui.is_loading = false;
            s.ui.error = Some(message);
        });
    }
}

struct Session {
    membership_key: String,
    reducer: JoinHandle<()>,
}

impl Session {
    /// Abort the reducer and wait until it is gone, so nothing it still had
    /// queued gets published afterwards.
    async fn shutdown(mut self) {
        self.reducer.abort();
        let _ = (&mut self.reducer).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reducer.abort();
    }
}

/// Aggregates the signed-in user's rooms into one observable list and
/// creates new rooms.
pub struct RoomAggregator {
    realtime: Arc<dyn RealtimeStore>,
    documents: Arc<dyn DocumentStore>,
    cache: Arc<dyn LocalCache>,
    options: AggregatorOptions,
    state: Observable<RoomListState>,
    session: Mutex<Option<Session>>,
    orphans: Mutex<Vec<creation::Orphan>>,
}

impl RoomAggregator {
    pub fn new(
        realtime: Arc<dyn RealtimeStore>,
        documents: Arc<dyn DocumentStore>,
        cache: Arc<dyn LocalCache>,
        options: AggregatorOptions,
    ) -> Self {
        Self {
            realtime,
            documents,
            cache,
            options,
            state: Observable::default(),
            session: Mutex::new(None),
            orphans: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> Observable<RoomListState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RoomListState> {
        self.state.subscribe()
    }

    /// Current sorted room list.
    pub fn rooms(&self) -> Vec<ChatRoom> {
        self.state.get().rooms
    }

    /// Membership key of the running session, if any.
    pub async fn active_key(&self) -> Option<String> {
        self.session.lock().await.as_ref().map(|s| s.membership_key.clone())
    }

    /// Start watching `userChats/{membership_key}`.
    ///
    /// Calling again with the same key is a no-op; a different key tears the
    /// running session down first. Failing to attach the membership listener
    /// is published on the state and returned.
    pub async fn start_aggregation(&self, membership_key: &str) -> ChatResult<()> {
        let membership_key = membership_key.trim();
        if membership_key.is_empty() {
            return Err(ChatError::Validation("Membership key cannot be empty".to_string()));
        }

        let mut session = self.session.lock().await;
        if let Some(running) = session.as_ref() {
            if running.membership_key == membership_key {
                debug!("[ROOMS] aggregation for {} already running", membership_key);
                return Ok(());
            }
            info!("[ROOMS] switching aggregation {} -> {}", running.membership_key, membership_key);
            if let Some(previous) = session.take() {
                previous.shutdown().await;
            }
            self.state.update(|s| s.rooms.clear());
        }

        self.state.update(|s| {
            s.ui.is_loading = true;
            s.ui.error = None;
        });

        let path = membership_path(membership_key);
        let subscription = match self.realtime.observe_node(&path).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!("[ROOMS] cannot listen on {}: {}", path, e);
                let message = e.user_message();
                self.state.update(|s| {
                    s.ui.is_loading = false;
                    s.ui.error = Some(message);
                });
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let membership = forward(subscription, tx.clone(), RoomEvent::Membership);
        let aggregation = Aggregation {
            realtime: Arc::clone(&self.realtime),
            cache: Arc::clone(&self.cache),
            state: self.state.clone(),
            options: self.options.clone(),
            events: tx,
            rooms: HashMap::new(),
            subscriptions: HashMap::new(),
            initial: InitialBatch::AwaitingMembership,
            _membership: membership,
        };

        info!("[ROOMS] aggregating rooms of {}", membership_key);
        *session = Some(Session {
            membership_key: membership_key.to_string(),
            reducer: tokio::spawn(aggregation.run(rx)),
        });
        Ok(())
    }

    /// Detach every listener and empty the list.
    pub async fn stop(&self) {
        let running = self.session.lock().await.take();
        if let Some(session) = running {
            info!("[ROOMS] stopping aggregation for {}", session.membership_key);
            session.shutdown().await;
        }
        self.state.update(|s| {
            s.rooms.clear();
            s.ui.is_loading = false;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryDocumentStore, InMemoryRealtimeStore};
    use crate::client::database::Database;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        store: InMemoryRealtimeStore,
        cache: Arc<Database>,
        aggregator: RoomAggregator,
    }

    async fn fixture(options: AggregatorOptions) -> Fixture {
        let store = InMemoryRealtimeStore::new();
        let cache = Arc::new(Database::open("sqlite::memory:").await.unwrap());
        let aggregator = RoomAggregator::new(
            Arc::new(store.clone()),
            Arc::new(InMemoryDocumentStore::new()),
            cache.clone(),
            options,
        );
        Fixture { store, cache, aggregator }
    }

    async fn wait_until(aggregator: &RoomAggregator, predicate: impl FnMut(&RoomListState) -> bool) -> RoomListState {
        let mut rx = aggregator.subscribe();
        let state = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(predicate))
            .await
            .expect("timed out waiting for room list")
            .expect("state channel closed");
        (*state).clone()
    }

    async fn eventually_observers(store: &InMemoryRealtimeStore, path: &str, expected: usize) {
        for _ in 0..100 {
            if store.observer_count(path).await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} never reached {} observer(s)", path, expected);
    }

    async fn add_room(store: &InMemoryRealtimeStore, member: &str, push_key: &str, room_id: &str, record: Value) {
        store.write_node(&room_path(room_id), record).await.unwrap();
        store
            .write_node(&format!("{}/{}", membership_path(member), push_key), json!(room_id))
            .await
            .unwrap();
    }

    #[test]
    fn sort_is_lexicographic_with_missing_timestamps_last() {
        let room = |id: &str, at: Option<&str>| ChatRoom {
            room_id: id.into(),
            updated_at: at.map(str::to_string),
            ..Default::default()
        };
        let mut rooms = vec![room("a", Some("1000")), room("b", None), room("c", Some("900")), room("d", Some("2000"))];
        rooms.sort_by(compare_rooms);
        let order: Vec<&str> = rooms.iter().map(|r| r.room_id.as_str()).collect();
        // "900" > "2000" > "1000" as strings
        assert_eq!(order, vec!["c", "d", "a", "b"]);
    }

    #[test]
    fn membership_ids_are_deduplicated() {
        let ids = membership_room_ids(&json!({"k1": "r1", "k2": "r2", "k3": "r1", "k4": null}));
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"r1".to_string()) && ids.contains(&"r2".to_string()));
        assert!(membership_room_ids(&Value::Null).is_empty());
    }

    #[tokio::test]
    async fn record_then_field_patch() {
        let f = fixture(AggregatorOptions::default()).await;
        add_room(&f.store, "0811", "k1", "room1", json!({"last_message": null, "updated_at": "1000"})).await;

        f.aggregator.start_aggregation("0811").await.unwrap();
        let state = wait_until(&f.aggregator, |s| s.rooms.len() == 1).await;
        assert_eq!(state.rooms[0].room_id, "room1");
        assert_eq!(state.rooms[0].last_message, None);
        assert_eq!(state.rooms[0].updated_at.as_deref(), Some("1000"));
        assert!(!state.ui.is_loading);

        f.store.write_node("chatRooms/room1/last_message", json!("hello")).await.unwrap();
        let state = wait_until(&f.aggregator, |s| {
            s.rooms.first().and_then(|r| r.last_message.as_deref()) == Some("hello")
        })
        .await;
        assert_eq!(state.rooms.len(), 1);
        assert_eq!(state.rooms[0].updated_at.as_deref(), Some("1000"));
    }

    #[tokio::test]
    async fn interleaved_patches_keep_one_entry_per_room() {
        let f = fixture(AggregatorOptions::default()).await;
        add_room(&f.store, "0811", "k1", "r1", json!({"updated_at": "1"})).await;
        add_room(&f.store, "0811", "k2", "r2", json!({"updated_at": "2"})).await;
        f.aggregator.start_aggregation("0811").await.unwrap();
        wait_until(&f.aggregator, |s| s.rooms.len() == 2).await;

        for i in 0..5 {
            f.store.write_node("chatRooms/r1/last_message", json!(format!("a{}", i))).await.unwrap();
            f.store.write_node("chatRooms/r2/last_message_time", json!(format!("t{}", i))).await.unwrap();
            f.store.write_node("chatRooms/r1/updated_at", json!(format!("3{}", i))).await.unwrap();
        }

        let state = wait_until(&f.aggregator, |s| {
            let r1 = s.rooms.iter().find(|r| r.room_id == "r1");
            let r2 = s.rooms.iter().find(|r| r.room_id == "r2");
            r1.map_or(false, |r| r.last_message.as_deref() == Some("a4") && r.updated_at.as_deref() == Some("34"))
                && r2.map_or(false, |r| r.last_message_time.as_deref() == Some("t4"))
        })
        .await;
        assert_eq!(state.rooms.len(), 2);
        assert_eq!(state.rooms[0].room_id, "r1");
    }

    #[tokio::test]
    async fn repeated_membership_does_not_duplicate_listeners() {
        let f = fixture(AggregatorOptions::default()).await;
        add_room(&f.store, "0811", "k1", "r1", json!({"updated_at": "1"})).await;
        f.aggregator.start_aggregation("0811").await.unwrap();
        wait_until(&f.aggregator, |s| s.rooms.len() == 1).await;

        // same room pushed again next to a new one
        f.store.write_node("userChats/0811/k2", json!("r1")).await.unwrap();
        add_room(&f.store, "0811", "k3", "r2", json!({"updated_at": "2"})).await;
        let state = wait_until(&f.aggregator, |s| s.rooms.len() == 2).await;

        assert_eq!(state.rooms.iter().filter(|r| r.room_id == "r1").count(), 1);
        assert_eq!(f.store.observer_count("chatRooms/r1").await, 1);
        assert_eq!(f.store.observer_count("chatRooms/r1/last_message").await, 1);
    }

    #[tokio::test]
    async fn rooms_leaving_membership_are_released() {
        let f = fixture(AggregatorOptions::default()).await;
        add_room(&f.store, "0811", "k1", "r1", json!({"updated_at": "1"})).await;
        add_room(&f.store, "0811", "k2", "r2", json!({"updated_at": "2"})).await;
        f.aggregator.start_aggregation("0811").await.unwrap();
        wait_until(&f.aggregator, |s| s.rooms.len() == 2).await;

        f.store.write_node("userChats/0811/k1", Value::Null).await.unwrap();
        let state = wait_until(&f.aggregator, |s| s.rooms.len() == 1).await;
        assert_eq!(state.rooms[0].room_id, "r2");
        eventually_observers(&f.store, "chatRooms/r1", 0).await;
        eventually_observers(&f.store, "chatRooms/r1/updated_at", 0).await;
    }

    #[tokio::test]
    async fn deleted_record_leaves_the_list() {
        let f = fixture(AggregatorOptions::default()).await;
        add_room(&f.store, "0811", "k1", "r1", json!({"updated_at": "1"})).await;
        f.aggregator.start_aggregation("0811").await.unwrap();
        wait_until(&f.aggregator, |s| s.rooms.len() == 1).await;

        f.store.write_node("chatRooms/r1", Value::Null).await.unwrap();
        wait_until(&f.aggregator, |s| s.rooms.is_empty()).await;

        f.store.write_node("chatRooms/r1", json!({"updated_at": "5"})).await.unwrap();
        wait_until(&f.aggregator, |s| s.rooms.len() == 1).await;
    }

    #[tokio::test]
    async fn cancelled_listener_reports_and_others_keep_running() {
        let f = fixture(AggregatorOptions::default()).await;
        add_room(&f.store, "0811", "k1", "r1", json!({"updated_at": "1"})).await;
        f.aggregator.start_aggregation("0811").await.unwrap();
        wait_until(&f.aggregator, |s| s.rooms.len() == 1).await;

        assert_eq!(f.store.cancel_observers("chatRooms/r1/last_message", "Permission denied").await, 1);
        let state = wait_until(&f.aggregator, |s| s.ui.error.is_some()).await;
        assert_eq!(state.ui.error.as_deref(), Some("Permission denied"));
        assert!(!state.ui.is_loading);

        f.store.write_node("chatRooms/r1/updated_at", json!("2")).await.unwrap();
        wait_until(&f.aggregator, |s| s.rooms[0].updated_at.as_deref() == Some("2")).await;
    }

    #[tokio::test]
    async fn refused_membership_listener_is_reported() {
        let f = fixture(AggregatorOptions::default()).await;
        f.store.reject_observers_at("userChats/0811", "Permission denied").await;

        let err = f.aggregator.start_aggregation("0811").await.unwrap_err();
        assert_eq!(err.user_message(), "Permission denied");
        let state = f.aggregator.state().get();
        assert_eq!(state.ui.error.as_deref(), Some("Permission denied"));
        assert!(!state.ui.is_loading);
    }

    #[tokio::test]
    async fn blank_key_is_rejected() {
        let f = fixture(AggregatorOptions::default()).await;
        assert!(matches!(f.aggregator.start_aggregation("  ").await, Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn start_is_idempotent_per_key() {
        let f = fixture(AggregatorOptions::default()).await;
        add_room(&f.store, "0811", "k1", "r1", json!({"updated_at": "1"})).await;

        f.aggregator.start_aggregation("0811").await.unwrap();
        f.aggregator.start_aggregation("0811").await.unwrap();
        wait_until(&f.aggregator, |s| s.rooms.len() == 1).await;
        assert_eq!(f.store.observer_count("userChats/0811").await, 1);

        f.aggregator.start_aggregation("0812").await.unwrap();
        assert_eq!(f.aggregator.active_key().await.as_deref(), Some("0812"));
        eventually_observers(&f.store, "userChats/0811", 0).await;
        eventually_observers(&f.store, "chatRooms/r1", 0).await;
        assert_eq!(f.store.observer_count("userChats/0812").await, 1);
        assert!(f.aggregator.rooms().is_empty());

        f.aggregator.stop().await;
        eventually_observers(&f.store, "userChats/0812", 0).await;
        assert_eq!(f.aggregator.active_key().await, None);
    }

    #[tokio::test]
    async fn initial_batch_is_cached_once() {
        let f = fixture(AggregatorOptions::default()).await;
        add_room(&f.store, "0811", "k1", "r1", json!({"last_message": "hi", "updated_at": "1"})).await;
        add_room(&f.store, "0811", "k2", "r2", json!({"updated_at": "2"})).await;
        f.aggregator.start_aggregation("0811").await.unwrap();
        wait_until(&f.aggregator, |s| s.rooms.len() == 2).await;

        f.store.write_node("chatRooms/r1/last_message", json!("new")).await.unwrap();
        wait_until(&f.aggregator, |s| s.rooms.iter().any(|r| r.last_message.as_deref() == Some("new"))).await;

        let cached = f.cache.read_rooms().await.unwrap();
        assert_eq!(cached.len(), 2);
        let r1 = cached.iter().find(|r| r.room_id == "r1").unwrap();
        assert_eq!(r1.last_message.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn incremental_updates_are_cached_when_enabled() {
        let f = fixture(AggregatorOptions { persist_incremental_updates: true }).await;
        add_room(&f.store, "0811", "k1", "r1", json!({"last_message": "hi", "updated_at": "1"})).await;
        f.aggregator.start_aggregation("0811").await.unwrap();
        wait_until(&f.aggregator, |s| s.rooms.len() == 1).await;

        f.store.write_node("chatRooms/r1/last_message", json!("new")).await.unwrap();
        wait_until(&f.aggregator, |s| s.rooms[0].last_message.as_deref() == Some("new")).await;

        for _ in 0..100 {
            let cached = f.cache.find_room("r1").await.unwrap();
            if cached.and_then(|r| r.last_message).as_deref() == Some("new") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("patch never reached the cache");
    }
}
