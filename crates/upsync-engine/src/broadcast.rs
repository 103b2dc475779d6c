//! Realtime Broadcaster
//!
//! Topic-based pub/sub independent of the websocket transport. Each connection owns one
//! bounded FIFO outbox; rooms map to the set of connections subscribed to them.
//! Publishing never waits on a subscriber: a full outbox applies the overflow policy and
//! closed connections are pruned.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::Notify;
use tracing::debug;
use upsync_core::{OverflowPolicy, Room, ServerEvent};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies a registered connection when subscribing or publishing to it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
}

struct Outbox {
    queue: Mutex<VecDeque<Arc<ServerEvent>>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
    capacity: usize,
    policy: OverflowPolicy,
}

impl Outbox {
    fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            capacity,
            policy,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Returns false when the event was discarded
    fn push(&self, event: Arc<ServerEvent>) -> bool {
        let delivered = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            if queue.len() < self.capacity {
                queue.push_back(event);
                true
            } else {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        queue.pop_front();
                        queue.push_back(event);
                    }
                    OverflowPolicy::DropNewest => {}
                }
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.policy == OverflowPolicy::DropOldest
            }
        };
        self.notify.notify_one();
        delivered
    }

    fn pop(&self) -> Option<Arc<ServerEvent>> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

/// Receiving side of a connection's outbox, owned by the transport task.
pub struct Subscription {
    handle: ConnectionHandle,
    outbox: Arc<Outbox>,
}

impl Subscription {
    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    /// Next queued event, waiting if the outbox is empty. None once disconnected.
    pub async fn recv(&mut self) -> Option<Arc<ServerEvent>> {
        loop {
            if let Some(event) = self.outbox.pop() {
                return Some(event);
            }
            if self.outbox.is_closed() {
                return None;
            }
            self.outbox.notify.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Option<Arc<ServerEvent>> {
        self.outbox.pop()
    }

    /// Events discarded for this connection because its outbox was full
    pub fn dropped(&self) -> u64 {
        self.outbox.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.outbox.close();
    }
}

struct ConnectionEntry {
    outbox: Arc<Outbox>,
    rooms: HashSet<Room>,
}

#[derive(Default)]
struct BroadcastState {
    rooms: HashMap<Room, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

impl BroadcastState {
    fn remove_connection(&mut self, id: ConnectionId) -> bool {
        let Some(entry) = self.connections.remove(&id) else {
            return false;
        };
        for room in entry.rooms {
            if let Some(members) = self.rooms.get_mut(&room) {
                members.remove(&id);
                if members.is_empty() {
                    self.rooms.remove(&room);
                }
            }
        }
        entry.outbox.close();
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub rooms: usize,
    pub connections: usize,
    pub subscriptions: usize,
}

pub struct Broadcaster {
    state: RwLock<BroadcastState>,
    buffer_size: usize,
    policy: OverflowPolicy,
}

impl Broadcaster {
    pub fn new(buffer_size: usize, policy: OverflowPolicy) -> Self {
        Self {
            state: RwLock::new(BroadcastState::default()),
            buffer_size: buffer_size.max(1),
            policy,
        }
    }

    /// Register a connection and return its handle plus the receiving end of its outbox.
    pub fn connect(&self) -> (ConnectionHandle, Subscription) {
        let handle = ConnectionHandle {
            id: ConnectionId(Uuid::new_v4()),
        };
        let outbox = Arc::new(Outbox::new(self.buffer_size, self.policy));
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .connections
            .insert(
                handle.id,
                ConnectionEntry {
                    outbox: outbox.clone(),
                    rooms: HashSet::new(),
                },
            );
        debug!(connection_id = %handle.id, "Connection registered");
        (handle, Subscription { handle, outbox })
    }

    /// Returns false when the connection is unknown.
    pub fn subscribe(&self, room: Room, handle: &ConnectionHandle) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = state.connections.get_mut(&handle.id) else {
            return false;
        };
        entry.rooms.insert(room);
        state.rooms.entry(room).or_default().insert(handle.id);
        debug!(connection_id = %handle.id, room = %room, "Joined room");
        true
    }

    pub fn unsubscribe(&self, room: Room, handle: &ConnectionHandle) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let was_member = match state.connections.get_mut(&handle.id) {
            Some(entry) => entry.rooms.remove(&room),
            None => false,
        };
        if let Some(members) = state.rooms.get_mut(&room) {
            members.remove(&handle.id);
            if members.is_empty() {
                state.rooms.remove(&room);
            }
        }
        was_member
    }

    pub fn disconnect(&self, handle: &ConnectionHandle) {
        let removed = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove_connection(handle.id);
        if removed {
            debug!(connection_id = %handle.id, "Connection removed");
        }
    }

    /// Deliver to every live subscriber of `room`. Returns the number of outboxes that
    /// accepted the event.
    pub fn publish(&self, room: Room, event: ServerEvent) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            let Some(members) = state.rooms.get(&room) else {
                return 0;
            };
            for id in members {
                let Some(entry) = state.connections.get(id) else {
                    continue;
                };
                if entry.outbox.is_closed() {
                    closed.push(*id);
                    continue;
                }
                if entry.outbox.push(event.clone()) {
                    delivered += 1;
                } else {
                    debug!(
                        connection_id = %id,
                        room = %room,
                        event = event.name(),
                        "Outbox full, event dropped"
                    );
                }
            }
        }

        if !closed.is_empty() {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            for id in closed {
                state.remove_connection(id);
            }
        }

        delivered
    }

    /// Deliver to a single connection regardless of room membership.
    pub fn send_to(&self, handle: &ConnectionHandle, event: ServerEvent) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match state.connections.get(&handle.id) {
            Some(entry) if !entry.outbox.is_closed() => entry.outbox.push(Arc::new(event)),
            _ => false,
        }
    }

    pub fn is_connected(&self, handle: &ConnectionHandle) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .connections
            .get(&handle.id)
            .is_some_and(|entry| !entry.outbox.is_closed())
    }

    pub fn subscriber_count(&self, room: &Room) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.rooms.get(room).map(HashSet::len).unwrap_or(0)
    }

    pub fn room_stats(&self) -> RoomStats {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        RoomStats {
            rooms: state.rooms.len(),
            connections: state.connections.len(),
            subscriptions: state.rooms.values().map(HashSet::len).sum(),
        }
    }
}
