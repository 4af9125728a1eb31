//! Cluster directory of game servers and rooms.
//!
//! Matchmaking keeps a view of which servers are alive and which rooms they
//! host, fed by announcements from the discovery bus. Rooms are indexed twice:
//! by id, and by `(application, version)` so a lobby can list every room of
//! one build. Both indexes are updated together by every mutation.
//!
//! Entries carry the time they were last announced. Servers and rooms that
//! stop re-announcing are dropped by `sweep_stale`.
//!
//! # Invariants
//!
//! - A room id is in `by_app[(app, version)]` iff `by_id` holds that room with
//!   the same application and version
//! - A server's load is the sum of `connected²` over the rooms it announced

use std::{
    collections::{BTreeSet, HashMap},
    time::{Duration, Instant},
};

use hubbub_proto::{BusMessage, RoomAnnouncement, RoomId, ServerAnnouncement, ServerId};
use tracing::{debug, info};

use crate::env::Environment;

/// `(application, version)`
type AppKey = (String, String);

/// A room as last announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomListing {
    /// Announcement body.
    pub room: RoomAnnouncement,
    /// When it was last announced.
    pub updated_at: Instant,
}

/// Two-level room index.
pub struct RoomDirectory<E: Environment> {
    env: E,
    by_id: HashMap<RoomId, RoomListing>,
    by_app: HashMap<AppKey, BTreeSet<RoomId>>,
}

impl<E: Environment> RoomDirectory<E> {
    /// Create an empty directory.
    pub fn new(env: E) -> Self {
        Self { env, by_id: HashMap::new(), by_app: HashMap::new() }
    }

    /// Insert or refresh a room. Returns the previous announcement.
    pub fn store(&mut self, room: RoomAnnouncement) -> Option<RoomAnnouncement> {
        let key = (room.application_name.clone(), room.version.clone());
        let room_id = room.room_id;
        let listing = RoomListing { room, updated_at: self.env.now() };

        let previous = self.by_id.insert(room_id, listing).map(|old| old.room);
        if let Some(old) = &previous {
            let old_key = (old.application_name.clone(), old.version.clone());
            if old_key != key {
                self.unindex(&old_key, room_id);
            }
        }
        self.by_app.entry(key).or_default().insert(room_id);
        previous
    }

    /// Drop a room from both indexes.
    pub fn remove(&mut self, room_id: RoomId) -> Option<RoomAnnouncement> {
        let listing = self.by_id.remove(&room_id)?;
        let key = (listing.room.application_name.clone(), listing.room.version.clone());
        self.unindex(&key, room_id);
        Some(listing.room)
    }

    /// Every room of one application build, ordered by id.
    pub fn search(&self, application: &str, version: &str) -> Vec<&RoomAnnouncement> {
        let key = (application.to_string(), version.to_string());
        self.by_app
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|id| self.by_id.get(id))
            .map(|listing| &listing.room)
            .collect()
    }

    /// Look a room up by id.
    pub fn find(&self, room_id: RoomId) -> Option<&RoomListing> {
        self.by_id.get(&room_id)
    }

    /// Drop rooms not announced within `max_age`. Returns their ids, sorted.
    pub fn sweep_stale(&mut self, max_age: Duration) -> Vec<RoomId> {
        let now = self.env.now();
        let mut stale: Vec<RoomId> = self
            .by_id
            .values()
            .filter(|l| now.saturating_duration_since(l.updated_at) > max_age)
            .map(|l| l.room.room_id)
            .collect();
        stale.sort_unstable();

        for id in &stale {
            self.remove(*id);
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "swept stale rooms");
        }
        stale
    }

    /// Apply a room announcement. Server messages are ignored.
    ///
    /// Returns whether the message was a room message.
    pub fn apply(&mut self, message: &BusMessage) -> bool {
        match message {
            BusMessage::RegisterRoom(room) => {
                self.store(room.clone());
                true
            },
            BusMessage::UnregisterRoom(room) => {
                self.remove(room.room_id);
                true
            },
            BusMessage::RegisterServer(_) | BusMessage::UnregisterServer(_) => false,
        }
    }

    /// Number of rooms.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no rooms are known.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    fn unindex(&mut self, key: &AppKey, room_id: RoomId) {
        if let Some(ids) = self.by_app.get_mut(key) {
            ids.remove(&room_id);
            if ids.is_empty() {
                self.by_app.remove(key);
            }
        }
    }
}

/// A game server as last announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerListing {
    /// Announcement body.
    pub server: ServerAnnouncement,
    /// When it was last announced.
    pub updated_at: Instant,
}

/// Live game servers and their load.
pub struct ServerDirectory<E: Environment> {
    env: E,
    servers: HashMap<ServerId, ServerListing>,
    /// Load contributed by each announced room, and the server hosting it.
    room_loads: HashMap<RoomId, (ServerId, u64)>,
    loads: HashMap<ServerId, u64>,
}

impl<E: Environment> ServerDirectory<E> {
    /// Create an empty directory.
    pub fn new(env: E) -> Self {
        Self { env, servers: HashMap::new(), room_loads: HashMap::new(), loads: HashMap::new() }
    }

    /// Insert or refresh a server. Refreshing keeps its load.
    pub fn store(&mut self, server: ServerAnnouncement) {
        let listing = ServerListing { server, updated_at: self.env.now() };
        self.servers.insert(listing.server.server_id, listing);
    }

    /// Drop a server along with the load of every room it hosted.
    pub fn remove(&mut self, server_id: ServerId) -> Option<ServerAnnouncement> {
        self.loads.remove(&server_id);
        self.room_loads.retain(|_, (host, _)| *host != server_id);
        self.servers.remove(&server_id).map(|l| l.server)
    }

    /// Look a server up by id.
    pub fn get(&self, server_id: ServerId) -> Option<&ServerListing> {
        self.servers.get(&server_id)
    }

    /// Current load of a server.
    pub fn load(&self, server_id: ServerId) -> u64 {
        self.loads.get(&server_id).copied().unwrap_or(0)
    }

    /// Least-loaded live server; ties go to the lowest id.
    pub fn pick_lowest_load(&self) -> Option<&ServerAnnouncement> {
        self.servers
            .values()
            .min_by_key(|l| (self.load(l.server.server_id), l.server.server_id))
            .map(|l| &l.server)
    }

    /// Account for a room's current occupancy.
    pub fn record_room(&mut self, room: &RoomAnnouncement) {
        let load = u64::from(room.connected_users).pow(2);
        self.forget_room(room.room_id);

        let server_id = room.server.server_id;
        self.room_loads.insert(room.room_id, (server_id, load));
        *self.loads.entry(server_id).or_default() += load;
    }

    /// Stop accounting for a room.
    pub fn forget_room(&mut self, room_id: RoomId) {
        if let Some((server_id, load)) = self.room_loads.remove(&room_id) {
            if let Some(total) = self.loads.get_mut(&server_id) {
                *total = total.saturating_sub(load);
            }
        }
    }

    /// Drop servers not announced within `max_age`. Returns their ids, sorted.
    pub fn sweep_stale(&mut self, max_age: Duration) -> Vec<ServerId> {
        let now = self.env.now();
        let mut stale: Vec<ServerId> = self
            .servers
            .values()
            .filter(|l| now.saturating_duration_since(l.updated_at) > max_age)
            .map(|l| l.server.server_id)
            .collect();
        stale.sort_unstable();

        for id in &stale {
            self.remove(*id);
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "swept stale servers");
        }
        stale
    }

    /// Apply any bus message: server messages update membership, room
    /// messages update load.
    pub fn apply(&mut self, message: &BusMessage) {
        match message {
            BusMessage::RegisterServer(server) => self.store(server.clone()),
            BusMessage::UnregisterServer(server) => {
                if self.remove(server.server_id).is_none() {
                    debug!(server = server.server_id, "unregister for unknown server");
                }
            },
            BusMessage::RegisterRoom(room) => self.record_room(room),
            BusMessage::UnregisterRoom(room) => self.forget_room(room.room_id),
        }
    }

    /// Number of live servers.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Whether no servers are known.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
