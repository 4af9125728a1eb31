//! Room registry.
//!
//! Maps room ids, assigned by the cluster, to running room actors. Lookups
//! happen inside the WebSocket upgrade callback, which is synchronous, so the
//! map sits behind a std mutex that is never held across an await.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use hubbub_core::Environment;
use hubbub_proto::RoomId;
use tracing::info;

use crate::{
    error::ServerError,
    room_task::{RoomHandle, RoomTaskConfig, spawn_room},
};

/// Running rooms of this server.
pub struct RoomRegistry<E: Environment> {
    rooms: Mutex<HashMap<RoomId, RoomHandle>>,
    config: RoomTaskConfig,
    env: E,
}

impl<E: Environment> RoomRegistry<E> {
    /// Create an empty registry. Rooms it starts use `config`.
    pub fn new(config: RoomTaskConfig, env: E) -> Self {
        Self { rooms: Mutex::new(HashMap::new()), config, env }
    }

    /// Start a room.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::RoomExists`] if a room with this id is running.
    pub fn create_room(&self, room_id: RoomId) -> Result<RoomHandle, ServerError> {
        let mut rooms = self.lock();
        if rooms.get(&room_id).is_some_and(|room| !room.is_closed()) {
            return Err(ServerError::RoomExists(room_id));
        }

        let handle = spawn_room(room_id, self.config.clone(), self.env.clone());
        rooms.insert(room_id, handle.clone());
        Ok(handle)
    }

    /// Handle to a running room. Rooms that have stopped are forgotten.
    pub fn get(&self, room_id: RoomId) -> Option<RoomHandle> {
        let mut rooms = self.lock();
        match rooms.get(&room_id) {
            Some(room) if room.is_closed() => {
                rooms.remove(&room_id);
                None
            },
            Some(room) => Some(room.clone()),
            None => None,
        }
    }

    /// Handle to a running room, starting it first if needed.
    pub fn get_or_create(&self, room_id: RoomId) -> RoomHandle {
        let mut rooms = self.lock();
        if let Some(room) = rooms.get(&room_id).filter(|room| !room.is_closed()) {
            return room.clone();
        }

        let handle = spawn_room(room_id, self.config.clone(), self.env.clone());
        rooms.insert(room_id, handle.clone());
        handle
    }

    /// Ids of running rooms, ascending.
    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut rooms = self.lock();
        rooms.retain(|_, room| !room.is_closed());
        let mut ids: Vec<_> = rooms.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Close every room and forget them.
    pub async fn close_all(&self) {
        let rooms: Vec<RoomHandle> = self.lock().drain().map(|(_, room)| room).collect();
        info!(count = rooms.len(), "closing all rooms");
        for room in rooms {
            room.close().await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RoomId, RoomHandle>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
