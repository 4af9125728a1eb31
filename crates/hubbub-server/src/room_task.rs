//! Per-room actor.
//!
//! Each room runs as one tokio task that owns a [`Room`] and drains a bounded
//! event channel. Every registration, departure and inbound frame for the
//! room passes through this channel, so the room sees a single total order of
//! events and needs no locks.
//!
//! The actor exits when the room is closed, when every handle is dropped, or
//! when a room that has had clients stays empty for the idle timeout.

use std::time::Duration;

use bytes::Bytes;
use hubbub_core::{Environment, Room, RoomConfig, RoomError};
use hubbub_proto::{ClientId, RoomId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::pump::Outbox;

/// Events consumed by the room actor.
#[derive(Debug)]
pub enum RoomEvent {
    /// Admit a client and reply with its id.
    Register {
        /// The client's outbound queue.
        outbox: Outbox,
        /// Where to send the result.
        reply: oneshot::Sender<Result<ClientId, RoomError>>,
    },
    /// A connection ended.
    Unregister {
        /// Client id the connection was given.
        id: ClientId,
        /// The connection's outbox, to tell it apart from a later client that
        /// reused the same id.
        outbox: Outbox,
    },
    /// Raw frame from a client.
    Receive {
        /// Sender.
        id: ClientId,
        /// The sender's outbox. Frames still in flight from an evicted
        /// connection are dropped rather than credited to the id's new owner.
        outbox: Outbox,
        /// Frame bytes as read from the transport.
        frame: Bytes,
    },
    /// Report the room's current state.
    Inspect {
        /// Where to send the snapshot.
        reply: oneshot::Sender<RoomSnapshot>,
    },
    /// Close every connection and stop.
    Close,
}

/// Point-in-time view of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    /// Registered clients, ascending.
    pub clients: Vec<ClientId>,
    /// Current host.
    pub host: Option<ClientId>,
    /// Frames held for replay.
    pub buffered: usize,
    /// Live objects.
    pub objects: usize,
}

/// Room actor settings.
#[derive(Debug, Clone)]
pub struct RoomTaskConfig {
    /// Engine limits.
    pub room: RoomConfig,
    /// Event channel capacity.
    pub event_capacity: usize,
    /// Close the room after it has been empty this long. `None` keeps it
    /// open until closed explicitly.
    pub idle_timeout: Option<Duration>,
}

impl Default for RoomTaskConfig {
    fn default() -> Self {
        Self {
            room: RoomConfig::default(),
            event_capacity: 1024,
            idle_timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// Cloneable handle to a running room.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    events: mpsc::Sender<RoomEvent>,
}

impl RoomHandle {
    /// Id of the room.
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Admit a client.
    ///
    /// # Errors
    ///
    /// Returns the room's refusal, or [`RoomError::Closed`] if the actor has
    /// stopped.
    pub async fn register(&self, outbox: Outbox) -> Result<ClientId, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(RoomEvent::Register { outbox, reply })
            .await
            .map_err(|_| RoomError::Closed)?;
        rx.await.map_err(|_| RoomError::Closed)?
    }

    /// Report that a connection ended.
    pub async fn unregister(&self, id: ClientId, outbox: Outbox) {
        // A stopped actor has already dropped every client.
        let _ = self.events.send(RoomEvent::Unregister { id, outbox }).await;
    }

    /// Forward a raw frame.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::Closed`] if the actor has stopped.
    pub async fn receive(
        &self,
        id: ClientId,
        outbox: &Outbox,
        frame: Bytes,
    ) -> Result<(), RoomError> {
        let event = RoomEvent::Receive { id, outbox: outbox.clone(), frame };
        self.events.send(event).await.map_err(|_| RoomError::Closed)
    }

    /// Snapshot of the room, or `None` if the actor has stopped.
    pub async fn inspect(&self) -> Option<RoomSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.events.send(RoomEvent::Inspect { reply }).await.ok()?;
        rx.await.ok()
    }

    /// Ask the room to close. Returns immediately.
    pub async fn close(&self) {
        let _ = self.events.send(RoomEvent::Close).await;
    }

    /// Whether the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

/// Start a room actor on the current runtime.
pub fn spawn_room<E: Environment>(room_id: RoomId, config: RoomTaskConfig, env: E) -> RoomHandle {
    let (events, rx) = mpsc::channel(config.event_capacity.max(1));
    let room = Room::new(config.room.clone());
    tokio::spawn(run_room(room_id, room, rx, config.idle_timeout, env));
    info!(room = room_id, "room started");
    RoomHandle { room_id, events }
}

async fn run_room<E: Environment>(
    room_id: RoomId,
    mut room: Room<Outbox>,
    mut events: mpsc::Receiver<RoomEvent>,
    idle_timeout: Option<Duration>,
    env: E,
) {
    let mut has_had_clients = false;
    let mut idle_timer = None;

    loop {
        if !room.is_empty() {
            idle_timer = None;
        } else if has_had_clients && idle_timer.is_none() {
            // Armed once per empty spell; later events do not restart it.
            idle_timer = idle_timeout.map(|timeout| Box::pin(env.sleep(timeout)));
        }

        let event = match idle_timer.as_mut() {
            Some(timer) => tokio::select! {
                event = events.recv() => event,
                () = timer => {
                    info!(room = room_id, "room idle, closing");
                    break;
                },
            },
            None => events.recv().await,
        };
        let Some(event) = event else {
            debug!(room = room_id, "all handles dropped");
            break;
        };

        match event {
            RoomEvent::Register { outbox, reply } => {
                let result = room.register(outbox);
                if result.is_ok() {
                    has_had_clients = true;
                }
                // The connection may have given up waiting.
                if let Err(Ok(id)) = reply.send(result) {
                    room.unregister(id);
                }
            },
            RoomEvent::Unregister { id, outbox } => {
                if room.sink(id).is_some_and(|current| current.same_connection(&outbox)) {
                    room.unregister(id);
                }
            },
            RoomEvent::Receive { id, outbox, frame } => {
                if room.sink(id).is_some_and(|current| current.same_connection(&outbox)) {
                    room.receive(id, frame);
                } else {
                    debug!(room = room_id, client = id, "frame from stale connection dropped");
                }
            },
            RoomEvent::Inspect { reply } => {
                let _ = reply.send(RoomSnapshot {
                    clients: room.client_ids(),
                    host: room.host(),
                    buffered: room.buffered_len(),
                    objects: room.object_count(),
                });
            },
            RoomEvent::Close => break,
        }
    }

    room.close();
    events.close();
    info!(room = room_id, "room stopped");
}
