//! Room engine.
//!
//! A [`Room`] owns everything one session shares: the client registry, the
//! host designation, the buffered-replay store, the object ownership table and
//! the client id allocator. It is a plain state machine. The caller feeds it
//! `register` / `unregister` / `receive` events one at a time and the room
//! writes outbound frames straight into each client's [`ClientSink`].
//!
//! ## Ordering
//!
//! Events are processed to completion in the order they are applied. A joiner
//! is notified, replayed and (if first) promoted before the next event runs,
//! so it never misses a broadcast produced after its registration.
//!
//! ## Backpressure
//!
//! Sinks are non-blocking. A sink that refuses a frame is not retried: its
//! client is queued for eviction, and evictions run after the current event
//! finishes. An eviction's own exit notices may evict more clients; the queue
//! is drained until it is empty.
//!
//! # Invariants
//!
//! - `host` is a registered client, or `None` exactly when the room is empty
//! - Every buffered frame's author is registered
//! - Every live object's owner is registered
//! - A client id is allocated iff that client is registered

use std::collections::{BTreeMap, VecDeque};

use bytes::Bytes;
use hubbub_proto::{
    ClientId, ControlRequest, DEFAULT_MAX_MESSAGE_SIZE, InboundFrame, ObjectId, Opcode,
    OutboundFrame, Target,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    DEFAULT_MAX_CLIENTS,
    allocator::{AllocError, IdAllocator},
    objects::ObjectTable,
    replay::ReplayStore,
};

/// Why a sink refused a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Outbound queue is at capacity.
    #[error("outbound queue full")]
    Full,
    /// Connection side of the queue is gone.
    #[error("outbound queue closed")]
    Closed,
}

/// Per-client outbound queue as seen by the room.
///
/// Implementations must never block: the room calls `try_send` from its
/// event loop while fanning out to every client.
pub trait ClientSink {
    /// Enqueue an encoded outbound frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns a [`SinkError`] if the frame cannot be queued right now. The
    /// room evicts the client in response.
    fn try_send(&self, frame: Bytes) -> Result<(), SinkError>;

    /// Hand over the replay snapshot for a joining client.
    ///
    /// The snapshot does not count against the live queue's capacity and must
    /// be delivered, in order, before any frame passed to `try_send`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Closed`] if the connection is already gone.
    fn replay(&self, frames: Vec<Bytes>) -> Result<(), SinkError>;

    /// Force the connection behind this sink to close.
    fn close(&self);
}

/// Room limits and behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomConfig {
    /// Largest inbound frame and largest reconstructed outbound frame.
    pub max_message_size: usize,
    /// Client id pool size.
    pub max_clients: u32,
    /// Retain each join notice so later joiners learn about present peers.
    pub replay_join_notices: bool,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_clients: DEFAULT_MAX_CLIENTS,
            replay_join_notices: false,
        }
    }
}

/// Errors surfaced to a registering client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RoomError {
    /// No client id is available.
    #[error("room is full: {0}")]
    Exhausted(#[from] AllocError),

    /// The room has been closed.
    #[error("room is closed")]
    Closed,

    /// The client's connection went away while it was being admitted.
    #[error("client {0} dropped during registration")]
    Dropped(ClientId),
}

/// One relay session.
pub struct Room<S: ClientSink> {
    config: RoomConfig,
    clients: BTreeMap<ClientId, S>,
    host: Option<ClientId>,
    replay: ReplayStore,
    objects: ObjectTable,
    ids: IdAllocator,
    /// Clients whose sink refused a frame during the current event.
    evictions: VecDeque<ClientId>,
    closed: bool,
}

impl<S: ClientSink> Room<S> {
    /// Create an empty room.
    pub fn new(config: RoomConfig) -> Self {
        let ids = IdAllocator::new(config.max_clients);
        Self {
            config,
            clients: BTreeMap::new(),
            host: None,
            replay: ReplayStore::new(),
            objects: ObjectTable::new(),
            ids,
            evictions: VecDeque::new(),
            closed: false,
        }
    }

    /// Admit a client and return its id.
    ///
    /// Existing clients are told about the joiner, the joiner is replayed
    /// every buffered frame, and the first client of an empty room becomes
    /// host.
    ///
    /// # Errors
    ///
    /// - [`RoomError::Closed`] once the room has been closed
    /// - [`RoomError::Exhausted`] when every client id is in use
    /// - [`RoomError::Dropped`] when the joiner's sink refused its replay or
    ///   host notice
    pub fn register(&mut self, sink: S) -> Result<ClientId, RoomError> {
        if self.closed {
            return Err(RoomError::Closed);
        }
        let id = self.ids.allocate()?;

        let notice = OutboundFrame::encode(id, Opcode::NewConnection.to_u8(), &[]);
        self.broadcast(&notice, None);

        let snapshot: Vec<Bytes> = self.replay.iter().map(|m| m.frame.clone()).collect();
        let replayed = snapshot.len();
        if let Err(e) = sink.replay(snapshot) {
            warn!(client = id, error = %e, "replay refused");
            self.evictions.push_back(id);
        }
        self.clients.insert(id, sink);

        if self.config.replay_join_notices {
            self.replay.retain(id, notice);
        }

        if self.host.is_none() {
            self.host = Some(id);
            self.send_to(id, host_notice(id));
        }

        self.process_evictions();
        if !self.clients.contains_key(&id) {
            return Err(RoomError::Dropped(id));
        }

        info!(client = id, replayed, clients = self.clients.len(), "client registered");
        Ok(id)
    }

    /// Remove a client. Unknown ids are ignored.
    ///
    /// Returns whether the client was registered.
    pub fn unregister(&mut self, id: ClientId) -> bool {
        if self.closed || !self.clients.contains_key(&id) {
            return false;
        }
        self.remove_client(id);
        self.process_evictions();
        true
    }

    /// Handle one raw frame from a registered client.
    ///
    /// Malformed, oversized and unauthorized frames are logged and dropped.
    pub fn receive(&mut self, sender: ClientId, raw: Bytes) {
        if self.closed || !self.clients.contains_key(&sender) {
            debug!(client = sender, "frame from unregistered client dropped");
            return;
        }

        let frame = match InboundFrame::decode(raw, self.config.max_message_size) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(client = sender, error = %e, "malformed frame dropped");
                return;
            },
        };

        let outbound_len = OutboundFrame::encoded_len(frame.payload.len());
        if outbound_len > self.config.max_message_size {
            debug!(client = sender, len = outbound_len, "outbound frame too large, dropped");
            return;
        }

        match frame.target {
            Target::AllClients
            | Target::OtherClients
            | Target::AllClientsBuffered
            | Target::OtherClientsBuffered => {
                let outbound = OutboundFrame::encode(sender, frame.message_type, &frame.payload);
                let skip = frame.target.excludes_sender().then_some(sender);
                self.broadcast(&outbound, skip);
                if frame.target.is_buffered() {
                    self.replay.retain(sender, outbound);
                }
            },
            Target::Host => {
                if let Some(host) = self.host {
                    let outbound =
                        OutboundFrame::encode(sender, frame.message_type, &frame.payload);
                    self.send_to(host, outbound);
                }
            },
            Target::Server => self.control(sender, frame.message_type, &frame.payload),
        }

        self.process_evictions();
    }

    /// Force-close every client and refuse further work.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for sink in self.clients.values() {
            sink.close();
        }
        info!(clients = self.clients.len(), "room closed");

        self.clients.clear();
        self.host = None;
        self.replay.clear();
        self.objects.clear();
        self.evictions.clear();
        self.ids = IdAllocator::new(self.config.max_clients);
    }

    /// Current host.
    pub fn host(&self) -> Option<ClientId> {
        self.host
    }

    /// Registered client ids in ascending order.
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Sink of a registered client.
    pub fn sink(&self, id: ClientId) -> Option<&S> {
        self.clients.get(&id)
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client is registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Whether [`Room::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Owner of a live object.
    pub fn object_owner(&self, object: ObjectId) -> Option<ClientId> {
        self.objects.owner(object)
    }

    /// Number of live objects.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Objects owned by `id`, ascending.
    pub fn objects_owned_by(&self, id: ClientId) -> Vec<ObjectId> {
        self.objects.owned_by(id)
    }

    /// Number of frames held for replay.
    pub fn buffered_len(&self) -> usize {
        self.replay.len()
    }

    /// Number of frames held for replay on behalf of `id`.
    pub fn buffered_by(&self, id: ClientId) -> usize {
        self.replay.authored_by(id)
    }

    /// Room configuration.
    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    fn control(&mut self, sender: ClientId, message_type: u8, payload: &Bytes) {
        let request = match ControlRequest::decode(message_type, payload) {
            Ok(request) => request,
            Err(e) => {
                debug!(client = sender, error = %e, "invalid control request dropped");
                return;
            },
        };

        match request {
            ControlRequest::Instantiate { object_id } => {
                if self.objects.instantiate(object_id, sender) {
                    let notice =
                        OutboundFrame::encode(sender, Opcode::Instantiate.to_u8(), payload);
                    self.broadcast(&notice, None);
                } else {
                    debug!(client = sender, object = object_id, "object already live");
                }
            },
            ControlRequest::Destroy { object_id } => {
                match self.objects.destroy(object_id, sender) {
                    Ok(()) => {
                        let notice =
                            OutboundFrame::encode(sender, Opcode::Destroy.to_u8(), payload);
                        self.broadcast(&notice, None);
                    },
                    Err(e) => debug!(client = sender, error = %e, "destroy ignored"),
                }
            },
            ControlRequest::RequestControlAuthority { object_id } => {
                match self.objects.owner(object_id) {
                    Some(owner) => {
                        let notice = OutboundFrame::encode(
                            sender,
                            Opcode::RequestControlAuthority.to_u8(),
                            payload,
                        );
                        self.send_to(owner, notice);
                    },
                    None => debug!(client = sender, object = object_id, "unknown object"),
                }
            },
            ControlRequest::TransferControlAuthority { object_id, target } => {
                if !self.clients.contains_key(&target) {
                    debug!(client = sender, target, "transfer to unregistered client ignored");
                    return;
                }
                match self.objects.transfer(object_id, sender, target) {
                    Ok(()) => {
                        let notice = OutboundFrame::encode(
                            sender,
                            Opcode::TransferControlAuthority.to_u8(),
                            &object_id.to_le_bytes(),
                        );
                        self.send_to(target, notice);
                    },
                    Err(e) => debug!(client = sender, error = %e, "transfer ignored"),
                }
            },
            ControlRequest::MigrateHost { target } => {
                if !self.clients.contains_key(&target) {
                    debug!(client = sender, target, "migration to unregistered client ignored");
                    return;
                }
                info!(from = ?self.host, to = target, "host migrated");
                self.host = Some(target);
                self.send_to(target, host_notice(target));
            },
        }
    }

    /// Remove a registered client and repair everything that referenced it.
    fn remove_client(&mut self, id: ClientId) {
        let Some(sink) = self.clients.remove(&id) else {
            return;
        };
        sink.close();

        let purged = self.replay.purge_author(id);
        self.ids.free(id);

        let notice = OutboundFrame::encode(id, Opcode::ExitConnection.to_u8(), &[]);
        self.broadcast(&notice, None);

        if self.host == Some(id) {
            self.host = self.clients.keys().next().copied();
            if let Some(next) = self.host {
                info!(from = id, to = next, "host reassigned");
                self.send_to(next, host_notice(next));
            }
        }

        match self.host {
            Some(host) => {
                for object in self.objects.reassign_all(id, host) {
                    let notice = OutboundFrame::encode(
                        id,
                        Opcode::TransferControlAuthority.to_u8(),
                        &object.to_le_bytes(),
                    );
                    self.send_to(host, notice);
                }
            },
            None => {
                self.objects.remove_owned_by(id);
            },
        }

        info!(client = id, purged, clients = self.clients.len(), "client unregistered");
    }

    fn broadcast(&mut self, frame: &Bytes, skip: Option<ClientId>) {
        for (&id, sink) in &self.clients {
            if Some(id) == skip {
                continue;
            }
            if let Err(e) = sink.try_send(frame.clone()) {
                warn!(client = id, error = %e, "outbound queue refused frame");
                self.evictions.push_back(id);
            }
        }
    }

    fn send_to(&mut self, id: ClientId, frame: Bytes) {
        let Some(sink) = self.clients.get(&id) else {
            return;
        };
        if let Err(e) = sink.try_send(frame) {
            warn!(client = id, error = %e, "outbound queue refused frame");
            self.evictions.push_back(id);
        }
    }

    fn process_evictions(&mut self) {
        while let Some(id) = self.evictions.pop_front() {
            if self.clients.contains_key(&id) {
                warn!(client = id, "evicting slow client");
                self.remove_client(id);
            }
        }
    }
}

/// Tells `id` it is now host.
fn host_notice(id: ClientId) -> Bytes {
    OutboundFrame::encode(id, Opcode::MigrateHost.to_u8(), &[])
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    #[derive(Clone, Default)]
    struct VecSink {
        frames: Rc<RefCell<Vec<Bytes>>>,
        closed: Rc<RefCell<bool>>,
    }

    impl ClientSink for VecSink {
        fn try_send(&self, frame: Bytes) -> Result<(), SinkError> {
            if *self.closed.borrow() {
                return Err(SinkError::Closed);
            }
            self.frames.borrow_mut().push(frame);
            Ok(())
        }

        fn replay(&self, frames: Vec<Bytes>) -> Result<(), SinkError> {
            frames.into_iter().try_for_each(|frame| self.try_send(frame))
        }

        fn close(&self) {
            *self.closed.borrow_mut() = true;
        }
    }

    impl VecSink {
        fn take(&self) -> Vec<OutboundFrame> {
            let frames: Vec<Bytes> = self.frames.borrow_mut().drain(..).collect();
            frames.into_iter().map(|b| OutboundFrame::decode(b).unwrap()).collect()
        }
    }

    fn room() -> Room<VecSink> {
        Room::new(RoomConfig::default())
    }

    #[test]
    fn first_client_becomes_host() {
        let mut room = room();
        let sink = VecSink::default();

        let id = room.register(sink.clone()).unwrap();

        assert_eq!(id, 0);
        assert_eq!(room.host(), Some(0));
        let frames = sink.take();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].message_type, Opcode::MigrateHost.to_u8());
        assert_eq!(frames[0].sender, 0);
    }

    #[test]
    fn host_passes_on_and_clears_when_empty() {
        let mut room = room();
        let a = room.register(VecSink::default()).unwrap();
        let b = room.register(VecSink::default()).unwrap();

        room.unregister(a);
        assert_eq!(room.host(), Some(b));

        room.unregister(b);
        assert_eq!(room.host(), None);
        assert!(room.is_empty());
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let mut room = room();
        room.register(VecSink::default()).unwrap();

        assert!(!room.unregister(7));
        assert_eq!(room.len(), 1);
    }

    #[test]
    fn oversized_outbound_is_dropped() {
        let mut room = Room::new(RoomConfig { max_message_size: 8, ..RoomConfig::default() });
        let sink = VecSink::default();
        let id = room.register(sink.clone()).unwrap();
        sink.take();

        // 2 + 4 bytes inbound is fine, but 5 + 4 bytes outbound is not.
        room.receive(id, Bytes::from_static(&[0, 1, 1, 2, 3, 4]));
        assert!(sink.take().is_empty());

        room.receive(id, Bytes::from_static(&[0, 1, 1, 2, 3]));
        assert_eq!(sink.take().len(), 1);
    }

    #[test]
    fn closed_room_rejects_registration() {
        let mut room = room();
        let sink = VecSink::default();
        room.register(sink.clone()).unwrap();

        room.close();

        assert!(*sink.closed.borrow());
        assert_eq!(room.register(VecSink::default()), Err(RoomError::Closed));
        assert!(room.is_empty());
        assert_eq!(room.host(), None);
    }

    #[test]
    fn exhausted_pool_surfaces_to_registrant() {
        let mut room = Room::new(RoomConfig { max_clients: 1, ..RoomConfig::default() });
        room.register(VecSink::default()).unwrap();

        let err = room.register(VecSink::default()).unwrap_err();
        assert!(matches!(err, RoomError::Exhausted(_)));
        assert_eq!(room.len(), 1);
    }
}
