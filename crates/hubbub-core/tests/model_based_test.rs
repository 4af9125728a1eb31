//! Model-based property tests for the room engine.
//!
//! Random operation sequences are applied to a real [`Room`] and to a small
//! reference model; after every step the observable state must agree.
//!
//! ```text
//! proptest generates: Vec<Operation>
//!                          │
//!              ┌───────────┴───────────┐
//!              ▼                       ▼
//!          ModelRoom                 Room
//!         (reference)              (real)
//!              └───────── compare ─────┘
//! ```

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use hubbub_core::{ClientSink, Room, RoomConfig, SinkError};
use hubbub_proto::{ClientId, ControlRequest, InboundFrame, ObjectId, Target};
use proptest::prelude::*;

/// Sink that accepts everything. Eviction is covered by the room tests.
struct NullSink;

impl ClientSink for NullSink {
    fn try_send(&self, _frame: Bytes) -> Result<(), SinkError> {
        Ok(())
    }

    fn replay(&self, _frames: Vec<Bytes>) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(&self) {}
}

/// Operations on the room. Client slots are indexes into the list of
/// currently registered clients, so every operation lands on someone.
#[derive(Debug, Clone)]
enum Operation {
    Join,
    Leave { slot: usize },
    Broadcast { slot: usize, target: Target },
    Instantiate { slot: usize, object: ObjectId },
    Destroy { slot: usize, object: ObjectId },
    Transfer { slot: usize, object: ObjectId, to_slot: usize },
    MigrateHost { slot: usize, to_slot: usize },
}

/// Reference model of the room state.
#[derive(Default)]
struct ModelRoom {
    clients: BTreeSet<ClientId>,
    host: Option<ClientId>,
    /// Authors of buffered frames, in retention order.
    buffered: Vec<ClientId>,
    objects: BTreeMap<ObjectId, ClientId>,
}

impl ModelRoom {
    fn pick(&self, slot: usize) -> Option<ClientId> {
        if self.clients.is_empty() {
            return None;
        }
        self.clients.iter().nth(slot % self.clients.len()).copied()
    }

    fn join(&mut self) -> ClientId {
        let id = (0..).find(|id| !self.clients.contains(id)).unwrap_or_default();
        self.clients.insert(id);
        if self.host.is_none() {
            self.host = Some(id);
        }
        id
    }

    fn leave(&mut self, id: ClientId) {
        self.clients.remove(&id);
        self.buffered.retain(|author| *author != id);
        if self.host == Some(id) {
            self.host = self.clients.iter().next().copied();
        }
        match self.host {
            Some(host) => {
                for owner in self.objects.values_mut() {
                    if *owner == id {
                        *owner = host;
                    }
                }
            },
            None => self.objects.retain(|_, owner| *owner != id),
        }
    }
}

fn frame(target: Target, message_type: u8, payload: &[u8]) -> Bytes {
    InboundFrame { target, message_type, payload: Bytes::copy_from_slice(payload) }.encode()
}

fn control(request: ControlRequest) -> Bytes {
    frame(Target::Server, request.opcode().to_u8(), &request.encode_payload())
}

fn apply(model: &mut ModelRoom, room: &mut Room<NullSink>, op: &Operation) {
    match *op {
        Operation::Join => {
            let expected = model.join();
            let id = room.register(NullSink).unwrap();
            assert_eq!(id, expected, "ids are handed out smallest-first");
        },
        Operation::Leave { slot } => {
            if let Some(id) = model.pick(slot) {
                model.leave(id);
                assert!(room.unregister(id));
            }
        },
        Operation::Broadcast { slot, target } => {
            if let Some(id) = model.pick(slot) {
                if target.is_buffered() {
                    model.buffered.push(id);
                }
                room.receive(id, frame(target, 64, &[1, 2, 3]));
            }
        },
        Operation::Instantiate { slot, object } => {
            if let Some(id) = model.pick(slot) {
                model.objects.entry(object).or_insert(id);
                room.receive(id, control(ControlRequest::Instantiate { object_id: object }));
            }
        },
        Operation::Destroy { slot, object } => {
            if let Some(id) = model.pick(slot) {
                if model.objects.get(&object) == Some(&id) {
                    model.objects.remove(&object);
                }
                room.receive(id, control(ControlRequest::Destroy { object_id: object }));
            }
        },
        Operation::Transfer { slot, object, to_slot } => {
            if let (Some(id), Some(target)) = (model.pick(slot), model.pick(to_slot)) {
                if let Some(owner) = model.objects.get_mut(&object) {
                    if *owner == id {
                        *owner = target;
                    }
                }
                let request =
                    ControlRequest::TransferControlAuthority { object_id: object, target };
                room.receive(id, control(request));
            }
        },
        Operation::MigrateHost { slot, to_slot } => {
            if let (Some(id), Some(target)) = (model.pick(slot), model.pick(to_slot)) {
                model.host = Some(target);
                room.receive(id, control(ControlRequest::MigrateHost { target }));
            }
        },
    }
}

fn check(model: &ModelRoom, room: &Room<NullSink>) {
    let ids: Vec<_> = model.clients.iter().copied().collect();
    assert_eq!(room.client_ids(), ids);

    // Host is always registered, and absent only when the room is empty.
    assert_eq!(room.host(), model.host);
    match room.host() {
        Some(host) => assert!(room.contains(host)),
        None => assert!(room.is_empty()),
    }

    assert_eq!(room.buffered_len(), model.buffered.len());
    for id in &ids {
        let authored = model.buffered.iter().filter(|a| *a == id).count();
        assert_eq!(room.buffered_by(*id), authored);
    }

    assert_eq!(room.object_count(), model.objects.len());
    for (object, owner) in &model.objects {
        assert_eq!(room.object_owner(*object), Some(*owner));
        assert!(room.contains(*owner), "object {object} owned by departed client");
    }
}

fn target_strategy() -> impl Strategy<Value = Target> {
    prop_oneof![
        Just(Target::AllClients),
        Just(Target::OtherClients),
        Just(Target::AllClientsBuffered),
        Just(Target::OtherClientsBuffered),
        Just(Target::Host),
    ]
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    let slot = 0..8usize;
    let object = 0..6u32;

    prop_oneof![
        // Weight towards membership churn, which is where the invariants bite
        4 => Just(Operation::Join),
        3 => slot.clone().prop_map(|slot| Operation::Leave { slot }),
        3 => (slot.clone(), target_strategy())
            .prop_map(|(slot, target)| Operation::Broadcast { slot, target }),
        2 => (slot.clone(), object.clone())
            .prop_map(|(slot, object)| Operation::Instantiate { slot, object }),
        1 => (slot.clone(), object.clone())
            .prop_map(|(slot, object)| Operation::Destroy { slot, object }),
        1 => (slot.clone(), object, slot.clone())
            .prop_map(|(slot, object, to_slot)| Operation::Transfer { slot, object, to_slot }),
        1 => (slot.clone(), slot)
            .prop_map(|(slot, to_slot)| Operation::MigrateHost { slot, to_slot }),
    ]
}

proptest! {
    /// The real room tracks the reference model through arbitrary churn.
    #[test]
    fn prop_room_matches_model(ops in prop::collection::vec(operation_strategy(), 0..80)) {
        let mut model = ModelRoom::default();
        let mut room = Room::new(RoomConfig::default());

        for op in &ops {
            apply(&mut model, &mut room, op);
            check(&model, &room);
        }
    }

    /// Once everyone has left, nothing about them survives.
    #[test]
    fn prop_empty_room_retains_nothing(ops in prop::collection::vec(operation_strategy(), 0..80)) {
        let mut model = ModelRoom::default();
        let mut room = Room::new(RoomConfig::default());

        for op in &ops {
            apply(&mut model, &mut room, op);
        }
        for id in room.client_ids() {
            room.unregister(id);
        }

        prop_assert!(room.is_empty());
        prop_assert_eq!(room.host(), None);
        prop_assert_eq!(room.buffered_len(), 0);
        prop_assert_eq!(room.object_count(), 0);
    }
}
