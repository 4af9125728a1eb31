//! Fuzz target for the [`Room`] engine
//!
//! Drives one room with arbitrary joins, departures and raw client frames,
//! including clients whose outbound queues saturate.
//!
//! # Invariants
//!
//! - NEVER panics on any frame from any client
//! - The host is registered, or absent exactly when the room is empty
//! - Every buffered frame was authored by a registered client
//! - Every live object is owned by a registered client
//! - Every queue the room refused to write to has been closed

#![no_main]

use std::{cell::RefCell, rc::Rc};

use arbitrary::Arbitrary;
use bytes::Bytes;
use hubbub_core::{ClientSink, Room, RoomConfig, SinkError};
use libfuzzer_sys::fuzz_target;

#[derive(Clone)]
struct BoundedSink {
    state: Rc<RefCell<SinkState>>,
}

struct SinkState {
    queued: usize,
    capacity: usize,
    refused: bool,
    closed: bool,
}

impl ClientSink for BoundedSink {
    fn try_send(&self, _frame: Bytes) -> Result<(), SinkError> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Err(SinkError::Closed);
        }
        if state.queued >= state.capacity {
            state.refused = true;
            return Err(SinkError::Full);
        }
        state.queued += 1;
        Ok(())
    }

    // The replay batch bypasses the live queue bound.
    fn replay(&self, _frames: Vec<Bytes>) -> Result<(), SinkError> {
        if self.state.borrow().closed {
            return Err(SinkError::Closed);
        }
        Ok(())
    }

    fn close(&self) {
        self.state.borrow_mut().closed = true;
    }
}

#[derive(Debug, Arbitrary)]
enum Event {
    Join { capacity: u8 },
    Leave { client: u8 },
    Send { client: u8, raw: Vec<u8> },
    Drain { client: u8 },
}

fuzz_target!(|events: Vec<Event>| {
    let config = RoomConfig { max_message_size: 256, max_clients: 16, ..RoomConfig::default() };
    let mut room = Room::new(config);
    let mut sinks: Vec<BoundedSink> = Vec::new();

    for event in events {
        match event {
            Event::Join { capacity } => {
                let state = SinkState {
                    queued: 0,
                    capacity: usize::from(capacity),
                    refused: false,
                    closed: false,
                };
                let sink = BoundedSink { state: Rc::new(RefCell::new(state)) };
                if room.register(sink.clone()).is_ok() {
                    sinks.push(sink);
                }
            },
            Event::Leave { client } => {
                room.unregister(u32::from(client % 16));
            },
            Event::Send { client, raw } => {
                room.receive(u32::from(client % 16), Bytes::from(raw));
            },
            Event::Drain { client } => {
                if let Some(sink) = room.sink(u32::from(client % 16)) {
                    sink.state.borrow_mut().queued = 0;
                }
            },
        }

        let clients = room.client_ids();
        match room.host() {
            Some(host) => assert!(room.contains(host)),
            None => assert!(clients.is_empty()),
        }

        let buffered: usize = clients.iter().map(|&id| room.buffered_by(id)).sum();
        assert_eq!(buffered, room.buffered_len());

        for sink in &sinks {
            let state = sink.state.borrow();
            if state.refused {
                assert!(state.closed);
            }
        }
    }

    let owned: usize = room.client_ids().iter().map(|&id| room.objects_owned_by(id).len()).sum();
    assert_eq!(owned, room.object_count());
});
