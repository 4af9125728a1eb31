//! Fuzz target for the inbound frame and control request decoders
//!
//! Clients control every byte the room decodes. Malformed input must be
//! rejected with an error, never a panic.
//!
//! # Invariants
//!
//! - Decoding NEVER panics, whatever the bytes or size limit
//! - A decoded frame is within the size limit and re-encodes to the input
//! - Control decoding only succeeds with enough payload for its ids
//! - A decoded control request re-encodes to a prefix of its payload

#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use hubbub_proto::{ControlRequest, InboundFrame, OutboundFrame, Target};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    max_message_size: u16,
    raw: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    let max = usize::from(input.max_message_size);
    let raw = Bytes::from(input.raw);

    let Ok(frame) = InboundFrame::decode(raw.clone(), max) else {
        return;
    };

    assert!(raw.len() <= max);
    assert_eq!(frame.encode(), raw);

    let outbound = OutboundFrame::encode(7, frame.message_type, &frame.payload);
    let decoded = OutboundFrame::decode(outbound).unwrap();
    assert_eq!(decoded.sender, 7);
    assert_eq!(decoded.payload, frame.payload);

    if frame.target != Target::Server {
        return;
    }
    if let Ok(request) = ControlRequest::decode(frame.message_type, &frame.payload) {
        let encoded = request.encode_payload();
        assert_eq!(request.opcode().to_u8(), frame.message_type);
        assert!(frame.payload.starts_with(&encoded));
    }
});
