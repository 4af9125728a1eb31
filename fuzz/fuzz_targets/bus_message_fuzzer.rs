//! Fuzz target for discovery bus decoding
//!
//! Bus messages arrive from other processes and carry CBOR bodies.
//!
//! # Invariants
//!
//! - Decoding NEVER panics on arbitrary bytes or channel names
//! - A decoded message belongs to the channel it arrived on
//! - A decoded message survives an encode/decode cycle unchanged

#![no_main]

use arbitrary::Arbitrary;
use hubbub_proto::{
    BusMessage,
    bus::{CHANNEL_ROOMS, CHANNEL_SERVERS},
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Channel {
    Servers,
    Rooms,
    Other(String),
}

fuzz_target!(|input: (Channel, Vec<u8>)| {
    let (channel, data) = input;
    let channel = match &channel {
        Channel::Servers => CHANNEL_SERVERS,
        Channel::Rooms => CHANNEL_ROOMS,
        Channel::Other(name) => name.as_str(),
    };

    let Ok(message) = BusMessage::decode(channel, &data) else {
        return;
    };
    assert_eq!(message.channel(), channel);

    let encoded = message.encode().unwrap();
    let decoded = BusMessage::decode(channel, &encoded).unwrap();
    assert_eq!(decoded, message);
});
