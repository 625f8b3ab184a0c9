//! Fuzz target for BrokerFrame::decode
//!
//! Arbitrary bytes through the frame decoder. Looks for panics, size
//! overflows and malformed headers that slip past validation.
//!
//! # Invariants
//!
//! - NEVER panic; invalid input is an error
//! - Any frame that decodes re-encodes to bytes that decode to the same frame

#![no_main]

use keyward_proto::BrokerFrame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = BrokerFrame::decode(data) else {
        return;
    };

    let encoded = frame.to_bytes().expect("decoded frame must re-encode");
    let again = BrokerFrame::decode(&encoded).expect("re-encoded frame must decode");
    assert_eq!(frame, again);
});
