#![no_main]

use libfuzzer_sys::fuzz_target;
use signaling_protocol::{decode_payload, unwrap_packet, Topic};

fuzz_target!(|data: &[u8]| {
    // Decoding must never panic, only return Err for invalid input
    for topic in Topic::ALL {
        let _ = decode_payload(topic, data);
    }
    let _ = unwrap_packet(data);
});
