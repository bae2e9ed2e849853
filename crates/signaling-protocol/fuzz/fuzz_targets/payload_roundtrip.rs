#![no_main]

use libfuzzer_sys::fuzz_target;
use signaling_protocol::{decode_payload, encode_payload, Topic};

fuzz_target!(|data: &[u8]| {
    for topic in Topic::ALL {
        if let Ok(message) = decode_payload(topic, data) {
            // Anything we accept must survive a re-encode
            let encoded = encode_payload(&message).expect("re-encode accepted message");
            let again = decode_payload(topic, &encoded).expect("decode re-encoded message");
            assert_eq!(message, again);
        }
    }
});
