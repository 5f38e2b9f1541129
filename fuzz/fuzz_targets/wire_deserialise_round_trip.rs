#![no_main]
use libfuzzer_sys::fuzz_target;

use dns_wire::types::Message;

// decoding arbitrary bytes either fails cleanly or yields a message
// which survives an encode/decode round trip unchanged
fuzz_target!(|data: &[u8]| {
    if let Ok(deserialised) = Message::from_octets(data) {
        let serialised = deserialised.clone().into_octets().unwrap();
        let re_deserialised = Message::from_octets(&serialised);
        assert_eq!(Ok(deserialised), re_deserialised);
    }
});
