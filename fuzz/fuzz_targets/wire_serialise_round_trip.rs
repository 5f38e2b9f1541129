#![no_main]
use libfuzzer_sys::fuzz_target;

use dns_wire::types::Message;

// any structurally-valid message which serialises at all decodes back
// to exactly itself
fuzz_target!(|message: Message| {
    if let Ok(serialised) = message.clone().into_octets() {
        let deserialised = Message::from_octets(&serialised);
        assert_eq!(Ok(message), deserialised);
    }
});
