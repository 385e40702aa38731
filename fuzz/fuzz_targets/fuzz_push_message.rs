#![no_main]

use libfuzzer_sys::fuzz_target;
use live_quiz_sync::protocol::PushMessage;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        // Anything that parses must encode and parse back to the same message.
        if let Ok(message) = PushMessage::parse(text) {
            if let Ok(json) = message.to_json() {
                if !matches!(message, PushMessage::Other { .. }) {
                    assert_eq!(PushMessage::parse(&json).ok(), Some(message));
                }
            }
        }
    }
});
