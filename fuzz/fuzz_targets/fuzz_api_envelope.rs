#![no_main]

use libfuzzer_sys::fuzz_target;
use live_quiz_sync::protocol::{ApiEnvelope, ReadyResponse, StatusSnapshot};

fuzz_target!(|data: &[u8]| {
    if let Ok(envelope) = serde_json::from_slice::<ApiEnvelope>(data) {
        let _ = envelope.clone().into_data::<StatusSnapshot>();
        let _ = envelope.clone().into_data::<ReadyResponse>();
        let _ = envelope.into_data::<()>();
    }
});
