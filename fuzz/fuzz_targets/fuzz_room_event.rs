#![no_main]

use bingo_sync_client::normalizer::{Normalized, Normalizer};
use bingo_sync_client::RoomEvent;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // The normalizer must never panic, whatever the server sends.
    if let Normalized::Event(event) = Normalizer::new().normalize_text(text) {
        // Accepted events re-serialize to a frame the normalizer accepts again.
        let frame = serde_json::to_string(&event).unwrap();
        assert!(matches!(
            Normalizer::new().normalize_text(&frame),
            Normalized::Event(_)
        ));
    }

    let _ = serde_json::from_str::<RoomEvent>(text);
});
