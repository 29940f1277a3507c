#![no_main]

use bingo_sync_client::number::NumberCode;
use bingo_sync_client::ClientMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<ClientMessage>(data);

    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(msg) = serde_json::from_str::<ClientMessage>(s) {
            let _ = serde_json::to_string(&msg);
        }
        // Ball codes accept "L-v" strings; parsing must reject, not panic.
        let _ = s.parse::<NumberCode>();
    }
});
