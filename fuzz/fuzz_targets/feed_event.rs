// fuzz/fuzz_targets/feed_event.rs
//
// Live-feed frames come straight off the network. Decoding must never panic,
// and anything it accepts must survive re-encoding.
#![no_main]

use jobwatch_types::{FeedEvent, JobPhase};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(event) = FeedEvent::decode(text) else {
        return;
    };

    if let Some(phase) = event.terminal_phase() {
        assert!(phase.is_terminal());
        assert_ne!(phase, JobPhase::Running);
    }

    let encoded = serde_json::to_string(&event).expect("decoded event re-encodes");
    let again = FeedEvent::decode(&encoded).expect("re-encoded event decodes");
    assert_eq!(again.terminal_phase(), event.terminal_phase());
});
