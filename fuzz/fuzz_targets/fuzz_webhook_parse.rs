#![no_main]

use libfuzzer_sys::fuzz_target;
use shopwise::channels::{verify_signature, WhatsAppChannel};

fuzz_target!(|data: &[u8]| {
    let _ = verify_signature("fuzz-secret", data, "sha256=00");

    let Ok(payload) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let channel = WhatsAppChannel::new(
        "token".into(),
        "123".into(),
        "verify".into(),
        vec!["*".into()],
        "https://graph.facebook.com/v21.0",
    );
    for msg in channel.parse_webhook_payload(&payload) {
        assert!(!msg.content.trim().is_empty());
        assert!(msg.sender.starts_with('+'));
    }
});
