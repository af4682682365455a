#![no_main]

use civic_portal_types::{Envelope, NotificationFrame, NotificationRecord};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(frame) = NotificationFrame::decode(text) {
        let record = NotificationRecord::from_frame(frame.clone());
        assert_eq!(record.tracking_number, frame.tracking_number);
        assert!(!record.read);

        // A record must survive the persisted-list encoding unchanged.
        let encoded = serde_json::to_string(&vec![record.clone()]).unwrap();
        let decoded: Vec<NotificationRecord> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, vec![record]);
    }

    let _ = serde_json::from_str::<Envelope<serde_json::Value>>(text);
});
