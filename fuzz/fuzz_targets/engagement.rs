#![no_main]

use libfuzzer_sys::fuzz_target;
use mdoc_proximity::definitions::device_engagement::{self, Engagement};

fuzz_target!(|data: &[u8]| {
    if let Ok(engagement) = Engagement::parse(data) {
        let _ = engagement.ble_ident();
    }
    if let Ok(payload) = std::str::from_utf8(data) {
        let _ = device_engagement::from_qr_code_uri(payload);
    }
});
