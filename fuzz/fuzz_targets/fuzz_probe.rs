#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(info) = avifkit::probe(data) {
        // metadata and a full parse must agree
        if let Ok(container) = avifkit::Container::parse(data) {
            assert_eq!(container.frame_count(), info.frame_count);
        }
    }
});
