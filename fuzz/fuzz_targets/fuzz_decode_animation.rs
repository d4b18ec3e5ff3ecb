#![no_main]

use avifkit::{DecodeRequest, DecoderConfig, decode_request};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let config = DecoderConfig::new().strict(false).max_frames(64);
    if let Ok(image) = decode_request(&DecodeRequest::new(data), &config) {
        assert_eq!(image.frames.len(), image.info.frame_count as usize);
    }
});
