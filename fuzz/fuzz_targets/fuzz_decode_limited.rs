#![no_main]

use avifkit::{DecodeRequest, DecoderConfig, decode_request};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let config = DecoderConfig::new().frame_size_limit(1 << 16);
    let _ = decode_request(&DecodeRequest::new(data).decode_all(false), &config);
});
