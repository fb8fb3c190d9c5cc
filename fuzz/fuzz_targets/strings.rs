#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Some(decoded) = heaplens_dump::strings::percent_decode(text) {
            let _ = heaplens_dump::strings::percent_encode(&decoded);
        }
    }
});
