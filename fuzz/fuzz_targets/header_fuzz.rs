#![no_main]
use libfuzzer_sys::fuzz_target;
use vcpatch::vcdiff::header::{FileHeader, WindowHeader};

fuzz_target!(|data: &[u8]| {
    let mut r = data;
    if FileHeader::decode(&mut r).is_ok() {
        while let Ok(Some(_)) = WindowHeader::decode(&mut r) {}
    }
    let mut r = data;
    let _ = WindowHeader::decode(&mut r);
});
