#![no_main]
use libfuzzer_sys::fuzz_target;
use vcpatch::stream::NoSource;
use vcpatch::vcdiff::{DecodeOptions, VCDIFF_MAGIC, VcdiffDecoder};

fn decode_bounded(source: Option<&[u8]>, patch: &[u8]) {
    let options = DecodeOptions {
        max_target_window: 1 << 20,
        ..Default::default()
    };
    let mut out = Vec::new();
    let _ = match source {
        Some(src) => VcdiffDecoder::with_options(Some(src), patch, &mut out, options).decode(),
        None => VcdiffDecoder::with_options(None::<NoSource>, patch, &mut out, options).decode(),
    };
}

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must only ever produce errors.
    decode_bounded(None, data);

    if data.len() >= 2 {
        let split = data.len() / 2;
        let (source, patch) = data.split_at(split);
        decode_bounded(Some(source), patch);
    }

    // Same bytes behind a valid magic, so parsing reaches the windows.
    let mut patch = VCDIFF_MAGIC.to_vec();
    patch.extend_from_slice(data);
    decode_bounded(Some(data), &patch);
});
