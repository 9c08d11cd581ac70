#![no_main]

use libfuzzer_sys::fuzz_target;
use pgwire_lite::protocol::{decode_message, Framer};

fuzz_target!(|data: &[u8]| {
    // Several messages arriving in a single TCP segment
    let mut framer = Framer::new();
    framer.extend(data);

    while let Ok(Some(frame)) = framer.next_frame() {
        let _ = decode_message(&frame);
    }
});
