#![no_main]

use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use pgwire_lite::protocol::{decode_message, Frame, Framer};

#[derive(Debug)]
struct StreamingInput {
    data: Vec<u8>,
    split_points: Vec<u8>,
}

impl<'a> Arbitrary<'a> for StreamingInput {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        Ok(Self {
            data: u.arbitrary()?,
            split_points: u.arbitrary()?,
        })
    }
}

fn frames_in_one_read(data: &[u8]) -> Vec<Frame> {
    let mut framer = Framer::new();
    framer.extend(data);
    framer.drain_frames().unwrap_or_default()
}

fuzz_target!(|input: StreamingInput| {
    if input.data.is_empty() {
        return;
    }

    let mut splits: Vec<usize> = input
        .split_points
        .iter()
        .map(|&b| (b as usize) % (input.data.len() + 1))
        .collect();
    splits.push(0);
    splits.push(input.data.len());
    splits.sort_unstable();
    splits.dedup();

    // Feed data in chunks; the frames produced must not depend on chunking
    let mut framer = Framer::new();
    let mut frames = Vec::new();
    let mut failed = false;
    for window in splits.windows(2) {
        framer.extend(&input.data[window[0]..window[1]]);
        match framer.drain_frames() {
            Ok(batch) => frames.extend(batch),
            Err(_) => {
                failed = true;
                break;
            }
        }
    }

    if !failed {
        assert_eq!(frames, frames_in_one_read(&input.data));
    }
    for frame in &frames {
        let _ = decode_message(frame);
    }
});
