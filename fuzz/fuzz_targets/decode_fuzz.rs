#![no_main]
use libfuzzer_sys::fuzz_target;
use tardiff::delta::{MemoryTree, OpReader, apply_to_vec};
use tardiff::format::DELTA_MAGIC;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must only ever produce errors.
    let _ = apply_to_vec(data, MemoryTree::new());

    // Put the magic in front so the op stream parser gets exercised too.
    // The first half of the input doubles as an old file named "f".
    let split = data.len() / 2;
    let (old, body) = data.split_at(split);
    let mut delta = DELTA_MAGIC.to_vec();
    delta.extend_from_slice(body);
    let tree = MemoryTree::new().with_file("f", old.to_vec());
    let _ = apply_to_vec(&delta, &tree);

    if let Ok(reader) = OpReader::new(delta.as_slice()) {
        for record in reader.take(1024) {
            let _ = record;
        }
    }
});
