#![no_main]
use libfuzzer_sys::fuzz_target;
use tardiff::delta::{DeltaOptions, DeltaWriter, MemoryTree, apply_to_vec};
use tardiff::planner::{AlignedPlanner, Planner};

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let block_size = 1 + data[0] as usize * 16;
    let chunk_size = 1 + data[1] as usize * 64;
    let split = 2 + (data[2] as usize % (data.len() - 2));
    let old = &data[2..split];
    let new = &data[split..];

    let mut w = DeltaWriter::new(
        Vec::new(),
        DeltaOptions {
            level: 1,
            chunk_size,
        },
    )
    .unwrap();
    AlignedPlanner::new(b"old", old)
        .block_size(block_size)
        .plan(new, &mut w)
        .unwrap();
    let delta = w.finish().unwrap();

    let tree = MemoryTree::new().with_file("old", old.to_vec());
    let rebuilt = apply_to_vec(&delta, tree).unwrap();
    assert_eq!(rebuilt, new);
});
