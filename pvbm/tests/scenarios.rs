//! End-to-end scenarios exercising the buffer manager and lookup engine
//! together, the way a caller assembling and classifying packets would.

use pvbm::lookup::LookupTable;
use pvbm::manager::{BufferManager, BufferManagerConfig};
use pvbm::traverse;

fn manager() -> BufferManager {
    BufferManager::new(BufferManagerConfig {
        pbufs_per_class: 64,
        pvbufs_per_class: 64,
        pvbuf_overflow_fract: pvbm::pvbuf_alloc::DEFAULT_FRACT,
    })
}

#[test]
fn alloc_100_byte_pbuf_and_check_length() {
    let mgr = manager();
    let data = vec![0xAB; 100];
    let p = mgr.alloc_pbuf(&data).unwrap();
    assert_eq!(traverse::calc_length(p), 100);
    mgr.release(p).unwrap();
}

#[test]
fn prepend_to_1050_bytes() {
    let mgr = manager();
    let base = mgr.alloc_pbuf(&vec![1u8; 1000]).unwrap();
    let ops = mgr.ops();
    let root = ops.prepend_bytes(base, &vec![2u8; 50]).unwrap();
    assert_eq!(traverse::calc_length(root), 1050);
    assert_eq!(traverse::calc_length_deep(root, mgr.pvbufs()), 1050);
    mgr.release(root).unwrap();
}

#[test]
fn streaming_checksum_over_1000_bytes() {
    let mgr = manager();
    // Deterministic pseudo-random bytes (no RNG dependency needed for a
    // fixed-seed LCG over a known range).
    let mut seed: u32 = 0x1234_5678;
    let mut data = vec![0u8; 1000];
    for b in &mut data {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        *b = (seed >> 24) as u8;
    }

    let ops = mgr.ops();
    let mut root = mgr.alloc_pbuf(&data[..200]).unwrap();
    for chunk in data[200..].chunks(200) {
        root = ops.append_bytes(root, chunk).unwrap();
    }
    assert_eq!(traverse::calc_length_deep(root, mgr.pvbufs()), 1000);

    let sum = traverse::checksum(root, mgr.pvbufs(), mgr.pbufs()).unwrap();
    let flat = traverse::copy_to(root, mgr.pvbufs(), mgr.pbufs()).unwrap();
    assert_eq!(flat, data);

    // Recomputing over the flattened bytes directly must agree with the
    // streaming, per-leaf computation.
    let mut expect_sum: u32 = 0;
    let mut it = flat.chunks(2);
    for pair in &mut it {
        if pair.len() == 2 {
            expect_sum += u32::from(u16::from_be_bytes([pair[0], pair[1]]));
        } else {
            expect_sum += u32::from(u16::from_be_bytes([pair[0], 0]));
        }
    }
    while expect_sum >> 16 != 0 {
        expect_sum = (expect_sum & 0xFFFF) + (expect_sum >> 16);
    }
    assert_eq!(sum, !(expect_sum as u16));

    mgr.release(root).unwrap();
}

#[test]
fn clone_500_800_matches_source_bytes() {
    let mgr = manager();
    let data: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
    let ops = mgr.ops();
    let mut root = mgr.alloc_pbuf(&data[..250]).unwrap();
    for chunk in data[250..].chunks(250) {
        root = ops.append_bytes(root, chunk).unwrap();
    }

    let cloned = ops.clone_range(root, 500, 300).unwrap();
    assert_eq!(traverse::calc_length(cloned), 300);
    let cloned_bytes = traverse::copy_to(cloned, mgr.pvbufs(), mgr.pbufs()).unwrap();
    assert_eq!(cloned_bytes, data[500..800]);

    mgr.release(root).unwrap();
    mgr.release(cloned).unwrap();
}

#[test]
fn segment_into_eight_pieces() {
    let mgr = manager();
    let ops = mgr.ops();
    let mut root = mgr.alloc_pbuf(&vec![9u8; 128]).unwrap();
    for _ in 0..3 {
        root = ops.append_bytes(root, &vec![9u8; 128]).unwrap();
    }
    for _ in 0..4 {
        root = ops.append_bytes(root, &vec![7u8; 104]).unwrap();
    }
    assert_eq!(traverse::calc_length_deep(root, mgr.pvbufs()), 4 * 128 + 4 * 104);

    let mut sizes = vec![128usize; 4];
    sizes.extend(std::iter::repeat(104usize).take(4));
    let pieces = ops.segment(root, &sizes).unwrap();
    assert_eq!(pieces.len(), 8);
    for (piece, &expected_size) in pieces.iter().zip(sizes.iter()) {
        assert_eq!(traverse::calc_length(*piece), expected_size as u64);
    }

    mgr.release(root).unwrap();
    for piece in pieces {
        mgr.release(piece).unwrap();
    }
}

#[test]
fn lpm_table_with_three_prefix_lengths() {
    // All three prefixes share the same 0xFF-filled pattern up to their
    // own boundary, so a longer key can satisfy more than one prefix at
    // once — the table must pick the longest (most specific) match.
    let prefix_35 = vec![0xFF, 0xFF, 0xFF, 0xFF, 0xE0]; // 32 full bits + top 3 of byte 4
    let prefix_75 = vec![0xFF; 9]
        .into_iter()
        .chain(std::iter::once(0xE0u8))
        .collect::<Vec<_>>(); // 72 full bits + top 3 of byte 9
    let prefix_130 = vec![0xFF; 16]
        .into_iter()
        .chain(std::iter::once(0xC0u8))
        .collect::<Vec<_>>(); // 128 full bits + top 2 of byte 16

    let mut table = LookupTable::new_dynamic_lpm("routes", "no-route");
    table.add_lpm(prefix_35, 35, "net-35").unwrap();
    table.add_lpm(prefix_75, 75, "net-75").unwrap();
    table.add_lpm(prefix_130, 130, "net-130").unwrap();

    // Short enough that only the /35 entry's length requirement is met.
    let key_35 = vec![0xFFu8, 0xFF, 0xFF, 0xFF, 0xFF];
    assert_eq!(*table.lookup(&key_35), "net-35");

    // Long enough to also satisfy /35, but /75 is more specific and wins.
    let key_75 = vec![0xFFu8; 10];
    assert_eq!(*table.lookup(&key_75), "net-75");

    // Long enough to satisfy all three; /130 is the most specific.
    let key_130 = vec![0xFFu8; 18];
    assert_eq!(*table.lookup(&key_130), "net-130");

    let no_match = vec![0x00u8; 18];
    assert_eq!(*table.lookup(&no_match), "no-route");
}
