//! Property tests for chunk arithmetic and host placement

use proptest::prelude::*;
use scatterfs::data::{ChunkManager, Distributor, GuidedTable, path_hash};

fn path_strategy() -> impl Strategy<Value = String> {
    "/[a-z0-9_]{1,12}(/[a-z0-9_.]{1,12}){0,3}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_segments_cover_range_exactly(
        log2_chunk in 6u32..16,
        offset in 0u64..1 << 24,
        count in 1u64..1 << 18,
    ) {
        let chunks = ChunkManager::with_chunk_size(1 << log2_chunk).unwrap();
        let span = chunks.span(offset, count).unwrap().unwrap();
        prop_assert_eq!(span.count(), chunks.count(offset, count));

        let mut expected_buf_offset = 0;
        for index in span.iter() {
            let segment = chunks.segment(offset, count, index);
            prop_assert!(segment.len > 0);
            prop_assert!(segment.offset_in_chunk + segment.len <= chunks.chunk_size());
            prop_assert_eq!(segment.buf_offset, expected_buf_offset);
            if index != span.first {
                prop_assert_eq!(segment.offset_in_chunk, 0);
            }
            expected_buf_offset += segment.len;
        }
        prop_assert_eq!(expected_buf_offset, count);

        let first = chunks.segment(offset, count, span.first);
        prop_assert_eq!(first.offset_in_chunk, chunks.overrun(offset));
    }

    #[test]
    fn prop_hash_placement_in_range_and_stable(
        path in path_strategy(),
        chunk_id in 0u64..1 << 20,
        hosts_size in 1u32..64,
        localhost_a in 0u32..64,
        localhost_b in 0u32..64,
    ) {
        let a = Distributor::hash(localhost_a % hosts_size, hosts_size).unwrap();
        let b = Distributor::hash(localhost_b % hosts_size, hosts_size).unwrap();

        let host = a.locate_data(&path, chunk_id);
        prop_assert!(host < hosts_size);
        // Placement never depends on who asks
        prop_assert_eq!(host, b.locate_data(&path, chunk_id));
        prop_assert_eq!(a.locate_metadata(&path), b.locate_metadata(&path));
        prop_assert_eq!(
            u64::from(host),
            path_hash(&format!("{}{}", path, chunk_id)) % u64::from(hosts_size)
        );
    }

    #[test]
    fn prop_forwarding_sends_all_data_to_one_host(
        path in path_strategy(),
        chunk_id in 0u64..1 << 20,
        hosts_size in 1u32..32,
        fwd in 0u32..32,
    ) {
        let fwd = fwd % hosts_size;
        let forwarding = Distributor::forwarding(0, hosts_size, fwd).unwrap();
        let hash = Distributor::hash(0, hosts_size).unwrap();

        prop_assert_eq!(forwarding.locate_data(&path, chunk_id), fwd);
        prop_assert_eq!(forwarding.locate_metadata(&path), hash.locate_metadata(&path));
    }

    #[test]
    fn prop_guided_prefix_colocates_data_with_metadata(
        name in "[a-z]{1,8}",
        chunk_id in 0u64..4096,
        hosts_size in 1u32..16,
    ) {
        let table = GuidedTable::parse("#/colo/\n", hosts_size).unwrap();
        let guided = Distributor::guided(0, hosts_size, table).unwrap();
        let path = format!("/colo/{}", name);

        prop_assert_eq!(guided.locate_data(&path, chunk_id), guided.locate_metadata(&path));

        // Outside the prefix the hash placement applies
        let other = format!("/other/{}", name);
        let hash = Distributor::hash(0, hosts_size).unwrap();
        prop_assert_eq!(guided.locate_data(&other, chunk_id), hash.locate_data(&other, chunk_id));
    }

    #[test]
    fn prop_guided_first_entry_wins(
        chunk_id in 0u64..1024,
        first in 0u32..8,
        second in 0u32..8,
    ) {
        let map = format!("/g {chunk_id} {first}\n/g {chunk_id} {second}\n");
        let table = GuidedTable::parse(&map, 8).unwrap();
        let guided = Distributor::guided(0, 8, table).unwrap();
        prop_assert_eq!(guided.locate_data("/g", chunk_id), first);
    }
}

#[test]
fn test_local_only_reports_single_host() {
    let local = Distributor::local_only(3);
    assert_eq!(local.hosts_size(), 1);
    assert_eq!(local.all_hosts(), vec![3]);
    assert_eq!(local.locate_data("/x", 17), 3);
    assert_eq!(local.locate_metadata("/x"), 3);
}
