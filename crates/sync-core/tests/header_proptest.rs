//! Header round-trip as a property (spec §8 invariant 1): for any header
//! whose fields fit the fixed-width decimal encoding, `parse(format(h)) ==
//! h`.

use proptest::prelude::*;
use sync_core::framed::{Header, Segment, HEADER_LEN};

fn any_segment() -> impl Strategy<Value = Segment> {
    prop_oneof![
        Just(Segment::Whole),
        Just(Segment::First),
        Just(Segment::Middle),
        Just(Segment::Last),
    ]
}

proptest! {
    #[test]
    fn header_round_trips_for_any_field_within_bounds(
        version in 0u16..100,
        segment in any_segment(),
        resource_id in 0u64..100_000_000,
        sequence_nr in 0u64..10_000_000_000,
        total_length in 0u64..1_000_000_000_000,
    ) {
        let header = Header::new(version, segment, resource_id, sequence_nr, total_length);
        let formatted = header.format();
        prop_assert_eq!(formatted.len(), HEADER_LEN);
        let parsed = Header::parse(formatted.as_bytes()).unwrap();
        prop_assert_eq!(parsed, header);
    }
}
