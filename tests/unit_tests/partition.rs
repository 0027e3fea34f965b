use super::on_ranks;
use gridtransfer::comm::{Communicator, SerialComm};
use gridtransfer::RowPartition;
use util::assert_panics;

#[test]
fn owner_lookup_with_empty_ranges() {
    let partition = RowPartition::from_ranges(SerialComm, 1, vec![0, 4]).unwrap();
    assert_eq!(partition.owner_of(0), Some(0));
    assert_eq!(partition.owner_of(3), Some(0));
    assert_eq!(partition.owner_of(4), None);

    let results = on_ranks(3, |comm| {
        let partition = RowPartition::from_ranges(comm, 1, vec![0, 2, 2, 4]).unwrap();
        (
            partition.owner_of(0),
            partition.owner_of(1),
            partition.owner_of(2),
            partition.owner_of(3),
            partition.owner_of(4),
        )
    });
    for owners in results {
        // Rank 1 owns the empty range [2, 2); nodes 2 and 3 belong to rank 2.
        assert_eq!(owners, (Some(0), Some(0), Some(2), Some(2), None));
    }
}

#[test]
fn from_local_size_builds_contiguous_ranges() {
    let results = on_ranks(3, |comm| {
        let rank = comm.rank();
        let partition = RowPartition::from_local_size(comm, 2, rank + 1).unwrap();
        (
            partition.local_range(),
            partition.global_nodes(),
            partition.local_scalar_len(),
        )
    });
    assert_eq!(results[0], (0..1, 6, 2));
    assert_eq!(results[1], (1..3, 6, 4));
    assert_eq!(results[2], (3..6, 6, 6));
}

#[test]
fn invalid_ranges_are_rejected() {
    assert!(RowPartition::from_ranges(SerialComm, 0, vec![0, 4]).is_err());
    assert!(RowPartition::from_ranges(SerialComm, 1, vec![0, 4, 8]).is_err());
    assert!(RowPartition::from_ranges(SerialComm, 1, vec![1, 4]).is_err());
    assert!(RowPartition::from_ranges(SerialComm, 1, vec![0; 0]).is_err());

    let results = on_ranks(2, |comm| {
        RowPartition::from_ranges(comm, 1, vec![0, 3, 2]).is_err()
    });
    assert_eq!(results, vec![true, true]);
}

#[test]
fn rank_range_out_of_bounds_panics() {
    let partition = RowPartition::from_ranges(SerialComm, 1, vec![0, 4]).unwrap();
    assert_panics!(partition.rank_range(1));
}
