use gridtransfer::csr::{accumulate_offsets, restore_offsets, sort_and_dedup_rows};

#[test]
fn accumulate_offsets_turns_counts_into_offsets() {
    let mut offsets = vec![0, 2, 0, 3, 1];
    accumulate_offsets(&mut offsets);
    assert_eq!(offsets, vec![0, 2, 2, 5, 6]);
}

#[test]
fn restore_offsets_undoes_an_insertion_pass() {
    // Offsets after counting: [0, 2, 2, 5, 6]. An insertion pass advances
    // each offset to the end of its row.
    let mut offsets = vec![2, 2, 5, 6, 6];
    restore_offsets(&mut offsets);
    assert_eq!(offsets, vec![0, 2, 2, 5, 6]);
}

#[test]
fn sort_and_dedup_handles_unsorted_rows_with_duplicates() {
    let mut offsets = vec![0, 4, 4, 7];
    let mut indices = vec![3, 1, 3, 0, 5, 5, 5];
    sort_and_dedup_rows(&mut offsets, &mut indices);
    assert_eq!(offsets, vec![0, 3, 3, 4]);
    assert_eq!(indices, vec![0, 1, 3, 5]);
}

#[test]
fn sort_and_dedup_keeps_already_clean_rows() {
    let mut offsets = vec![0, 2, 3];
    let mut indices = vec![0, 4, 2];
    sort_and_dedup_rows(&mut offsets, &mut indices);
    assert_eq!(offsets, vec![0, 2, 3]);
    assert_eq!(indices, vec![0, 4, 2]);
}

#[test]
fn sort_and_dedup_empty_structure() {
    let mut offsets = vec![0];
    let mut indices: Vec<usize> = vec![];
    sort_and_dedup_rows(&mut offsets, &mut indices);
    assert_eq!(offsets, vec![0]);
    assert!(indices.is_empty());
}
