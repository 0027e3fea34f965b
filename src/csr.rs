//! Helpers for building compressed-row structures in place.

/// Turn per-row counts into exclusive offsets.
///
/// On entry, `offsets[i + 1]` holds the count of row `i` and `offsets[0]` is
/// zero; on exit, `offsets[i] .. offsets[i + 1]` is the span of row `i`.
pub fn accumulate_offsets(offsets: &mut [usize]) {
    for i in 1..offsets.len() {
        offsets[i] += offsets[i - 1];
    }
}

/// Undo an accumulating-pointer insertion pass.
///
/// Inserting entry after entry while advancing `offsets[i]` leaves each
/// offset at the end of its row; shifting the array right by one restores the
/// row starts.
pub fn restore_offsets(offsets: &mut [usize]) {
    for i in (1..offsets.len()).rev() {
        offsets[i] = offsets[i - 1];
    }
    offsets[0] = 0;
}

/// Sort every row of a compressed-row structure ascending and merge duplicate
/// entries, compacting `indices` in place and rewriting `offsets` to the
/// post-dedup row spans.
pub fn sort_and_dedup_rows(offsets: &mut [usize], indices: &mut Vec<usize>) {
    assert!(!offsets.is_empty(), "Offsets must contain at least the initial zero.");
    let num_rows = offsets.len() - 1;
    let mut write = 0;
    for i in 0..num_rows {
        let (begin, end) = (offsets[i], offsets[i + 1]);
        indices[begin..end].sort_unstable();

        offsets[i] = write;
        let mut read = begin;
        while read < end {
            let index = indices[read];
            while read < end && indices[read] == index {
                read += 1;
            }
            // write <= read holds throughout since rows only shrink
            indices[write] = index;
            write += 1;
        }
    }
    offsets[num_rows] = write;
    indices.truncate(write);
}
