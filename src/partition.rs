//! Ownership partitions of a global block-structured index space.
use crate::comm::Communicator;
use eyre::ensure;
use std::ops::Range;

/// Contiguous per-rank ownership partition of a global set of nodes.
///
/// Rank `p` owns the node range `range_starts[p] .. range_starts[p + 1]`.
/// One node corresponds to `block_size` scalar unknowns stored contiguously,
/// so the sparsity structure of a transfer operator is expressed in nodes
/// while vectors store `block_size` scalars per node.
///
/// The partition is immutable once constructed and is usually shared between
/// assemblers, operators and vectors through an `Arc`.
#[derive(Debug, Clone)]
pub struct RowPartition<C> {
    comm: C,
    block_size: usize,
    range_starts: Vec<usize>,
}

impl<C: Communicator> RowPartition<C> {
    /// Construct a partition from explicit per-rank range starts.
    ///
    /// `range_starts` must have one entry per rank plus a final entry holding
    /// the global node count, start at zero and be non-decreasing.
    pub fn from_ranges(comm: C, block_size: usize, range_starts: Vec<usize>) -> eyre::Result<Self> {
        ensure!(block_size >= 1, "Block size must be at least 1.");
        ensure!(
            range_starts.len() == comm.size() + 1,
            "Expected {} range starts for a group of {} ranks, got {}.",
            comm.size() + 1,
            comm.size(),
            range_starts.len()
        );
        ensure!(range_starts[0] == 0, "The first range must start at node 0.");
        ensure!(
            range_starts.windows(2).all(|w| w[0] <= w[1]),
            "Range starts must be non-decreasing."
        );
        Ok(Self {
            comm,
            block_size,
            range_starts,
        })
    }

    /// Construct a partition collectively from the number of nodes owned by
    /// the calling rank.
    pub fn from_local_size(comm: C, block_size: usize, local_nodes: usize) -> eyre::Result<Self> {
        let counts = comm.all_gather(local_nodes);
        let mut range_starts = Vec::with_capacity(counts.len() + 1);
        let mut total = 0;
        range_starts.push(0);
        for count in counts {
            total += count;
            range_starts.push(total);
        }
        Self::from_ranges(comm, block_size, range_starts)
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total number of nodes across all ranks.
    pub fn global_nodes(&self) -> usize {
        *self.range_starts.last().unwrap()
    }

    /// The node range owned by the given rank.
    pub fn rank_range(&self, rank: usize) -> Range<usize> {
        self.range_starts[rank]..self.range_starts[rank + 1]
    }

    /// The node range owned by the calling rank.
    pub fn local_range(&self) -> Range<usize> {
        self.rank_range(self.comm.rank())
    }

    pub fn num_local_nodes(&self) -> usize {
        self.local_range().len()
    }

    /// Number of scalars in the local slice of a vector over this partition.
    pub fn local_scalar_len(&self) -> usize {
        self.block_size * self.num_local_nodes()
    }

    /// The rank owning the given global node, or `None` if the node lies
    /// outside the global range.
    pub fn owner_of(&self, node: usize) -> Option<usize> {
        if node >= self.global_nodes() {
            return None;
        }
        // The last rank whose range starts at or before the node. Empty
        // ranges sort before the occupied range containing the node, so the
        // search lands on the owner.
        Some(self.range_starts.partition_point(|&start| start <= node) - 1)
    }
}
