//! Halo exchange between the owned and remote slices of a distributed vector.
use crate::comm::{CommElem, Communicator};
use crate::partition::RowPartition;
use crate::Real;

enum Pending<T: CommElem, C: Communicator> {
    Forward(C::Request<T>),
    Reverse(C::Request<T>),
}

/// Gathers remotely owned vector blocks into a local halo buffer, and
/// scatters halo contributions back to their owners with element-wise add.
///
/// An exchange is constructed collectively from the owning partition of the
/// vector and the strictly ascending list of remote nodes this rank reads.
/// During construction, every rank learns which of its own nodes the other
/// ranks request, so the apply-time exchanges need no further negotiation.
///
/// Both directions are split-phase on top of the communicator's posted
/// exchanges: `begin_forward` and `begin_reverse` post the transfer and
/// return without blocking, and the matching `end_*` call is the only point
/// that waits, so callers can compute while the exchange is in flight. The
/// forward direction fills the halo buffer: after `end_forward`, the block at
/// halo slot `c` holds the owner's current values for the `c`-th requested
/// node. The reverse direction sends the halo buffer back and `end_reverse`
/// adds each block into the owner's local slice. Both directions exploit that
/// the requested nodes are sorted: grouped by owner rank, the runs arrive in
/// exactly halo order, so no permutation buffer is needed.
///
/// A `begin_*` must be matched by its `end_*` before the next exchange
/// starts; overlapping or mismatched exchanges on one instance panic.
pub struct HaloExchange<T: CommElem, C: Communicator> {
    comm: C,
    block_size: usize,
    /// Per owner rank, how many halo nodes this rank pulls from it.
    pull_node_counts: Vec<usize>,
    /// Local node indices served to other ranks, grouped by requesting rank.
    serve_nodes: Vec<usize>,
    serve_node_counts: Vec<usize>,
    pending: Option<Pending<T, C>>,
}

impl<T, C> HaloExchange<T, C>
where
    T: Real + CommElem,
    C: Communicator,
{
    /// Collectively build an exchange for the given remote nodes.
    ///
    /// # Panics
    ///
    /// Panics if `halo_nodes` is not strictly ascending, or contains a node
    /// that is locally owned or outside the global range of `owning`.
    pub fn new(owning: &RowPartition<C>, halo_nodes: &[usize]) -> Self {
        let comm = owning.comm().clone();
        let size = comm.size();
        let local_range = owning.local_range();

        assert!(
            halo_nodes.windows(2).all(|w| w[0] < w[1]),
            "Halo nodes must be strictly ascending."
        );

        let mut pull_node_counts = vec![0; size];
        for &node in halo_nodes {
            assert!(
                !local_range.contains(&node),
                "Halo node {node} is owned by the calling rank."
            );
            let owner = owning
                .owner_of(node)
                .unwrap_or_else(|| panic!("Halo node {node} lies outside the global range."));
            pull_node_counts[owner] += 1;
        }

        // Tell every owner which of its nodes we read, and record which of
        // our nodes the others read.
        let serve_node_counts = comm.all_to_all(&pull_node_counts);
        let requested = comm.all_to_allv(halo_nodes, &pull_node_counts, &serve_node_counts);
        let serve_nodes = requested.into_iter().map(|node| node - local_range.start).collect();

        Self {
            comm,
            block_size: owning.block_size(),
            pull_node_counts,
            serve_nodes,
            serve_node_counts,
            pending: None,
        }
    }

    /// Number of remote nodes gathered by the forward direction.
    pub fn num_halo_nodes(&self) -> usize {
        self.pull_node_counts.iter().sum()
    }

    /// Post the gather of remote blocks from `local`, the owned slice of the
    /// source vector. Does not block; the gathered values become available
    /// through [`end_forward`](Self::end_forward).
    pub fn begin_forward(&mut self, local: &[T]) {
        assert!(self.pending.is_none(), "An exchange is already in flight.");
        let b = self.block_size;

        let mut packed = Vec::with_capacity(b * self.serve_nodes.len());
        for &node in &self.serve_nodes {
            packed.extend_from_slice(&local[b * node..b * (node + 1)]);
        }

        let send_counts: Vec<usize> = self.serve_node_counts.iter().map(|&c| b * c).collect();
        let recv_counts: Vec<usize> = self.pull_node_counts.iter().map(|&c| b * c).collect();
        let request = self.comm.begin_all_to_allv(&packed, &send_counts, &recv_counts);
        self.pending = Some(Pending::Forward(request));
    }

    /// Wait for the posted gather and publish the remote blocks into `halo`.
    ///
    /// # Panics
    ///
    /// Panics if no forward exchange is in flight, or if `halo` does not hold
    /// `block_size` scalars per halo node.
    pub fn end_forward(&mut self, halo: &mut [T]) {
        let request = match self.pending.take() {
            Some(Pending::Forward(request)) => request,
            Some(Pending::Reverse(_)) => panic!("A reverse exchange is in flight."),
            None => panic!("No forward exchange is in flight."),
        };
        let received = self.comm.complete_all_to_allv(request);
        assert_eq!(halo.len(), received.len(), "Halo buffer has the wrong length.");
        halo.copy_from_slice(&received);
    }

    /// Post the scatter of the halo buffer back to the owning ranks. Does not
    /// block; the owners' adds happen in [`end_reverse`](Self::end_reverse).
    pub fn begin_reverse(&mut self, halo: &[T]) {
        assert!(self.pending.is_none(), "An exchange is already in flight.");
        let b = self.block_size;
        assert_eq!(
            halo.len(),
            b * self.num_halo_nodes(),
            "Halo buffer has the wrong length."
        );

        let send_counts: Vec<usize> = self.pull_node_counts.iter().map(|&c| b * c).collect();
        let recv_counts: Vec<usize> = self.serve_node_counts.iter().map(|&c| b * c).collect();
        let request = self.comm.begin_all_to_allv(halo, &send_counts, &recv_counts);
        self.pending = Some(Pending::Reverse(request));
    }

    /// Wait for the posted scatter and add each received block into the owned
    /// slice `local` of the destination vector.
    ///
    /// # Panics
    ///
    /// Panics if no reverse exchange is in flight.
    pub fn end_reverse(&mut self, local: &mut [T]) {
        let request = match self.pending.take() {
            Some(Pending::Reverse(request)) => request,
            Some(Pending::Forward(_)) => panic!("A forward exchange is in flight."),
            None => panic!("No reverse exchange is in flight."),
        };
        let received = self.comm.complete_all_to_allv(request);
        let b = self.block_size;
        for (slot, &node) in self.serve_nodes.iter().enumerate() {
            for k in 0..b {
                local[b * node + k] += received[b * slot + k];
            }
        }
    }
}
