//! Assembly and application of distributed block-sparse transfer operators.
use crate::comm::{CommElem, Communicator};
use crate::csr::{accumulate_offsets, restore_offsets, sort_and_dedup_rows};
use crate::kernels::{select_kernels, BlockKernel};
use crate::partition::RowPartition;
use crate::scatter::HaloExchange;
use crate::vector::BlockVector;
use crate::Real;
use eyre::{bail, ensure};
use itertools::izip;
use log::warn;
use std::cmp::max;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// What to do with contributions whose output row is owned by no rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnroutablePolicy {
    /// Drop the contribution and log a warning (the default).
    #[default]
    Warn,
    /// Fail `finalize` on the contributing rank.
    Error,
}

/// Typical weights per row for a trilinear hexahedral stencil; used to size
/// the contribution scratch up front.
const STENCIL_WEIGHTS_PER_ROW: usize = 27;

/// Row contributions buffered until finalization.
///
/// Stores one global output row number per contribution, with the flat input
/// node and weight data addressed through a shared offset array. Rows may
/// repeat and node lists may contain duplicates; both are resolved during
/// finalization.
#[derive(Debug, Clone)]
struct ContributionBuffer<T> {
    rows: Vec<usize>,
    offsets: Vec<usize>,
    nodes: Vec<usize>,
    weights: Vec<T>,
}

impl<T: Real> ContributionBuffer<T> {
    fn with_row_capacity(rows: usize) -> Self {
        let mut offsets = Vec::with_capacity(rows + 1);
        offsets.push(0);
        Self {
            rows: Vec::with_capacity(rows),
            offsets,
            nodes: Vec::with_capacity(STENCIL_WEIGHTS_PER_ROW * rows),
            weights: Vec::with_capacity(STENCIL_WEIGHTS_PER_ROW * rows),
        }
    }

    /// Rebuild a buffer from the four streams of a routing exchange.
    fn from_streams(rows: Vec<usize>, sizes: &[usize], nodes: Vec<usize>, weights: Vec<T>) -> Self {
        debug_assert_eq!(rows.len(), sizes.len());
        let mut offsets = Vec::with_capacity(rows.len() + 1);
        let mut total = 0;
        offsets.push(0);
        for &size in sizes {
            total += size;
            offsets.push(total);
        }
        debug_assert_eq!(total, nodes.len());
        Self {
            rows,
            offsets,
            nodes,
            weights,
        }
    }

    fn push(&mut self, row: usize, nodes: &[usize], weights: &[T]) {
        self.rows.push(row);
        self.nodes.extend_from_slice(nodes);
        self.weights.extend_from_slice(weights);
        self.offsets.push(self.nodes.len());
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn entry(&self, i: usize) -> (usize, &[usize], &[T]) {
        let span = self.offsets[i]..self.offsets[i + 1];
        (self.rows[i], &self.nodes[span.clone()], &self.weights[span])
    }
}

/// Growable scratch collecting transfer rows prior to [`finalize`](Self::finalize).
///
/// Contributions keyed on any global output row may be added on any rank;
/// rows owned elsewhere are buffered and routed to their owners during the
/// collective finalization. Repeated contributions to the same row are
/// additive, and duplicate `(row, node)` pairs merge into a single weight.
pub struct TransferAssembler<T, C: Communicator> {
    input: Arc<RowPartition<C>>,
    output: Arc<RowPartition<C>>,
    owned: ContributionBuffer<T>,
    forwarded: ContributionBuffer<T>,
    policy: UnroutablePolicy,
}

impl<T, C> TransferAssembler<T, C>
where
    T: Real + CommElem,
    C: Communicator,
{
    /// Begin assembling a transfer operator mapping vectors over `input` to
    /// vectors over `output`.
    ///
    /// The partitions must share the block size and address the same process
    /// group; their node ranges are otherwise independent.
    pub fn new(input: Arc<RowPartition<C>>, output: Arc<RowPartition<C>>) -> eyre::Result<Self> {
        ensure!(
            input.block_size() == output.block_size(),
            "Input and output partitions have different block sizes ({} vs {}).",
            input.block_size(),
            output.block_size()
        );
        ensure!(
            input.comm().same_group(output.comm()),
            "Input and output partitions must live on the same process group."
        );

        let num_local = output.num_local_nodes();
        let owned = ContributionBuffer::with_row_capacity(num_local);
        let forwarded = ContributionBuffer::with_row_capacity(max(100, num_local / 10));
        Ok(Self {
            input,
            output,
            owned,
            forwarded,
            policy: UnroutablePolicy::default(),
        })
    }

    /// Choose how finalization treats contributions to rows owned by no rank.
    pub fn with_unroutable_policy(mut self, policy: UnroutablePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Add one row contribution: output row `row` reads the given global
    /// input `nodes` with the given raw `weights`.
    ///
    /// `row` need not be owned locally. `nodes` need not be sorted or unique.
    /// Weights are normalized per row at finalization, so only their relative
    /// magnitudes matter.
    ///
    /// # Panics
    ///
    /// Panics if `nodes` and `weights` have different lengths, or if a node
    /// lies outside the global range of the input partition.
    pub fn add_row(&mut self, row: usize, nodes: &[usize], weights: &[T]) {
        assert_eq!(nodes.len(), weights.len(), "One weight per input node is required.");
        for &node in nodes {
            assert!(
                node < self.input.global_nodes(),
                "Input node {node} lies outside the global input range."
            );
        }
        if self.output.local_range().contains(&row) {
            self.owned.push(row, nodes, weights);
        } else {
            self.forwarded.push(row, nodes, weights);
        }
    }

    /// Add several row contributions at once.
    pub fn add_rows<'a, I>(&mut self, rows: I)
    where
        T: 'a,
        I: IntoIterator<Item = (usize, &'a [usize], &'a [T])>,
    {
        for (row, nodes, weights) in rows {
            self.add_row(row, nodes, weights);
        }
    }

    pub fn input_partition(&self) -> &RowPartition<C> {
        &self.input
    }

    pub fn output_partition(&self) -> &RowPartition<C> {
        &self.output
    }

    /// Route all buffered off-rank contributions to their owning ranks and
    /// return them as a local buffer. Collective.
    fn route_forwarded(&self) -> eyre::Result<ContributionBuffer<T>> {
        let comm = self.output.comm();
        let size = comm.size();
        let rank = comm.rank();

        // Count rows and flat entries per destination rank.
        let mut dest_row_counts = vec![0usize; size];
        let mut dest_node_counts = vec![0usize; size];
        let mut unroutable = 0usize;
        for i in 0..self.forwarded.len() {
            let (row, nodes, _) = self.forwarded.entry(i);
            match self.output.owner_of(row) {
                Some(owner) => {
                    dest_row_counts[owner] += 1;
                    dest_node_counts[owner] += nodes.len();
                }
                None => unroutable += 1,
            }
        }
        if unroutable > 0 {
            match self.policy {
                UnroutablePolicy::Warn => warn!(
                    "[rank {rank}] dropping {unroutable} contributions to output rows outside the global range"
                ),
                UnroutablePolicy::Error => {
                    bail!("{unroutable} contributions address output rows outside the global range")
                }
            }
        }

        // Pack the four per-destination streams: row numbers, entries per
        // row, flat node indices and flat weights. The positions double as
        // accumulating insertion pointers.
        let total_rows: usize = dest_row_counts.iter().sum();
        let total_nodes: usize = dest_node_counts.iter().sum();
        let mut row_pos: Vec<usize> = exclusive_prefix(&dest_row_counts);
        let mut node_pos: Vec<usize> = exclusive_prefix(&dest_node_counts);
        let mut send_rows = vec![0usize; total_rows];
        let mut send_sizes = vec![0usize; total_rows];
        let mut send_nodes = vec![0usize; total_nodes];
        let mut send_weights = vec![T::zero(); total_nodes];
        for i in 0..self.forwarded.len() {
            let (row, nodes, weights) = self.forwarded.entry(i);
            let Some(owner) = self.output.owner_of(row) else { continue };
            send_rows[row_pos[owner]] = row;
            send_sizes[row_pos[owner]] = nodes.len();
            row_pos[owner] += 1;
            send_nodes[node_pos[owner]..node_pos[owner] + nodes.len()].copy_from_slice(nodes);
            send_weights[node_pos[owner]..node_pos[owner] + nodes.len()].copy_from_slice(weights);
            node_pos[owner] += nodes.len();
        }

        let recv_row_counts = comm.all_to_all(&dest_row_counts);
        let recv_node_counts = comm.all_to_all(&dest_node_counts);
        let in_rows = comm.all_to_allv(&send_rows, &dest_row_counts, &recv_row_counts);
        let in_sizes = comm.all_to_allv(&send_sizes, &dest_row_counts, &recv_row_counts);
        let in_nodes = comm.all_to_allv(&send_nodes, &dest_node_counts, &recv_node_counts);
        let in_weights = comm.all_to_allv(&send_weights, &dest_node_counts, &recv_node_counts);

        Ok(ContributionBuffer::from_streams(in_rows, &in_sizes, in_nodes, in_weights))
    }

    /// Finish assembly and build the operator. Collective: every rank of the
    /// group must call `finalize`, and all apply operations thereafter.
    ///
    /// Contributions are routed to the ranks owning their output rows, each
    /// row is split into a locally resolvable and a halo part, sorted,
    /// deduplicated (duplicate `(row, node)` weights add) and normalized so
    /// that every non-empty row sums to one. Rows whose raw weights sum to
    /// zero are kept as-is and produce zero output.
    pub fn finalize(self) -> eyre::Result<TransferOperator<T, C>> {
        let received = self.route_forwarded()?;
        let buffers = [&self.owned, &received];

        let block_size = self.output.block_size();
        let num_rows = self.output.num_local_nodes();
        let out_start = self.output.local_range().start;
        let in_range = self.input.local_range();

        // Count the local and halo entries of every owned output row.
        let mut row_offsets = vec![0usize; num_rows + 1];
        let mut halo_row_offsets = vec![0usize; num_rows + 1];
        for buffer in buffers {
            for i in 0..buffer.len() {
                let (row, nodes, _) = buffer.entry(i);
                debug_assert!(
                    self.output.local_range().contains(&row),
                    "Routing must deliver only locally owned rows"
                );
                let local_row = row - out_start;
                for &node in nodes {
                    if in_range.contains(&node) {
                        row_offsets[local_row + 1] += 1;
                    } else {
                        halo_row_offsets[local_row + 1] += 1;
                    }
                }
            }
        }
        accumulate_offsets(&mut row_offsets);
        accumulate_offsets(&mut halo_row_offsets);

        // Place the raw global node indices, advancing each row's offset per
        // insertion, then shift the offsets back into place.
        let mut cols = vec![0usize; row_offsets[num_rows]];
        let mut halo_cols = vec![0usize; halo_row_offsets[num_rows]];
        for buffer in buffers {
            for i in 0..buffer.len() {
                let (row, nodes, _) = buffer.entry(i);
                let local_row = row - out_start;
                for &node in nodes {
                    if in_range.contains(&node) {
                        cols[row_offsets[local_row]] = node;
                        row_offsets[local_row] += 1;
                    } else {
                        halo_cols[halo_row_offsets[local_row]] = node;
                        halo_row_offsets[local_row] += 1;
                    }
                }
            }
        }
        restore_offsets(&mut row_offsets);
        restore_offsets(&mut halo_row_offsets);

        sort_and_dedup_rows(&mut row_offsets, &mut cols);
        sort_and_dedup_rows(&mut halo_row_offsets, &mut halo_cols);

        // Scatter-add the raw weights into the deduplicated structure.
        let mut weights = vec![T::zero(); row_offsets[num_rows]];
        let mut halo_weights = vec![T::zero(); halo_row_offsets[num_rows]];
        for buffer in buffers {
            for i in 0..buffer.len() {
                let (row, nodes, row_weights) = buffer.entry(i);
                let local_row = row - out_start;
                for (&node, &weight) in izip!(nodes, row_weights) {
                    if in_range.contains(&node) {
                        let span = row_offsets[local_row]..row_offsets[local_row + 1];
                        match cols[span.clone()].binary_search(&node) {
                            Ok(pos) => weights[span.start + pos] += weight,
                            Err(_) => debug_assert!(false, "Node {node} missing from its deduplicated row"),
                        }
                    } else {
                        let span = halo_row_offsets[local_row]..halo_row_offsets[local_row + 1];
                        match halo_cols[span.clone()].binary_search(&node) {
                            Ok(pos) => halo_weights[span.start + pos] += weight,
                            Err(_) => debug_assert!(false, "Node {node} missing from its deduplicated row"),
                        }
                    }
                }
            }
        }

        // Compactify: halo columns become indices into the sorted-unique halo
        // node table, local columns shift to local input indexing.
        let mut halo_nodes = halo_cols.clone();
        halo_nodes.sort_unstable();
        halo_nodes.dedup();
        for col in &mut halo_cols {
            *col = halo_nodes
                .binary_search(col)
                .expect("Every halo column appears in the halo node table");
        }
        for col in &mut cols {
            *col -= in_range.start;
        }

        // Normalize every row by the sum of its local and halo weights.
        for i in 0..num_rows {
            let mut sum = T::zero();
            for j in row_offsets[i]..row_offsets[i + 1] {
                sum += weights[j];
            }
            for j in halo_row_offsets[i]..halo_row_offsets[i + 1] {
                sum += halo_weights[j];
            }
            if sum != T::zero() {
                for j in row_offsets[i]..row_offsets[i + 1] {
                    weights[j] /= sum;
                }
                for j in halo_row_offsets[i]..halo_row_offsets[i + 1] {
                    halo_weights[j] /= sum;
                }
            }
        }

        let halo_exchange = HaloExchange::new(&self.input, &halo_nodes);
        let halo_buffer = vec![T::zero(); block_size * halo_nodes.len()];
        let (forward_kernel, transpose_kernel) = select_kernels(block_size);

        Ok(TransferOperator {
            input: self.input,
            output: self.output,
            block_size,
            row_offsets,
            cols,
            weights,
            halo_row_offsets,
            halo_cols,
            halo_weights,
            halo_nodes,
            halo_buffer,
            halo_exchange,
            forward_kernel,
            transpose_kernel,
        })
    }
}

fn exclusive_prefix(counts: &[usize]) -> Vec<usize> {
    let mut prefix = Vec::with_capacity(counts.len());
    let mut sum = 0;
    for &count in counts {
        prefix.push(sum);
        sum += count;
    }
    prefix
}

/// A finalized block-sparse transfer operator `P` between two distributed
/// vector spaces.
///
/// The operator stores, per locally owned output row, a compressed-row
/// structure split in two: columns reading locally owned input nodes (in
/// local input indexing) and columns reading halo nodes (indices into the
/// sorted halo node table). Structure, weights and kernel choice are fixed;
/// the only mutable state is the halo scratch buffer, which is why the apply
/// operations take `&mut self`: one apply at a time per operator.
///
/// All apply operations are collective on the group of the underlying
/// partitions.
pub struct TransferOperator<T: CommElem, C: Communicator> {
    input: Arc<RowPartition<C>>,
    output: Arc<RowPartition<C>>,
    block_size: usize,
    row_offsets: Vec<usize>,
    cols: Vec<usize>,
    weights: Vec<T>,
    halo_row_offsets: Vec<usize>,
    halo_cols: Vec<usize>,
    halo_weights: Vec<T>,
    halo_nodes: Vec<usize>,
    halo_buffer: Vec<T>,
    halo_exchange: HaloExchange<T, C>,
    forward_kernel: BlockKernel<T>,
    transpose_kernel: BlockKernel<T>,
}

impl<T, C> TransferOperator<T, C>
where
    T: Real + CommElem,
    C: Communicator,
{
    /// Compute `output = P · input` (prolongation).
    pub fn prolongate(&mut self, input: &BlockVector<T>, output: &mut BlockVector<T>) {
        output.fill_zero();
        self.prolongate_add(input, output);
    }

    /// Compute `output += P · input`.
    ///
    /// This is also the aliasing-friendly form of "add then apply": to
    /// compute `output = add + P · input` with a separate `add` vector, copy
    /// `add` into `output` first or use
    /// [`prolongate_add_from`](Self::prolongate_add_from).
    pub fn prolongate_add(&mut self, input: &BlockVector<T>, output: &mut BlockVector<T>) {
        self.check_forward_shapes(input, output);
        let num_rows = self.num_local_rows();

        // The halo gather is posted before the purely local kernel runs and
        // completed after it; only the halo part waits for the gathered
        // values.
        self.halo_exchange.begin_forward(input.values());
        (self.forward_kernel)(
            self.block_size,
            num_rows,
            &self.row_offsets,
            &self.cols,
            &self.weights,
            input.values(),
            output.values_mut(),
        );
        self.halo_exchange.end_forward(&mut self.halo_buffer);
        (self.forward_kernel)(
            self.block_size,
            num_rows,
            &self.halo_row_offsets,
            &self.halo_cols,
            &self.halo_weights,
            &self.halo_buffer,
            output.values_mut(),
        );
    }

    /// Compute `output = add + P · input` with `add` and `output` distinct.
    pub fn prolongate_add_from(
        &mut self,
        input: &BlockVector<T>,
        add: &BlockVector<T>,
        output: &mut BlockVector<T>,
    ) {
        output.copy_from(add);
        self.prolongate_add(input, output);
    }

    /// Compute `output = Pᵀ · input` (restriction).
    pub fn restrict(&mut self, input: &BlockVector<T>, output: &mut BlockVector<T>) {
        output.fill_zero();
        self.restrict_add(input, output);
    }

    /// Compute `output += Pᵀ · input`.
    ///
    /// The halo contributions are accumulated into the scratch buffer before
    /// the reverse exchange is posted, because the exchange reads that
    /// buffer; the purely local kernel then runs while the posted exchange is
    /// in flight, and only `end_reverse` waits.
    pub fn restrict_add(&mut self, input: &BlockVector<T>, output: &mut BlockVector<T>) {
        self.check_transpose_shapes(input, output);
        let num_rows = self.num_local_rows();

        self.halo_buffer.fill(T::zero());
        (self.transpose_kernel)(
            self.block_size,
            num_rows,
            &self.halo_row_offsets,
            &self.halo_cols,
            &self.halo_weights,
            input.values(),
            &mut self.halo_buffer,
        );
        self.halo_exchange.begin_reverse(&self.halo_buffer);
        (self.transpose_kernel)(
            self.block_size,
            num_rows,
            &self.row_offsets,
            &self.cols,
            &self.weights,
            input.values(),
            output.values_mut(),
        );
        self.halo_exchange.end_reverse(output.values_mut());
    }

    /// Compute `output = add + Pᵀ · input` with `add` and `output` distinct.
    pub fn restrict_add_from(
        &mut self,
        input: &BlockVector<T>,
        add: &BlockVector<T>,
        output: &mut BlockVector<T>,
    ) {
        output.copy_from(add);
        self.restrict_add(input, output);
    }

    fn check_forward_shapes(&self, input: &BlockVector<T>, output: &BlockVector<T>) {
        assert_eq!(input.block_size(), self.block_size, "Input vector has the wrong block size.");
        assert_eq!(output.block_size(), self.block_size, "Output vector has the wrong block size.");
        assert_eq!(
            input.num_nodes(),
            self.input.num_local_nodes(),
            "Input vector does not match the input partition."
        );
        assert_eq!(
            output.num_nodes(),
            self.output.num_local_nodes(),
            "Output vector does not match the output partition."
        );
    }

    fn check_transpose_shapes(&self, input: &BlockVector<T>, output: &BlockVector<T>) {
        assert_eq!(input.block_size(), self.block_size, "Input vector has the wrong block size.");
        assert_eq!(output.block_size(), self.block_size, "Output vector has the wrong block size.");
        assert_eq!(
            input.num_nodes(),
            self.output.num_local_nodes(),
            "Transpose input lives on the output partition."
        );
        assert_eq!(
            output.num_nodes(),
            self.input.num_local_nodes(),
            "Transpose output lives on the input partition."
        );
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of locally owned output rows.
    pub fn num_local_rows(&self) -> usize {
        self.row_offsets.len() - 1
    }

    pub fn input_partition(&self) -> &RowPartition<C> {
        &self.input
    }

    pub fn output_partition(&self) -> &RowPartition<C> {
        &self.output
    }

    /// Offsets of the locally resolvable part, one span per local row.
    pub fn local_row_offsets(&self) -> &[usize] {
        &self.row_offsets
    }

    /// Columns of the locally resolvable part, in local input indexing.
    pub fn local_cols(&self) -> &[usize] {
        &self.cols
    }

    pub fn local_weights(&self) -> &[T] {
        &self.weights
    }

    /// Offsets of the halo part, one span per local row.
    pub fn halo_row_offsets(&self) -> &[usize] {
        &self.halo_row_offsets
    }

    /// Columns of the halo part; each is an index into
    /// [`halo_nodes`](Self::halo_nodes).
    pub fn halo_cols(&self) -> &[usize] {
        &self.halo_cols
    }

    pub fn halo_weights(&self) -> &[T] {
        &self.halo_weights
    }

    /// Sorted global input nodes read by this rank but owned elsewhere.
    pub fn halo_nodes(&self) -> &[usize] {
        &self.halo_nodes
    }
}

impl<T, C> TransferOperator<T, C>
where
    T: Real + CommElem + fmt::Display,
    C: Communicator,
{
    /// Write a human-readable dump of the locally resolvable weights.
    ///
    /// The format is advisory: a header line, then per local row a `Row: i`
    /// line followed by `(col,weight)` pairs with `|weight| > 1e-12`.
    pub fn write_weights(&self, path: impl AsRef<Path>) -> eyre::Result<()> {
        let tol: T = nalgebra::convert(1e-12);
        let mut file = BufWriter::new(File::create(path)?);
        writeln!(file, "Block transfer weights")?;
        for i in 0..self.num_local_rows() {
            writeln!(file, "Row: {i}")?;
            for j in self.row_offsets[i]..self.row_offsets[i + 1] {
                if self.weights[j].abs() > tol {
                    write!(file, "({},{}) ", self.cols[j], self.weights[j])?;
                }
            }
            writeln!(file)?;
        }
        Ok(())
    }
}
