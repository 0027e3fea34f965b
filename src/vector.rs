//! Distributed block vectors.
use crate::comm::Communicator;
use crate::partition::RowPartition;
use crate::Real;
use serde::{Deserialize, Serialize};

/// The local slice of a distributed vector with `block_size` scalars per node.
///
/// Only the locally owned scalars are stored; node `i` of the local range
/// occupies `values[block_size * i .. block_size * (i + 1)]`. Remote values
/// enter apply operations exclusively through the halo exchange of the
/// transfer operator, so the vector itself has no communication methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockVector<T> {
    block_size: usize,
    values: Vec<T>,
}

impl<T: Real> BlockVector<T> {
    /// A zero vector over the local range of the given partition.
    pub fn zeros<C: Communicator>(partition: &RowPartition<C>) -> Self {
        Self {
            block_size: partition.block_size(),
            values: vec![T::zero(); partition.local_scalar_len()],
        }
    }

    /// Wrap existing local values.
    ///
    /// # Panics
    ///
    /// Panics if the number of values is not a multiple of the block size.
    pub fn from_values(block_size: usize, values: Vec<T>) -> Self {
        assert!(block_size >= 1, "Block size must be at least 1.");
        assert_eq!(
            values.len() % block_size,
            0,
            "Local length must be a multiple of the block size."
        );
        Self { block_size, values }
    }

    pub fn fill_zero(&mut self) {
        self.values.fill(T::zero());
    }

    /// Copy the values of `src` into `self`.
    ///
    /// # Panics
    ///
    /// Panics if `src` has a different shape.
    pub fn copy_from(&mut self, src: &Self) {
        assert_eq!(self.block_size, src.block_size, "Block sizes must match.");
        assert_eq!(self.values.len(), src.values.len(), "Local lengths must match.");
        self.values.copy_from_slice(&src.values);
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of locally owned nodes.
    pub fn num_nodes(&self) -> usize {
        self.values.len() / self.block_size
    }

    /// Number of locally owned scalars.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    /// The scalar block of a local node.
    pub fn block(&self, node: usize) -> &[T] {
        &self.values[self.block_size * node..self.block_size * (node + 1)]
    }
}
