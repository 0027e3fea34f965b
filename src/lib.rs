//! Distributed block-sparse grid transfer operators.
//!
//! This crate provides the transfer (interpolation) operator used between the
//! levels of a distributed multigrid hierarchy: a rectangular linear map `P`
//! from one distributed block vector space to another, applied as
//! prolongation (`y = P x`), restriction (`y = Pᵀ x`) or their accumulating
//! variants. Each output row is a sparse weighted combination of input nodes,
//! and the same scalar weights apply to every component of a node's block.
//!
//! The operator is assembled from per-row contributions that may originate on
//! any rank; [`TransferAssembler::finalize`](crate::transfer::TransferAssembler::finalize)
//! routes contributions to the ranks that own their output rows, merges
//! duplicates, normalizes row weights and splits every row into a part that
//! reads locally owned input and a part that reads halo (remotely owned)
//! input. Applying the finalized operator overlaps the halo exchange with the
//! purely local kernel.
pub mod comm;
pub mod csr;
pub mod kernels;
pub mod partition;
pub mod scatter;
pub mod transfer;
pub mod vector;

pub use crate::partition::RowPartition;
pub use crate::transfer::{TransferAssembler, TransferOperator, UnroutablePolicy};
pub use crate::vector::BlockVector;

pub extern crate nalgebra;

use nalgebra::RealField;

/// Scalar type used throughout the crate.
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}
