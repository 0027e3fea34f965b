//! Block-specialized kernels for compressed-row transfer operators.
//!
//! The kernels compute `y += A x` (forward) and `y += Aᵀ x` (transpose) on a
//! compressed-row structure whose entries act on blocks of `block_size`
//! scalars per node. The specializations for common block sizes unroll the
//! inner block loop; all variants accumulate in the same order (row-major
//! over rows, column order within a row), so for a given structure every
//! variant produces bit-identical results and the choice is purely a
//! throughput optimization.
//!
//! `x` and `y` must not overlap. The transpose kernel scatters into
//! `y[block_size * cols[j] ..]`, so its output access is non-contiguous.
use crate::Real;

/// A forward or transpose apply kernel.
///
/// Arguments: `(block_size, num_rows, row_offsets, cols, weights, x, y)`.
pub type BlockKernel<T> = fn(usize, usize, &[usize], &[usize], &[T], &[T], &mut [T]);

/// Select the forward and transpose kernels for a block size.
///
/// The choice is made once per operator; the returned function pointers are
/// stored and used by every subsequent apply.
pub fn select_kernels<T: Real>(block_size: usize) -> (BlockKernel<T>, BlockKernel<T>) {
    match block_size {
        1 => (forward_b1, transpose_b1),
        2 => (forward_b2, transpose_b2),
        3 => (forward_b3, transpose_b3),
        5 => (forward_b5, transpose_b5),
        6 => (forward_b6, transpose_b6),
        _ => (forward_generic, transpose_generic),
    }
}

/// Forward apply for arbitrary block size.
pub fn forward_generic<T: Real>(
    block_size: usize,
    num_rows: usize,
    row_offsets: &[usize],
    cols: &[usize],
    weights: &[T],
    x: &[T],
    y: &mut [T],
) {
    for i in 0..num_rows {
        for j in row_offsets[i]..row_offsets[i + 1] {
            let w = weights[j];
            let c = cols[j];
            for k in 0..block_size {
                y[block_size * i + k] += w * x[block_size * c + k];
            }
        }
    }
}

/// Transpose apply for arbitrary block size.
pub fn transpose_generic<T: Real>(
    block_size: usize,
    num_rows: usize,
    row_offsets: &[usize],
    cols: &[usize],
    weights: &[T],
    x: &[T],
    y: &mut [T],
) {
    for i in 0..num_rows {
        for j in row_offsets[i]..row_offsets[i + 1] {
            let w = weights[j];
            let c = cols[j];
            for k in 0..block_size {
                y[block_size * c + k] += w * x[block_size * i + k];
            }
        }
    }
}

pub fn forward_b1<T: Real>(
    _block_size: usize,
    num_rows: usize,
    row_offsets: &[usize],
    cols: &[usize],
    weights: &[T],
    x: &[T],
    y: &mut [T],
) {
    for i in 0..num_rows {
        for j in row_offsets[i]..row_offsets[i + 1] {
            y[i] += weights[j] * x[cols[j]];
        }
    }
}

pub fn transpose_b1<T: Real>(
    _block_size: usize,
    num_rows: usize,
    row_offsets: &[usize],
    cols: &[usize],
    weights: &[T],
    x: &[T],
    y: &mut [T],
) {
    for i in 0..num_rows {
        for j in row_offsets[i]..row_offsets[i + 1] {
            y[cols[j]] += weights[j] * x[i];
        }
    }
}

pub fn forward_b2<T: Real>(
    _block_size: usize,
    num_rows: usize,
    row_offsets: &[usize],
    cols: &[usize],
    weights: &[T],
    x: &[T],
    y: &mut [T],
) {
    for i in 0..num_rows {
        for j in row_offsets[i]..row_offsets[i + 1] {
            let w = weights[j];
            let c = cols[j];
            y[2 * i] += w * x[2 * c];
            y[2 * i + 1] += w * x[2 * c + 1];
        }
    }
}

pub fn transpose_b2<T: Real>(
    _block_size: usize,
    num_rows: usize,
    row_offsets: &[usize],
    cols: &[usize],
    weights: &[T],
    x: &[T],
    y: &mut [T],
) {
    for i in 0..num_rows {
        for j in row_offsets[i]..row_offsets[i + 1] {
            let w = weights[j];
            let c = cols[j];
            y[2 * c] += w * x[2 * i];
            y[2 * c + 1] += w * x[2 * i + 1];
        }
    }
}

pub fn forward_b3<T: Real>(
    _block_size: usize,
    num_rows: usize,
    row_offsets: &[usize],
    cols: &[usize],
    weights: &[T],
    x: &[T],
    y: &mut [T],
) {
    for i in 0..num_rows {
        for j in row_offsets[i]..row_offsets[i + 1] {
            let w = weights[j];
            let c = cols[j];
            y[3 * i] += w * x[3 * c];
            y[3 * i + 1] += w * x[3 * c + 1];
            y[3 * i + 2] += w * x[3 * c + 2];
        }
    }
}

pub fn transpose_b3<T: Real>(
    _block_size: usize,
    num_rows: usize,
    row_offsets: &[usize],
    cols: &[usize],
    weights: &[T],
    x: &[T],
    y: &mut [T],
) {
    for i in 0..num_rows {
        for j in row_offsets[i]..row_offsets[i + 1] {
            let w = weights[j];
            let c = cols[j];
            y[3 * c] += w * x[3 * i];
            y[3 * c + 1] += w * x[3 * i + 1];
            y[3 * c + 2] += w * x[3 * i + 2];
        }
    }
}

pub fn forward_b5<T: Real>(
    _block_size: usize,
    num_rows: usize,
    row_offsets: &[usize],
    cols: &[usize],
    weights: &[T],
    x: &[T],
    y: &mut [T],
) {
    for i in 0..num_rows {
        for j in row_offsets[i]..row_offsets[i + 1] {
            let w = weights[j];
            let c = cols[j];
            y[5 * i] += w * x[5 * c];
            y[5 * i + 1] += w * x[5 * c + 1];
            y[5 * i + 2] += w * x[5 * c + 2];
            y[5 * i + 3] += w * x[5 * c + 3];
            y[5 * i + 4] += w * x[5 * c + 4];
        }
    }
}

pub fn transpose_b5<T: Real>(
    _block_size: usize,
    num_rows: usize,
    row_offsets: &[usize],
    cols: &[usize],
    weights: &[T],
    x: &[T],
    y: &mut [T],
) {
    for i in 0..num_rows {
        for j in row_offsets[i]..row_offsets[i + 1] {
            let w = weights[j];
            let c = cols[j];
            y[5 * c] += w * x[5 * i];
            y[5 * c + 1] += w * x[5 * i + 1];
            y[5 * c + 2] += w * x[5 * i + 2];
            y[5 * c + 3] += w * x[5 * i + 3];
            y[5 * c + 4] += w * x[5 * i + 4];
        }
    }
}

pub fn forward_b6<T: Real>(
    _block_size: usize,
    num_rows: usize,
    row_offsets: &[usize],
    cols: &[usize],
    weights: &[T],
    x: &[T],
    y: &mut [T],
) {
    for i in 0..num_rows {
        for j in row_offsets[i]..row_offsets[i + 1] {
            let w = weights[j];
            let c = cols[j];
            y[6 * i] += w * x[6 * c];
            y[6 * i + 1] += w * x[6 * c + 1];
            y[6 * i + 2] += w * x[6 * c + 2];
            y[6 * i + 3] += w * x[6 * c + 3];
            y[6 * i + 4] += w * x[6 * c + 4];
            y[6 * i + 5] += w * x[6 * c + 5];
        }
    }
}

pub fn transpose_b6<T: Real>(
    _block_size: usize,
    num_rows: usize,
    row_offsets: &[usize],
    cols: &[usize],
    weights: &[T],
    x: &[T],
    y: &mut [T],
) {
    for i in 0..num_rows {
        for j in row_offsets[i]..row_offsets[i + 1] {
            let w = weights[j];
            let c = cols[j];
            y[6 * c] += w * x[6 * i];
            y[6 * c + 1] += w * x[6 * i + 1];
            y[6 * c + 2] += w * x[6 * i + 2];
            y[6 * c + 3] += w * x[6 * i + 3];
            y[6 * c + 4] += w * x[6 * i + 4];
            y[6 * c + 5] += w * x[6 * i + 5];
        }
    }
}
