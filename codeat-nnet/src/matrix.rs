use crate::{CodeatError, Result};
use ndarray::{Array1, Array2, ArrayView2};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Reallocates `buf` only when its shape changes. Callers must overwrite every
/// element afterwards; nothing from a previous bunch is meant to survive.
pub fn ensure_shape(buf: &mut Array2<f32>, rows: usize, cols: usize) {
    if buf.dim() != (rows, cols) {
        *buf = Array2::zeros((rows, cols));
    }
}

pub fn copy_into(src: ArrayView2<f32>, dst: &mut Array2<f32>) {
    ensure_shape(dst, src.nrows(), src.ncols());
    dst.assign(&src);
}

pub fn check_shape(
    context: &'static str,
    actual: (usize, usize),
    expected: (usize, usize),
) -> Result<()> {
    if actual != expected {
        return Err(CodeatError::ShapeMismatch {
            context,
            expected: vec![expected.0, expected.1],
            actual: vec![actual.0, actual.1],
        });
    }
    Ok(())
}

pub fn to_rows(mat: &Array2<f32>) -> Vec<Vec<f32>> {
    mat.rows().into_iter().map(|r| r.to_vec()).collect()
}

pub fn from_rows(context: &'static str, rows: &[Vec<f32>]) -> Result<Array2<f32>> {
    let num_cols = rows.first().map_or(0, |r| r.len());
    let mut flat = Vec::with_capacity(rows.len() * num_cols);
    for row in rows {
        if row.len() != num_cols {
            return Err(CodeatError::ShapeMismatch {
                context,
                expected: vec![num_cols],
                actual: vec![row.len()],
            });
        }
        flat.extend_from_slice(row);
    }
    Array2::from_shape_vec((rows.len(), num_cols), flat).map_err(|e| {
        CodeatError::InvalidConfig(format!("{}: {}", context, e))
    })
}

/// Uniform initialisation in `[-range, range]`, reproducible from `seed`.
pub fn random_matrix(rows: usize, cols: usize, range: f32, seed: u64) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-range..=range))
}

pub fn random_vector(len: usize, range: f32, seed: u64) -> Array1<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array1::from_shape_fn(len, |_| rng.gen_range(-range..=range))
}
