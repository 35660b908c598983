//! Inverse of the small S x S matrices the block solver forms once per step.

use faer::Mat;

/// Pivots at or below this fraction of the infinity norm count as zero, so
/// the tiny products near convergence are not mistaken for singular ones.
const RELATIVE_PIVOT_FLOOR: f64 = 1.0e-15;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InversionError {
    #[error("cannot invert an empty matrix")]
    Empty,
    #[error("expected {expected} entries for a {dimension}x{dimension} matrix, got {actual}")]
    ShapeMismatch {
        dimension: usize,
        expected: usize,
        actual: usize,
    },
    #[error("matrix contains non-finite entries")]
    NonFinite,
    #[error("matrix is singular at pivot {pivot}")]
    Singular { pivot: usize },
}

/// Inverts the `dimension x dimension` column-major matrix in `values` in
/// place by Gauss-Jordan elimination with partial pivoting. `values` is left
/// untouched on error.
pub fn invert_column_major(values: &mut [f64], dimension: usize) -> Result<(), InversionError> {
    if dimension == 0 {
        return Err(InversionError::Empty);
    }
    if values.len() != dimension * dimension {
        return Err(InversionError::ShapeMismatch {
            dimension,
            expected: dimension * dimension,
            actual: values.len(),
        });
    }

    let mut work = Mat::from_fn(dimension, dimension, |row, col| values[col * dimension + row]);
    let norm = infinity_norm(&work);
    if !norm.is_finite() {
        return Err(InversionError::NonFinite);
    }
    let floor = norm * RELATIVE_PIVOT_FLOOR;
    let mut inverse = Mat::from_fn(dimension, dimension, |row, col| {
        if row == col { 1.0 } else { 0.0 }
    });

    for pivot in 0..dimension {
        let best = (pivot..dimension)
            .max_by(|&a, &b| work[(a, pivot)].abs().total_cmp(&work[(b, pivot)].abs()))
            .unwrap_or(pivot);
        let magnitude = work[(best, pivot)].abs();
        if magnitude == 0.0 || magnitude <= floor {
            return Err(InversionError::Singular { pivot });
        }
        if best != pivot {
            swap_rows(&mut work, pivot, best);
            swap_rows(&mut inverse, pivot, best);
        }

        let scale = 1.0 / work[(pivot, pivot)];
        for col in 0..dimension {
            work[(pivot, col)] *= scale;
            inverse[(pivot, col)] *= scale;
        }
        for row in (0..dimension).filter(|&row| row != pivot) {
            let factor = work[(row, pivot)];
            if factor == 0.0 {
                continue;
            }
            for col in 0..dimension {
                let (pivot_work, pivot_inverse) = (work[(pivot, col)], inverse[(pivot, col)]);
                work[(row, col)] -= factor * pivot_work;
                inverse[(row, col)] -= factor * pivot_inverse;
            }
        }
    }

    for col in 0..dimension {
        for row in 0..dimension {
            values[col * dimension + row] = inverse[(row, col)];
        }
    }
    Ok(())
}

fn swap_rows(matrix: &mut Mat<f64>, first: usize, second: usize) {
    for col in 0..matrix.ncols() {
        let held = matrix[(first, col)];
        matrix[(first, col)] = matrix[(second, col)];
        matrix[(second, col)] = held;
    }
}

/// Largest absolute row sum; NaN if any entry is NaN.
fn infinity_norm(matrix: &Mat<f64>) -> f64 {
    let mut norm: f64 = 0.0;
    for row in 0..matrix.nrows() {
        let sum: f64 = (0..matrix.ncols()).map(|col| matrix[(row, col)].abs()).sum();
        if sum.is_nan() {
            return f64::NAN;
        }
        norm = norm.max(sum);
    }
    norm
}

#[cfg(test)]
mod tests {
    use super::{InversionError, invert_column_major};

    fn assert_close(actual: &[f64], expected: &[f64], tolerance: f64) {
        for (actual, expected) in actual.iter().zip(expected) {
            assert!(
                (actual - expected).abs() <= tolerance,
                "{actual} vs {expected}"
            );
        }
    }

    #[test]
    fn two_by_two_inverse_is_written_back_column_major() {
        // [[4, 7], [2, 6]] has inverse [[0.6, -0.7], [-0.2, 0.4]].
        let mut values = [4.0, 2.0, 7.0, 6.0];
        invert_column_major(&mut values, 2).expect("inverse");
        assert_close(&values, &[0.6, -0.2, -0.7, 0.4], 1.0e-12);
    }

    #[test]
    fn zero_leading_entry_needs_a_row_swap() {
        // [[0, 2, 1], [1, -2, -3], [2, 3, 1]]
        let original = [0.0, 1.0, 2.0, 2.0, -2.0, 3.0, 1.0, -3.0, 1.0];
        let mut inverse = original;
        invert_column_major(&mut inverse, 3).expect("inverse");
        for row in 0..3 {
            for col in 0..3 {
                let product: f64 = (0..3)
                    .map(|inner| original[inner * 3 + row] * inverse[col * 3 + inner])
                    .sum();
                let expected = if row == col { 1.0 } else { 0.0 };
                assert!((product - expected).abs() < 1.0e-12, "({row},{col}) = {product}");
            }
        }
    }

    #[test]
    fn singularity_is_judged_relative_to_scale() {
        let mut tiny = [3.0e-22, 1.0e-22, 1.0e-22, 2.0e-22];
        invert_column_major(&mut tiny, 2).expect("well-conditioned tiny matrix");
        assert_close(&tiny, &[0.4e22, -0.2e22, -0.2e22, 0.6e22], 1.0e9);

        let mut singular = [1.0, 2.0, 2.0, 4.0];
        assert_eq!(
            invert_column_major(&mut singular, 2),
            Err(InversionError::Singular { pivot: 1 })
        );
        assert_eq!(singular, [1.0, 2.0, 2.0, 4.0]);
    }

    #[test]
    fn malformed_input_is_rejected() {
        let mut short = [1.0, 2.0, 3.0];
        assert_eq!(
            invert_column_major(&mut short, 2),
            Err(InversionError::ShapeMismatch {
                dimension: 2,
                expected: 4,
                actual: 3
            })
        );
        assert_eq!(
            invert_column_major(&mut [], 0),
            Err(InversionError::Empty)
        );
        let mut nan = [f64::NAN, 0.0, 0.0, 1.0];
        assert_eq!(
            invert_column_major(&mut nan, 2),
            Err(InversionError::NonFinite)
        );
    }
}
