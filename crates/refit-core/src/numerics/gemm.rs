//! BLAS-style `dgemm` behind a trait so the operator and solver never depend
//! on a particular kernel.
//!
//! Computes `C <- alpha * op(A) * op(B) + beta * C` where `op(A)` is `m x k`,
//! `op(B)` is `k x n` and `C` is `m x n`. Leading dimensions follow BLAS
//! conventions for the chosen storage layout.

use faer::linalg::matmul::matmul;
use faer::{Accum, MatMut, MatRef, Par};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    RowMajor,
    ColMajor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transpose {
    No,
    Yes,
}

pub trait Gemm {
    fn name(&self) -> &'static str;

    #[allow(clippy::too_many_arguments)]
    fn dgemm(
        &self,
        layout: Layout,
        trans_a: Transpose,
        trans_b: Transpose,
        m: usize,
        n: usize,
        k: usize,
        alpha: f64,
        a: &[f64],
        lda: usize,
        b: &[f64],
        ldb: usize,
        beta: f64,
        c: &mut [f64],
        ldc: usize,
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GemmBackend {
    #[default]
    Faer,
    Reference,
}

impl GemmBackend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Faer => "faer",
            Self::Reference => "reference",
        }
    }

    pub fn instantiate(self) -> Box<dyn Gemm> {
        match self {
            Self::Faer => Box::new(FaerGemm),
            Self::Reference => Box::new(ReferenceGemm),
        }
    }
}

impl Display for GemmBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// Offset of element `(row, col)` of `op(X)` inside its backing slice.
#[inline]
fn operand_index(layout: Layout, trans: Transpose, ld: usize, row: usize, col: usize) -> usize {
    let row_contiguous = (layout == Layout::ColMajor) == (trans == Transpose::Yes);
    if row_contiguous {
        row * ld + col
    } else {
        col * ld + row
    }
}

#[inline]
fn output_index(layout: Layout, ldc: usize, row: usize, col: usize) -> usize {
    match layout {
        Layout::ColMajor => col * ldc + row,
        Layout::RowMajor => row * ldc + col,
    }
}

#[inline]
fn scale_and_accumulate(current: f64, beta: f64, update: f64) -> f64 {
    // beta == 0 overwrites, matching BLAS (stale NaNs in C are not propagated).
    if beta == 0.0 {
        update
    } else {
        beta * current + update
    }
}

/// Plain triple loop; used when no optimized kernel is wanted and as the
/// yardstick in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceGemm;

impl Gemm for ReferenceGemm {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn dgemm(
        &self,
        layout: Layout,
        trans_a: Transpose,
        trans_b: Transpose,
        m: usize,
        n: usize,
        k: usize,
        alpha: f64,
        a: &[f64],
        lda: usize,
        b: &[f64],
        ldb: usize,
        beta: f64,
        c: &mut [f64],
        ldc: usize,
    ) {
        for row in 0..m {
            for col in 0..n {
                let mut acc = 0.0;
                for inner in 0..k {
                    acc += a[operand_index(layout, trans_a, lda, row, inner)]
                        * b[operand_index(layout, trans_b, ldb, inner, col)];
                }
                let index = output_index(layout, ldc, row, col);
                c[index] = scale_and_accumulate(c[index], beta, alpha * acc);
            }
        }
    }
}

/// Views `op(X)` as a `rows x cols` faer matrix without copying.
fn operand_view(
    layout: Layout,
    trans: Transpose,
    data: &[f64],
    rows: usize,
    cols: usize,
    ld: usize,
) -> MatRef<'_, f64> {
    let (stored_rows, stored_cols) = match trans {
        Transpose::No => (rows, cols),
        Transpose::Yes => (cols, rows),
    };
    let stored = match layout {
        Layout::ColMajor => {
            MatRef::from_column_major_slice_with_stride(data, stored_rows, stored_cols, ld)
        }
        Layout::RowMajor => MatRef::from_row_major_slice_with_stride(data, stored_rows, stored_cols, ld),
    };
    match trans {
        Transpose::No => stored,
        Transpose::Yes => stored.transpose(),
    }
}

/// Runs faer's blocked kernel on strided views of the caller's buffers and
/// accumulates straight into `C`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaerGemm;

impl Gemm for FaerGemm {
    fn name(&self) -> &'static str {
        "faer"
    }

    fn dgemm(
        &self,
        layout: Layout,
        trans_a: Transpose,
        trans_b: Transpose,
        m: usize,
        n: usize,
        k: usize,
        alpha: f64,
        a: &[f64],
        lda: usize,
        b: &[f64],
        ldb: usize,
        beta: f64,
        c: &mut [f64],
        ldc: usize,
    ) {
        if m == 0 || n == 0 {
            return;
        }

        // beta == 0 overwrites, matching BLAS (stale NaNs in C are not propagated).
        let accum = if beta == 0.0 {
            Accum::Replace
        } else {
            if beta != 1.0 {
                for col in 0..n {
                    for row in 0..m {
                        c[output_index(layout, ldc, row, col)] *= beta;
                    }
                }
            }
            Accum::Add
        };

        let lhs = operand_view(layout, trans_a, a, m, k, lda);
        let rhs = operand_view(layout, trans_b, b, k, n, ldb);
        let dst = match layout {
            Layout::ColMajor => MatMut::from_column_major_slice_with_stride_mut(c, m, n, ldc),
            Layout::RowMajor => MatMut::from_row_major_slice_with_stride_mut(c, m, n, ldc),
        };
        matmul(dst, accum, lhs, rhs, alpha, Par::Seq);
    }
}
