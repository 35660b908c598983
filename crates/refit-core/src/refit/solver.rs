//! Block BiCGSTAB over all solution columns at once.
//!
//! The right-hand side is implicit: each column carries a single 1 on its own
//! constraint row. The small `S x S` products go through the same [`Gemm`] as
//! the operator.

use super::operator::LinearOperator;
use crate::common::constants::{DEFAULT_RESIDUAL_THRESHOLD, MAX_SOLVER_ITERATIONS, SOLVER_ATTEMPTS};
use crate::numerics::{Gemm, Layout, Transpose, invert_column_major};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    /// Bound on the 2-norm of every residual column.
    pub threshold: f64,
    pub max_iterations: usize,
    pub attempts: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self::with_threshold(DEFAULT_RESIDUAL_THRESHOLD)
    }
}

impl SolverSettings {
    pub const fn with_threshold(threshold: f64) -> Self {
        Self {
            threshold,
            max_iterations: MAX_SOLVER_ITERATIONS,
            attempts: SOLVER_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SolveReport {
    pub converged: bool,
    /// Iterations over all attempts.
    pub iterations: usize,
    /// Iterations during which some wire column was still above threshold.
    pub wire_iterations: usize,
    /// Iterations during which the light column was still above threshold.
    pub light_iterations: usize,
    pub attempts: usize,
    pub breakdowns: usize,
    /// Largest squared column residual of the returned solution.
    pub worst_residual_sq: f64,
}

enum AttemptEnd {
    Converged,
    Exhausted,
    Breakdown,
}

/// Lowest-residual iterate seen so far.
struct BestIterate {
    solution: Vec<f64>,
    worst_residual_sq: f64,
}

impl BestIterate {
    fn offer(&mut self, solution: &[f64], worst_residual_sq: f64) {
        if worst_residual_sq < self.worst_residual_sq {
            self.solution.copy_from_slice(solution);
            self.worst_residual_sq = worst_residual_sq;
        }
    }
}

/// Which shadow residual an attempt projects against.
#[derive(Clone, Copy)]
enum Shadow {
    /// The starting residual itself.
    Residual,
    /// The operator applied to the starting residual. On a saddle system
    /// `R^T A R` can vanish while `(A R)^T A R` cannot.
    OperatorResidual,
}

/// Improves `solution` in place until every residual column is below the
/// threshold or all attempts are spent. Every attempt restarts from the best
/// iterate so far, and that iterate is what a failed solve leaves behind.
pub fn solve_block_bicgstab(
    operator: &dyn LinearOperator,
    solution: &mut [f64],
    settings: SolverSettings,
    gemm: &dyn Gemm,
) -> SolveReport {
    let mut report = SolveReport::default();
    let threshold_sq = settings.threshold * settings.threshold;
    let mut best = BestIterate {
        solution: solution.to_vec(),
        worst_residual_sq: f64::INFINITY,
    };

    for attempt in 1..=settings.attempts.max(1) {
        report.attempts = attempt;
        let shadow = if attempt == 1 {
            Shadow::Residual
        } else {
            Shadow::OperatorResidual
        };
        let end = run_attempt(
            operator,
            solution,
            shadow,
            settings,
            threshold_sq,
            gemm,
            &mut report,
            &mut best,
        );
        match end {
            AttemptEnd::Converged => {
                report.converged = true;
                debug!(
                    iterations = report.iterations,
                    attempts = attempt,
                    worst_residual_sq = report.worst_residual_sq,
                    "block BiCGSTAB converged"
                );
                return report;
            }
            AttemptEnd::Exhausted => {
                warn!(
                    attempt,
                    max_iterations = settings.max_iterations,
                    worst_residual_sq = report.worst_residual_sq,
                    "block BiCGSTAB attempt ran out of iterations"
                );
            }
            AttemptEnd::Breakdown => {
                report.breakdowns += 1;
            }
        }
        solution.copy_from_slice(&best.solution);
    }
    report.worst_residual_sq = best.worst_residual_sq;
    report
}

#[allow(clippy::too_many_arguments)]
fn run_attempt(
    operator: &dyn LinearOperator,
    x: &mut [f64],
    shadow_kind: Shadow,
    settings: SolverSettings,
    threshold_sq: f64,
    gemm: &dyn Gemm,
    report: &mut SolveReport,
    best: &mut BestIterate,
) -> AttemptEnd {
    let layout = operator.layout();
    let rows = layout.column_len();
    let columns = layout.solution_count();

    let mut r = operator.apply(x);
    for column in 0..columns {
        r[layout.column_start(column) + layout.constraint_row(column)] -= 1.0;
    }
    r.iter_mut().for_each(|value| *value = -*value);

    report.worst_residual_sq = worst(&column_norms_sq(&r, rows));
    best.offer(x, report.worst_residual_sq);
    if report.worst_residual_sq < threshold_sq {
        return AttemptEnd::Converged;
    }

    let shadow = match shadow_kind {
        Shadow::Residual => r.clone(),
        Shadow::OperatorResidual => operator.apply(&r),
    };
    let mut p = r.clone();
    let mut t = vec![0.0; r.len()];
    let mut v = vec![0.0; r.len()];
    let mut m1 = vec![0.0; columns * columns];
    let mut m2 = vec![0.0; columns * columns];
    let mut coefficients = vec![0.0; columns * columns];

    for _ in 0..settings.max_iterations {
        operator.apply_into(&p, &mut v);

        project(gemm, &shadow, &v, 1.0, &mut m1, rows, columns);
        if let Err(error) = invert_column_major(&mut m1, columns) {
            warn!(%error, "block BiCGSTAB breakdown: shadow projection is singular");
            return AttemptEnd::Breakdown;
        }

        // alpha = M1^-1 * (R0^T R)
        project(gemm, &shadow, &r, 1.0, &mut m2, rows, columns);
        small_product(gemm, &m1, &m2, &mut coefficients, columns);
        update(gemm, &v, &coefficients, -1.0, &mut r, rows, columns);

        operator.apply_into(&r, &mut t);
        let tt = dot(&t, &t);
        let omega = dot(&t, &r) / tt;
        if tt == 0.0 || omega == 0.0 || !omega.is_finite() {
            // No stabilization step left. X only moves if R already converged.
            let norms = column_norms_sq(&r, rows);
            if worst(&norms) < threshold_sq {
                update(gemm, &p, &coefficients, 1.0, x, rows, columns);
                record_iteration(report, &norms, threshold_sq);
                report.worst_residual_sq = worst(&norms);
                return AttemptEnd::Converged;
            }
            warn!(tt, omega, "block BiCGSTAB breakdown: stabilization step vanished");
            return AttemptEnd::Breakdown;
        }

        update(gemm, &p, &coefficients, 1.0, x, rows, columns);
        axpy(omega, &r, x);
        axpy(-omega, &t, &mut r);

        let norms = column_norms_sq(&r, rows);
        record_iteration(report, &norms, threshold_sq);
        report.worst_residual_sq = worst(&norms);
        best.offer(x, report.worst_residual_sq);
        if report.worst_residual_sq < threshold_sq {
            return AttemptEnd::Converged;
        }

        // beta = M1^-1 * (-R0^T T)
        project(gemm, &shadow, &t, -1.0, &mut m2, rows, columns);
        small_product(gemm, &m1, &m2, &mut coefficients, columns);

        // P = R + (P - omega V) beta
        axpy(-omega, &v, &mut p);
        v.copy_from_slice(&r);
        update(gemm, &p, &coefficients, 1.0, &mut v, rows, columns);
        std::mem::swap(&mut p, &mut v);
    }
    AttemptEnd::Exhausted
}

fn record_iteration(report: &mut SolveReport, norms: &[f64], threshold_sq: f64) {
    report.iterations += 1;
    let (light, wires) = norms.split_last().map_or((0.0, &[][..]), |(&l, w)| (l, w));
    if worst(wires) > threshold_sq {
        report.wire_iterations += 1;
    }
    if light > threshold_sq {
        report.light_iterations += 1;
    }
}

/// `out = alpha * lhs^T * rhs` for two `rows x columns` bundles.
fn project(
    gemm: &dyn Gemm,
    lhs: &[f64],
    rhs: &[f64],
    alpha: f64,
    out: &mut [f64],
    rows: usize,
    columns: usize,
) {
    gemm.dgemm(
        Layout::ColMajor,
        Transpose::Yes,
        Transpose::No,
        columns,
        columns,
        rows,
        alpha,
        lhs,
        rows,
        rhs,
        rows,
        0.0,
        out,
        columns,
    );
}

fn small_product(gemm: &dyn Gemm, lhs: &[f64], rhs: &[f64], out: &mut [f64], columns: usize) {
    gemm.dgemm(
        Layout::ColMajor,
        Transpose::No,
        Transpose::No,
        columns,
        columns,
        columns,
        1.0,
        lhs,
        columns,
        rhs,
        columns,
        0.0,
        out,
        columns,
    );
}

/// `target += alpha * bundle * coefficients`.
fn update(
    gemm: &dyn Gemm,
    bundle: &[f64],
    coefficients: &[f64],
    alpha: f64,
    target: &mut [f64],
    rows: usize,
    columns: usize,
) {
    gemm.dgemm(
        Layout::ColMajor,
        Transpose::No,
        Transpose::No,
        rows,
        columns,
        columns,
        alpha,
        bundle,
        rows,
        coefficients,
        columns,
        1.0,
        target,
        rows,
    );
}

fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    for (target, value) in y.iter_mut().zip(x) {
        *target += alpha * value;
    }
}

fn dot(lhs: &[f64], rhs: &[f64]) -> f64 {
    lhs.iter().zip(rhs).map(|(a, b)| a * b).sum()
}

fn column_norms_sq(bundle: &[f64], rows: usize) -> Vec<f64> {
    bundle
        .chunks_exact(rows)
        .map(|column| dot(column, column))
        .collect()
}

fn worst(norms: &[f64]) -> f64 {
    norms.iter().copied().fold(0.0, f64::max)
}
