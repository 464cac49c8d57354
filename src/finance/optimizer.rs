//! Minimum-variance weight solvers.

use crate::error::{BacktestError, Result};
use ndarray::{Array1, Array2};
use std::collections::BTreeMap;

/// Ticker name of the synthetic all-cash position the trading loop
/// falls back to when nothing is flagged for buying.
pub const CASH_TICKER: &str = "CASH";

/// Pivots smaller than this are treated as singular.
const PIVOT_EPS: f64 = 1e-12;

/// Computes portfolio weights minimizing variance for a given return
/// covariance matrix. Implementations fail with a numerical error on
/// singular or ill-conditioned input; callers propagate that unmasked.
pub trait MinVarianceSolver {
    /// Solve for the ticker -> weight mapping. `tickers` names the rows
    /// and columns of `covariance`, in order.
    fn min_var_weights(
        &self,
        covariance: &Array2<f64>,
        tickers: &[String],
    ) -> Result<BTreeMap<String, f64>>;
}

/// Closed-form unconstrained minimum-variance solver.
///
/// The minimizer of `w' C w` subject to the weights summing to one is
/// `C^-1 1` rescaled; this solves `C x = 1` by Gaussian elimination
/// with partial pivoting and normalizes `x`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosedFormMinVariance;

impl MinVarianceSolver for ClosedFormMinVariance {
    fn min_var_weights(
        &self,
        covariance: &Array2<f64>,
        tickers: &[String],
    ) -> Result<BTreeMap<String, f64>> {
        let n = tickers.len();
        if covariance.nrows() != n || covariance.ncols() != n {
            return Err(BacktestError::precondition(format!(
                "covariance is {}x{} but {} tickers were given",
                covariance.nrows(),
                covariance.ncols(),
                n
            )));
        }
        if n == 0 {
            return Err(BacktestError::precondition(
                "cannot optimize an empty ticker set".to_string(),
            ));
        }

        let solution = solve(covariance.clone(), Array1::ones(n))?;

        let total: f64 = solution.sum();
        if total.abs() < PIVOT_EPS || !total.is_finite() {
            return Err(BacktestError::numerical(
                "minimum-variance weights do not normalize (degenerate covariance)".to_string(),
            ));
        }

        Ok(tickers
            .iter()
            .zip(solution.iter())
            .map(|(ticker, x)| (ticker.clone(), x / total))
            .collect())
    }
}

/// Solve `a x = b` by Gaussian elimination with partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>> {
    let n = b.len();

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&p, &q| {
                a[[p, col]]
                    .abs()
                    .partial_cmp(&a[[q, col]].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);

        let pivot = a[[pivot_row, col]];
        if !pivot.is_finite() || pivot.abs() < PIVOT_EPS {
            return Err(BacktestError::numerical(
                "singular or ill-conditioned covariance matrix".to_string(),
            ));
        }

        if pivot_row != col {
            for j in 0..n {
                let tmp = a[[col, j]];
                a[[col, j]] = a[[pivot_row, j]];
                a[[pivot_row, j]] = tmp;
            }
            b.swap(col, pivot_row);
        }

        for row in col + 1..n {
            let factor = a[[row, col]] / pivot;
            if factor == 0.0 {
                continue;
            }
            for j in col..n {
                a[[row, j]] -= factor * a[[col, j]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::zeros(n);
    for row in (0..n).rev() {
        let mut sum = b[row];
        for col in row + 1..n {
            sum -= a[[row, col]] * x[col];
        }
        x[row] = sum / a[[row, row]];
    }

    Ok(x)
}
