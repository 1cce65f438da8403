use thiserror::Error;

/// Pivots smaller than this fraction of the largest diagonal entry are treated
/// as zero.
pub const DEFAULT_RELATIVE_TOLERANCE: f64 = 1e-12;

/// Errors raised while factorizing a matrix.
#[derive(Debug, Error, PartialEq)]
pub enum CholeskyError {
    /// The matrix has a pivot that is not (numerically) positive.
    #[error("matrix is not positive definite: pivot {index} is {pivot:e}")]
    NotPositiveDefinite {
        /// Index of the failing pivot.
        index: usize,
        /// Value of the pivot before the square root.
        pivot: f64,
    },

    /// The matrix contains NaN or infinite entries.
    #[error("matrix contains non-finite entries")]
    NonFinite,
}

/// Cholesky factor `L` of a symmetric positive definite `N x N` matrix, such
/// that `A = L * L^T`.
///
/// Only the lower triangle of the input matrix is read.
#[derive(Debug, Clone, PartialEq)]
pub struct Cholesky<const N: usize> {
    l: [[f64; N]; N],
}

impl<const N: usize> Cholesky<N> {
    /// Factorize `a` using [`DEFAULT_RELATIVE_TOLERANCE`].
    pub fn new(a: &[[f64; N]; N]) -> Result<Self, CholeskyError> {
        Self::with_tolerance(a, DEFAULT_RELATIVE_TOLERANCE)
    }

    /// Factorize `a`, rejecting pivots below `rel_tol * max(diag(a))`.
    pub fn with_tolerance(a: &[[f64; N]; N], rel_tol: f64) -> Result<Self, CholeskyError> {
        if a.iter().flatten().any(|v| !v.is_finite()) {
            return Err(CholeskyError::NonFinite);
        }

        let max_diag = (0..N).map(|i| a[i][i].abs()).fold(0.0, f64::max);
        let min_pivot = rel_tol * max_diag;

        let mut l = [[0.0; N]; N];
        for j in 0..N {
            let mut pivot = a[j][j];
            for k in 0..j {
                pivot -= l[j][k] * l[j][k];
            }
            if pivot <= min_pivot || pivot <= 0.0 {
                return Err(CholeskyError::NotPositiveDefinite { index: j, pivot });
            }
            let ljj = pivot.sqrt();
            l[j][j] = ljj;

            for i in (j + 1)..N {
                let mut sum = a[i][j];
                for k in 0..j {
                    sum -= l[i][k] * l[j][k];
                }
                l[i][j] = sum / ljj;
            }
        }

        Ok(Self { l })
    }

    /// The lower triangular factor.
    pub fn l(&self) -> &[[f64; N]; N] {
        &self.l
    }

    /// Solve `A x = b` by forward and backward substitution.
    pub fn solve(&self, b: &[f64; N]) -> [f64; N] {
        let l = &self.l;

        // L y = b
        let mut y = [0.0; N];
        for i in 0..N {
            let mut sum = b[i];
            for k in 0..i {
                sum -= l[i][k] * y[k];
            }
            y[i] = sum / l[i][i];
        }

        // L^T x = y
        let mut x = [0.0; N];
        for i in (0..N).rev() {
            let mut sum = y[i];
            for k in (i + 1)..N {
                sum -= l[k][i] * x[k];
            }
            x[i] = sum / l[i][i];
        }

        x
    }

    /// The inverse of `A`, one column at a time.
    pub fn inverse(&self) -> [[f64; N]; N] {
        let mut inv = [[0.0; N]; N];
        for j in 0..N {
            let mut e = [0.0; N];
            e[j] = 1.0;
            let col = self.solve(&e);
            for i in 0..N {
                inv[i][j] = col[i];
            }
        }
        inv
    }

    /// The determinant of `A`.
    pub fn determinant(&self) -> f64 {
        (0..N).map(|i| self.l[i][i] * self.l[i][i]).product()
    }
}

/// Solve `A x = b` for a symmetric positive definite `A`.
///
/// # Arguments
///
/// * `a` - The symmetric positive definite matrix.
/// * `b` - The right-hand side vector.
///
/// # Returns
///
/// The solution vector, or an error if `A` is not positive definite within
/// numerical tolerance.
pub fn solve_spd<const N: usize>(
    a: &[[f64; N]; N],
    b: &[f64; N],
) -> Result<[f64; N], CholeskyError> {
    Ok(Cholesky::new(a)?.solve(b))
}
