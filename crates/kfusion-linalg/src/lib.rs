#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Cholesky decomposition and solves for symmetric positive definite matrices.
pub mod cholesky;

/// Eigenvalues of small symmetric matrices.
pub mod eigen;

pub use cholesky::{solve_spd, Cholesky, CholeskyError};
pub use eigen::symmetric_eigenvalues;

/// A 6x6 matrix stored row major.
pub type Mat6 = [[f64; 6]; 6];

/// A 6-vector.
pub type Vec6 = [f64; 6];
