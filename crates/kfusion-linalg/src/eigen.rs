const MAX_SWEEPS: usize = 32;
const EIGEN_EPSILON: f64 = 1e-15;

/// Eigenvalues of a symmetric `N x N` matrix, in ascending order.
///
/// Cyclic Jacobi rotations annihilate the off-diagonal entries until they
/// are negligible against the diagonal. Only the lower triangle of `a` is
/// read. Non-finite input yields non-finite eigenvalues.
///
/// # Arguments
///
/// * `a` - The symmetric matrix.
///
/// # Returns
///
/// The eigenvalues sorted from the smallest to the largest.
pub fn symmetric_eigenvalues<const N: usize>(a: &[[f64; N]; N]) -> [f64; N] {
    let mut m = [[0.0; N]; N];
    for i in 0..N {
        for j in 0..=i {
            m[i][j] = a[i][j];
            m[j][i] = a[i][j];
        }
    }

    for _ in 0..MAX_SWEEPS {
        let mut off = 0.0;
        let mut diag = 0.0;
        for i in 0..N {
            diag += m[i][i] * m[i][i];
            for j in 0..i {
                off += m[i][j] * m[i][j];
            }
        }
        if !(off > EIGEN_EPSILON * EIGEN_EPSILON * diag) {
            break;
        }

        for p in 0..N {
            for q in (p + 1)..N {
                let apq = m[p][q];
                if apq == 0.0 {
                    continue;
                }
                // rotation that zeroes m[p][q]
                let theta = (m[q][q] - m[p][p]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for row in m.iter_mut() {
                    let (akp, akq) = (row[p], row[q]);
                    row[p] = c * akp - s * akq;
                    row[q] = s * akp + c * akq;
                }
                for k in 0..N {
                    let (apk, aqk) = (m[p][k], m[q][k]);
                    m[p][k] = c * apk - s * aqk;
                    m[q][k] = s * apk + c * aqk;
                }
            }
        }
    }

    let mut eigenvalues: [f64; N] = std::array::from_fn(|i| m[i][i]);
    eigenvalues.sort_by(f64::total_cmp);
    eigenvalues
}
