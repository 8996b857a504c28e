use anyhow::bail;

use crate::errors::CoalescentError;
use crate::Result;

pub(crate) const MAX_QL_ITERATIONS: usize = 30;

/// Eigenvalues of the symmetric tridiagonal matrix with diagonal `diag` and
/// sub-diagonal `off_diag` by implicit QL iterations with Wilkinson shifts.
///
/// Returned unsorted. Runs in O(n^2) time without forming eigenvectors.
pub(crate) fn tridiagonal_eigenvalues(diag: &[f64], off_diag: &[f64]) -> Result<Vec<f64>> {
    let n = diag.len();
    debug_assert_eq!(off_diag.len(), n.saturating_sub(1));
    let mut d = diag.to_vec();
    // e[i] couples i and i+1, the extra slot keeps the sweep branch free
    let mut e = off_diag.to_vec();
    e.push(0.0);

    for l in 0..n {
        let mut iterations = 0;
        loop {
            let mut m = l;
            while m + 1 < n {
                let dd = d[m].abs() + d[m + 1].abs();
                if e[m].abs() <= f64::EPSILON * dd {
                    break;
                }
                m += 1;
            }
            if m == l {
                break;
            }
            iterations += 1;
            if iterations > MAX_QL_ITERATIONS {
                bail!(CoalescentError::NotConverged { iterations });
            }

            let mut g = (d[l + 1] - d[l]) / (2.0 * e[l]);
            let mut r = g.hypot(1.0);
            let signed_r = if g >= 0.0 { r.abs() } else { -r.abs() };
            g = d[m] - d[l] + e[l] / (g + signed_r);
            let (mut s, mut c, mut p) = (1.0, 1.0, 0.0);
            let mut underflow = false;
            let mut i = m;
            while i > l {
                i -= 1;
                let f = s * e[i];
                let b = c * e[i];
                r = f.hypot(g);
                e[i + 1] = r;
                if r == 0.0 {
                    d[i + 1] -= p;
                    e[m] = 0.0;
                    underflow = true;
                    break;
                }
                s = f / r;
                c = g / r;
                g = d[i + 1] - p;
                r = (d[i] - g) * s + 2.0 * c * b;
                p = s * r;
                d[i + 1] = g + p;
                g = c * r - b;
            }
            if underflow {
                continue;
            }
            d[l] -= p;
            e[l] = g;
            e[m] = 0.0;
        }
    }

    if d.iter().any(|v| !v.is_finite()) {
        bail!(CoalescentError::Numerical(
            "Tridiagonal eigenvalues are not finite".to_string()
        ));
    }
    Ok(d)
}
