use ndarray::{Array2, ArrayView2};

/// Exact Euclidean distance transform.
///
/// Every non-zero pixel receives its distance to the nearest zero pixel; zero
/// pixels map to 0. Pixels with no zero pixel anywhere in the image are
/// `f32::INFINITY`, so callers pad with a zero border first.
pub fn distance_transform(mask: ArrayView2<'_, u8>) -> Array2<f32> {
    let (h, w) = mask.dim();
    let mut sq = Array2::<f64>::from_elem((h, w), f64::INFINITY);
    if h == 0 || w == 0 {
        return Array2::zeros((h, w));
    }

    let n = h.max(w);
    let mut f = vec![0.0f64; n];
    let mut d = vec![0.0f64; n];
    let mut v = vec![0usize; n];
    let mut z = vec![0.0f64; n + 1];

    // Columns first.
    for c in 0..w {
        for r in 0..h {
            f[r] = if mask[[r, c]] == 0 { 0.0 } else { f64::INFINITY };
        }
        lower_envelope(&f[..h], &mut d[..h], &mut v, &mut z);
        for r in 0..h {
            sq[[r, c]] = d[r];
        }
    }

    // Then rows over the column result.
    for r in 0..h {
        for c in 0..w {
            f[c] = sq[[r, c]];
        }
        lower_envelope(&f[..w], &mut d[..w], &mut v, &mut z);
        for c in 0..w {
            sq[[r, c]] = d[c];
        }
    }

    sq.mapv(|x| if x.is_finite() { x.sqrt() as f32 } else { f32::INFINITY })
}

/// 1-D squared distance transform of a sampled function (Felzenszwalb & Huttenlocher).
/// Infinite samples contribute no parabola.
fn lower_envelope(f: &[f64], d: &mut [f64], v: &mut [usize], z: &mut [f64]) {
    let n = f.len();
    let mut k = 0usize;
    let mut any = false;

    for q in 0..n {
        if !f[q].is_finite() {
            continue;
        }
        if !any {
            any = true;
            v[0] = q;
            z[0] = f64::NEG_INFINITY;
            z[1] = f64::INFINITY;
            continue;
        }
        let mut s = intersection(f, q, v[k]);
        while s <= z[k] {
            // z[0] is -inf, so this stops at k == 0.
            k -= 1;
            s = intersection(f, q, v[k]);
        }
        k += 1;
        v[k] = q;
        z[k] = s;
        z[k + 1] = f64::INFINITY;
    }

    if !any {
        d.iter_mut().for_each(|x| *x = f64::INFINITY);
        return;
    }

    k = 0;
    for (q, out) in d.iter_mut().enumerate() {
        let qf = q as f64;
        while z[k + 1] < qf {
            k += 1;
        }
        let dq = qf - v[k] as f64;
        *out = dq * dq + f[v[k]];
    }
}

#[inline]
fn intersection(f: &[f64], q: usize, p: usize) -> f64 {
    let qf = q as f64;
    let pf = p as f64;
    ((f[q] + qf * qf) - (f[p] + pf * pf)) / (2.0 * qf - 2.0 * pf)
}
