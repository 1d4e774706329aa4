//! 1-D B-spline filter bank.
//!
//! Converts sampled lines to interpolation coefficients and back, computes
//! derivative lines, and decimates oversampled "dual" lines. Everything here
//! is pure numerics on `f64` scratch lines with mirror-off-bounds boundary
//! handling; the 2-D separable drivers live in [`crate::pyramid`].

/// Spline degrees used by the pyramid machinery.
///
/// Cubic is the interpolation workhorse; the degree-7 variant only appears
/// in the repeated-decimation path where the extra smoothness pays off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degree {
    Cubic,
    Septic,
}

/// 2-tap symmetric kernel reconstructing cardinal samples from cubic
/// coefficients.
pub(crate) const CARDINAL_CUBIC: [f64; 2] = [2.0 / 3.0, 1.0 / 6.0];

/// 4-tap symmetric kernel for the degree-7 reconstruction.
pub(crate) const CARDINAL_SEPTIC: [f64; 4] =
    [151.0 / 315.0, 397.0 / 1680.0, 1.0 / 42.0, 1.0 / 5040.0];

/// Antisymmetric kernel producing the derivative of a cubic spline.
const GRADIENT: [f64; 2] = [0.0, 1.0 / 2.0];

fn poles(degree: Degree) -> &'static [f64] {
    // Cubic pole is sqrt(3) - 2; spelled out so the table stays const.
    const CUBIC: [f64; 1] = [-0.267_949_192_431_122_7];
    const SEPTIC: [f64; 3] = [
        -0.535_280_430_796_438_17,
        -0.122_554_615_192_326_69,
        -0.009_148_694_809_608_277,
    ];
    match degree {
        Degree::Cubic => &CUBIC,
        Degree::Septic => &SEPTIC,
    }
}

/// In-place conversion of a sampled line into B-spline interpolation
/// coefficients.
///
/// Causal then anti-causal recursion per pole, mirror-off-bounds boundary
/// conditions. A `tolerance` of `0.0` uses the exact full-length causal
/// initialization. Length-1 lines are already their own coefficients.
pub fn samples_to_coefficients(c: &mut [f64], degree: Degree, tolerance: f64) {
    if c.len() == 1 {
        return;
    }
    let poles = poles(degree);
    let mut lambda = 1.0;
    for &z in poles {
        lambda *= (1.0 - z) * (1.0 - 1.0 / z);
    }
    for v in c.iter_mut() {
        *v *= lambda;
    }
    for &z in poles {
        c[0] = initial_causal_mirror_off_bounds(c, z, tolerance);
        for n in 1..c.len() {
            c[n] += z * c[n - 1];
        }
        let last = c.len() - 1;
        c[last] = initial_anticausal_mirror_off_bounds(c, z);
        for n in (0..last).rev() {
            c[n] = z * (c[n + 1] - c[n]);
        }
    }
}

fn initial_causal_mirror_off_bounds(c: &[f64], z: f64, tolerance: f64) -> f64 {
    let n = c.len();
    let mut z1 = z;
    let mut zn = z.powi(n as i32);
    let mut sum = (1.0 + z) * (c[0] + zn * c[n - 1]);
    let mut horizon = n;
    if tolerance > 0.0 {
        horizon = 2 + (tolerance.ln() / z.abs().ln()) as usize;
        horizon = horizon.min(n);
    }
    zn *= zn;
    for &v in c.iter().take(horizon.saturating_sub(1)).skip(1) {
        z1 *= z;
        zn /= z;
        sum += (z1 + zn) * v;
    }
    sum / (1.0 - z.powi(2 * n as i32))
}

#[inline]
fn initial_anticausal_mirror_off_bounds(c: &[f64], z: f64) -> f64 {
    z * c[c.len() - 1] / (z - 1.0)
}

/// Reconstruct cardinal samples from cubic coefficients, in place.
pub fn coefficients_to_samples(c: &mut [f64]) {
    let mut s = vec![0.0; c.len()];
    symmetric_fir_mirror_off_bounds(&CARDINAL_CUBIC, c, &mut s);
    c.copy_from_slice(&s);
}

/// Derivative of the cubic spline described by `c`, in place.
pub fn coefficients_to_gradient(c: &mut [f64]) {
    let mut s = vec![0.0; c.len()];
    antisymmetric_fir_mirror_off_bounds(&GRADIENT, c, &mut s);
    c.copy_from_slice(&s);
}

/// Symmetric FIR with mirror-off-bounds extension.
///
/// Supports the 2-tap cubic and 4-tap degree-7 kernels; short lines get the
/// explicitly folded boundary formulas instead of index reflection.
pub fn symmetric_fir_mirror_off_bounds(h: &[f64], c: &[f64], s: &mut [f64]) {
    let n = c.len();
    match h.len() {
        2 => {
            if n >= 2 {
                s[0] = h[0] * c[0] + h[1] * (c[0] + c[1]);
                for i in 1..n - 1 {
                    s[i] = h[0] * c[i] + h[1] * (c[i - 1] + c[i + 1]);
                }
                s[n - 1] = h[0] * c[n - 1] + h[1] * (c[n - 2] + c[n - 1]);
            } else {
                s[0] = (h[0] + 2.0 * h[1]) * c[0];
            }
        }
        4 => {
            if n >= 6 {
                s[0] = h[0] * c[0]
                    + h[1] * (c[0] + c[1])
                    + h[2] * (c[1] + c[2])
                    + h[3] * (c[2] + c[3]);
                s[1] = h[0] * c[1]
                    + h[1] * (c[0] + c[2])
                    + h[2] * (c[0] + c[3])
                    + h[3] * (c[1] + c[4]);
                s[2] = h[0] * c[2]
                    + h[1] * (c[1] + c[3])
                    + h[2] * (c[0] + c[4])
                    + h[3] * (c[0] + c[5]);
                for i in 3..n - 3 {
                    s[i] = h[0] * c[i]
                        + h[1] * (c[i - 1] + c[i + 1])
                        + h[2] * (c[i - 2] + c[i + 2])
                        + h[3] * (c[i - 3] + c[i + 3]);
                }
                s[n - 3] = h[0] * c[n - 3]
                    + h[1] * (c[n - 4] + c[n - 2])
                    + h[2] * (c[n - 5] + c[n - 1])
                    + h[3] * (c[n - 6] + c[n - 1]);
                s[n - 2] = h[0] * c[n - 2]
                    + h[1] * (c[n - 3] + c[n - 1])
                    + h[2] * (c[n - 4] + c[n - 1])
                    + h[3] * (c[n - 5] + c[n - 2]);
                s[n - 1] = h[0] * c[n - 1]
                    + h[1] * (c[n - 2] + c[n - 1])
                    + h[2] * (c[n - 3] + c[n - 2])
                    + h[3] * (c[n - 4] + c[n - 3]);
            } else {
                match n {
                    5 => {
                        s[0] = h[0] * c[0]
                            + h[1] * (c[0] + c[1])
                            + h[2] * (c[1] + c[2])
                            + h[3] * (c[2] + c[3]);
                        s[1] = h[0] * c[1]
                            + h[1] * (c[0] + c[2])
                            + h[2] * (c[0] + c[3])
                            + h[3] * (c[1] + c[4]);
                        s[2] = h[0] * c[2] + h[1] * (c[1] + c[3]) + (h[2] + h[3]) * (c[0] + c[4]);
                        s[3] = h[0] * c[3]
                            + h[1] * (c[2] + c[4])
                            + h[2] * (c[1] + c[4])
                            + h[3] * (c[0] + c[3]);
                        s[4] = h[0] * c[4]
                            + h[1] * (c[3] + c[4])
                            + h[2] * (c[2] + c[3])
                            + h[3] * (c[1] + c[2]);
                    }
                    4 => {
                        s[0] = h[0] * c[0]
                            + h[1] * (c[0] + c[1])
                            + h[2] * (c[1] + c[2])
                            + h[3] * (c[2] + c[3]);
                        s[1] = h[0] * c[1]
                            + h[1] * (c[0] + c[2])
                            + h[2] * (c[0] + c[3])
                            + h[3] * (c[1] + c[3]);
                        s[2] = h[0] * c[2]
                            + h[1] * (c[1] + c[3])
                            + h[2] * (c[0] + c[3])
                            + h[3] * (c[0] + c[2]);
                        s[3] = h[0] * c[3]
                            + h[1] * (c[2] + c[3])
                            + h[2] * (c[1] + c[2])
                            + h[3] * (c[0] + c[1]);
                    }
                    3 => {
                        s[0] = h[0] * c[0]
                            + h[1] * (c[0] + c[1])
                            + h[2] * (c[1] + c[2])
                            + 2.0 * h[3] * c[2];
                        s[1] = h[0] * c[1] + (h[1] + h[2]) * (c[0] + c[2]) + 2.0 * h[3] * c[1];
                        s[2] = h[0] * c[2]
                            + h[1] * (c[1] + c[2])
                            + h[2] * (c[0] + c[1])
                            + 2.0 * h[3] * c[0];
                    }
                    2 => {
                        s[0] = (h[0] + h[1] + h[3]) * c[0] + (h[1] + 2.0 * h[2] + h[3]) * c[1];
                        s[1] = (h[0] + h[1] + h[3]) * c[1] + (h[1] + 2.0 * h[2] + h[3]) * c[0];
                    }
                    1 => {
                        s[0] = (h[0] + 2.0 * (h[1] + h[2] + h[3])) * c[0];
                    }
                    _ => {}
                }
            }
        }
        _ => s.copy_from_slice(c),
    }
}

/// Antisymmetric FIR with mirror-off-bounds extension (derivative kernels).
pub fn antisymmetric_fir_mirror_off_bounds(h: &[f64; 2], c: &[f64], s: &mut [f64]) {
    let n = c.len();
    if n >= 2 {
        s[0] = h[1] * (c[1] - c[0]);
        for i in 1..n - 1 {
            s[i] = h[1] * (c[i + 1] - c[i - 1]);
        }
        s[n - 1] = h[1] * (c[n - 1] - c[n - 2]);
    } else {
        s[0] = 0.0;
    }
}

/// Halve an oversampled dual line with the 3-tap binomial kernel
/// (6/16, 4/16, 1/16).
///
/// Output length is `c.len() / 2`; odd input lengths and lines shorter than
/// the kernel support take the explicitly folded formulas.
pub fn reduce_dual(c: &[f64], s: &mut [f64]) {
    const H: [f64; 3] = [6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];
    let n = c.len();
    let m = s.len();
    if m >= 2 {
        s[0] = H[0] * c[0] + H[1] * (c[0] + c[1]) + H[2] * (c[1] + c[2]);
        let mut i = 2;
        for j in 1..m - 1 {
            s[j] = H[0] * c[i] + H[1] * (c[i - 1] + c[i + 1]) + H[2] * (c[i - 2] + c[i + 2]);
            i += 2;
        }
        if n == 2 * m {
            s[m - 1] = H[0] * c[n - 2] + H[1] * (c[n - 3] + c[n - 1]) + H[2] * (c[n - 4] + c[n - 1]);
        } else {
            s[m - 1] = H[0] * c[n - 3] + H[1] * (c[n - 4] + c[n - 2]) + H[2] * (c[n - 5] + c[n - 1]);
        }
    } else {
        match n {
            3 => s[0] = H[0] * c[0] + H[1] * (c[0] + c[1]) + H[2] * (c[1] + c[2]),
            2 => s[0] = H[0] * c[0] + H[1] * (c[0] + c[1]) + 2.0 * H[2] * c[1],
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn cubic_pole_matches_closed_form() {
        let z = poles(Degree::Cubic)[0];
        assert!((z - (3.0f64.sqrt() - 2.0)).abs() < 1e-15);
    }

    #[test]
    fn cubic_round_trip_recovers_samples() {
        let mut rng = StdRng::seed_from_u64(7);
        for len in [2usize, 3, 5, 17, 64] {
            let original: Vec<f64> = (0..len).map(|_| rng.gen_range(-10.0..10.0)).collect();
            let mut line = original.clone();
            samples_to_coefficients(&mut line, Degree::Cubic, 0.0);
            coefficients_to_samples(&mut line);
            for (a, b) in line.iter().zip(&original) {
                assert!((a - b).abs() < 1e-9, "len {len}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn septic_round_trip_recovers_samples() {
        let mut rng = StdRng::seed_from_u64(11);
        let original: Vec<f64> = (0..33).map(|_| rng.gen_range(0.0..255.0)).collect();
        let mut line = original.clone();
        samples_to_coefficients(&mut line, Degree::Septic, 0.0);
        let mut out = vec![0.0; line.len()];
        symmetric_fir_mirror_off_bounds(&CARDINAL_SEPTIC, &line, &mut out);
        for (a, b) in out.iter().zip(&original) {
            assert!((a - b).abs() < 1e-8);
        }
    }

    #[test]
    fn length_one_line_is_unchanged() {
        let mut line = [42.0];
        samples_to_coefficients(&mut line, Degree::Cubic, 0.0);
        assert_eq!(line[0], 42.0);
    }

    #[test]
    fn gradient_of_linear_ramp_is_slope() {
        // The cubic spline of a ramp is the ramp; its derivative is the
        // slope. Mirror boundary effects decay geometrically, so only the
        // interior is checked.
        let mut line: Vec<f64> = (0..32).map(|i| 3.0 * i as f64).collect();
        samples_to_coefficients(&mut line, Degree::Cubic, 0.0);
        coefficients_to_gradient(&mut line);
        for v in &line[10..22] {
            assert!((v - 3.0).abs() < 1e-4, "slope {v}");
        }
    }

    #[test]
    fn reduce_dual_preserves_constant_lines() {
        for n in [2usize, 3, 4, 5, 8, 9, 16] {
            let c = vec![1.0; n];
            let mut s = vec![0.0; n / 2];
            reduce_dual(&c, &mut s);
            for v in &s {
                assert!((v - 1.0).abs() < 1e-12, "n {n}: {v}");
            }
        }
    }

    #[test]
    fn antisymmetric_fir_zero_on_constant() {
        let c = vec![5.0; 9];
        let mut s = vec![1.0; 9];
        antisymmetric_fir_mirror_off_bounds(&GRADIENT, &c, &mut s);
        assert!(s.iter().all(|v| *v == 0.0));
    }
}
