//! Stateless solvers for Kepler's equation in its elliptic, parabolic
//! and hyperbolic forms.

use std::f64::consts;

use tracing::debug;

/// Eccentricity half-width of the band treated as parabolic.
///
/// The regime dispatch must choose a solver for eccentricities near 1;
/// comparing exactly against 1.0 would send every perturbed data-file
/// value down the slower-converging Newton paths. Inside this band the
/// closed-form Barker solution is used instead.
pub const PARABOLIC_ECCENTRICITY_BAND: f64 = 1e-9;

const MAX_ITERATIONS: u32 = 100;

/// Solve `E - e*sin(E) = M` for the eccentric anomaly `E` of an
/// elliptic orbit, in `[0, 2*pi]`.
///
/// Newton-Raphson with the reduced mean anomaly as the initial guess;
/// above `e = 0.8` the guess switches to `pi`, which keeps the
/// iteration from diverging on highly eccentric orbits.
pub fn solve_elliptic(mean_anomaly: f64, eccentricity: f64) -> f64 {
    let ma = mean_anomaly.rem_euclid(consts::TAU);
    let mut ea = if eccentricity < 0.8 { ma } else { consts::PI };

    let mut iter = 0;
    while iter < MAX_ITERATIONS {
        let f = ea - eccentricity * libm::sin(ea) - ma;
        let fp = 1.0 - eccentricity * libm::cos(ea);
        let next = (ea - f / fp).clamp(0.0, consts::TAU);
        if (next - ea).abs() <= f64::EPSILON * (1.0 + ea.abs()) {
            return next;
        }
        ea = next;
        iter += 1;
    }
    debug!(
        mean_anomaly,
        eccentricity,
        residual = ea - eccentricity * libm::sin(ea) - ma,
        "elliptic anomaly solver hit the iteration cap"
    );
    ea
}

/// Solve Barker's equation for a parabolic orbit.
///
/// Returns `D = tan(nu / 2)`, not an eccentric anomaly; the parabolic
/// branch must be special-cased by callers. The equation reduces to
/// the depressed cubic `D^3 + 3D - 6M = 0`, whose discriminant is
/// strictly positive, so Cardano's formula yields its single real
/// root in closed form.
pub fn solve_parabolic(mean_anomaly: f64) -> f64 {
    let s = libm::sqrt(9.0 * mean_anomaly * mean_anomaly + 1.0);
    libm::cbrt(3.0 * mean_anomaly + s) + libm::cbrt(3.0 * mean_anomaly - s)
}

/// Solve `e*sinh(H) - H = M` for the hyperbolic anomaly `H`.
///
/// Same convergence policy as [`solve_elliptic`]. The initial guess
/// `asinh(M / e)` is exact in the large-anomaly limit, where `sinh`
/// dominates.
pub fn solve_hyperbolic(mean_anomaly: f64, eccentricity: f64) -> f64 {
    let mut ha = libm::asinh(mean_anomaly / eccentricity);

    let mut iter = 0;
    while iter < MAX_ITERATIONS {
        let f = eccentricity * libm::sinh(ha) - ha - mean_anomaly;
        let fp = eccentricity * libm::cosh(ha) - 1.0;
        let next = ha - f / fp;
        if (next - ha).abs() <= f64::EPSILON * (1.0 + ha.abs()) {
            return next;
        }
        ha = next;
        iter += 1;
    }
    debug!(
        mean_anomaly,
        eccentricity,
        residual = eccentricity * libm::sinh(ha) - ha - mean_anomaly,
        "hyperbolic anomaly solver hit the iteration cap"
    );
    ha
}

#[cfg(test)]
mod tests {
    use std::f64::consts;

    use approx::assert_abs_diff_eq;

    use super::{solve_elliptic, solve_hyperbolic, solve_parabolic};

    #[test]
    fn elliptic_zero_mean_anomaly_is_zero() {
        assert_eq!(solve_elliptic(0.0, 0.5), 0.0);
    }

    #[test]
    fn elliptic_satisfies_keplers_equation() {
        for &e in &[0.0, 0.1, 0.5, 0.79, 0.8, 0.95, 0.999] {
            for i in 0..32 {
                let ma = i as f64 * consts::TAU / 32.0;
                let ea = solve_elliptic(ma, e);
                assert_abs_diff_eq!(ea - e * libm::sin(ea), ma, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn elliptic_reduces_large_mean_anomalies() {
        let ea = solve_elliptic(5.0 * consts::TAU + 1.0, 0.3);
        let reference = solve_elliptic(1.0, 0.3);
        assert_abs_diff_eq!(ea, reference, epsilon = 1e-10);
    }

    #[test]
    fn parabolic_zero_is_zero() {
        assert_eq!(solve_parabolic(0.0), 0.0);
    }

    #[test]
    fn parabolic_satisfies_barkers_equation() {
        for &ma in &[-10.0, -1.0, -0.3, 0.2, 1.0, 4.0, 50.0] {
            let d = solve_parabolic(ma);
            assert_abs_diff_eq!((d * d * d + 3.0 * d) / 6.0, ma, epsilon = 1e-9 * ma.abs().max(1.0));
        }
    }

    #[test]
    fn hyperbolic_satisfies_keplers_equation() {
        for &e in &[1.1, 1.5, 2.0, 10.0] {
            for &ma in &[-20.0, -3.0, -0.5, 0.0, 0.5, 3.0, 20.0] {
                let ha = solve_hyperbolic(ma, e);
                assert_abs_diff_eq!(
                    e * libm::sinh(ha) - ha,
                    ma,
                    epsilon = 1e-9 * ma.abs().max(1.0)
                );
            }
        }
    }
}
