//! Keplerian orbits and their time-domain solvers.

pub mod anomaly;
pub mod ephemeris;
pub mod orbits;

/// Newtonian gravitational constant (`m^3 kg^-1 s^-2`).
pub const GRAVITATIONAL_CONSTANT: f64 = 6.674e-11;
