//! Keplerian orbits.

use std::f64::consts;

use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    kepler::{
        anomaly::{self, PARABOLIC_ECCENTRICITY_BAND},
        GRAVITATIONAL_CONSTANT,
    },
    time::UniversalTime,
};

/// The conic regime of an orbit, decided by its eccentricity.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OrbitRegime {
    Elliptic,
    Parabolic,
    Hyperbolic,
}

/// Shape and orientation of a Keplerian orbit.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    /// Inclination (radians).
    pub inclination: f64,
    /// Longitude of the ascending node (radians).
    pub ascending_node_longitude: f64,
    /// Argument of periapsis (radians).
    pub periapsis_argument: f64,
    /// Eccentricity (dimensionless, non-negative).
    pub eccentricity: f64,
    /// Semi-major axis (m). Negative for hyperbolic orbits; the
    /// periapsis radius for parabolic ones.
    pub semi_major_axis: f64,
    /// Mean anomaly at the epoch (radians).
    pub mean_anomaly_at_epoch: f64,
}

impl Parameters {
    pub fn regime(&self) -> OrbitRegime {
        if (self.eccentricity - 1.0).abs() <= PARABOLIC_ECCENTRICITY_BAND {
            OrbitRegime::Parabolic
        } else if self.eccentricity < 1.0 {
            OrbitRegime::Elliptic
        } else {
            OrbitRegime::Hyperbolic
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum OrbitError {
    #[error("eccentricity {0} is negative")]
    NegativeEccentricity(f64),
    #[error("massive body mass {0} kg is not finite and positive")]
    InvalidMass(f64),
    #[error("semi-major axis {0} m is invalid for this regime")]
    InvalidSemiMajorAxis(f64),
    #[error("orbital period {0} s is not finite and positive")]
    InvalidPeriod(f64),
    #[error("a period cannot pair with eccentricity {0}; open orbits have no period")]
    PeriodWithOpenOrbit(f64),
    #[error("record determines neither a semi-major axis nor a period with a known mass")]
    Underdetermined,
}

/// A body's Keplerian motion around a massive primary.
///
/// Every time-domain query is a pure function of the stored
/// parameters, the primary's mass and the queried instant, so queries
/// are idempotent and safe to evaluate concurrently across bodies.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Orbit {
    parameters: Parameters,
    /// Mass of the body being orbited (kg), not the orbiting body.
    massive_body_mass: f64,
    /// Derived orbital period (s); infinite for open orbits.
    period: f64,
}

impl Orbit {
    pub fn new(parameters: Parameters, massive_body_mass: f64) -> Result<Self, OrbitError> {
        if parameters.eccentricity < 0.0 {
            return Err(OrbitError::NegativeEccentricity(parameters.eccentricity));
        }
        if !massive_body_mass.is_finite() || massive_body_mass <= 0.0 {
            return Err(OrbitError::InvalidMass(massive_body_mass));
        }
        let mut parameters = parameters;
        let a = parameters.semi_major_axis;
        match parameters.regime() {
            OrbitRegime::Elliptic | OrbitRegime::Parabolic => {
                if !a.is_finite() || a <= 0.0 {
                    return Err(OrbitError::InvalidSemiMajorAxis(a));
                }
            }
            OrbitRegime::Hyperbolic => {
                if !a.is_finite() || a == 0.0 {
                    return Err(OrbitError::InvalidSemiMajorAxis(a));
                }
                if a > 0.0 {
                    // data files often store the magnitude
                    debug!(semi_major_axis = a, "normalizing hyperbolic semi-major axis to a < 0");
                    parameters.semi_major_axis = -a;
                }
            }
        }
        Ok(Self::from_parts(parameters, massive_body_mass))
    }

    /// Construct from a known orbital period, back-deriving the
    /// primary's mass through Kepler's third law. Only closed orbits
    /// have a period, so non-elliptic parameters are rejected.
    pub fn with_period(parameters: Parameters, period: f64) -> Result<Self, OrbitError> {
        if !period.is_finite() || period <= 0.0 {
            return Err(OrbitError::InvalidPeriod(period));
        }
        if parameters.regime() != OrbitRegime::Elliptic {
            return Err(OrbitError::PeriodWithOpenOrbit(parameters.eccentricity));
        }
        let a = parameters.semi_major_axis;
        if !a.is_finite() || a <= 0.0 {
            return Err(OrbitError::InvalidSemiMajorAxis(a));
        }
        let mu = 4.0 * consts::PI * consts::PI * a * a * a / (period * period);
        Self::new(parameters, mu / GRAVITATIONAL_CONSTANT)
    }

    /// Construct from a serialized record, with the primary's mass
    /// taken from context when the record alone cannot determine it.
    pub fn from_record(
        record: &OrbitRecord,
        massive_body_mass: Option<f64>,
    ) -> Result<Self, OrbitError> {
        let parameters = |semi_major_axis| Parameters {
            inclination: record.inclination.unwrap_or(0.0),
            ascending_node_longitude: record.ascending_node_longitude.unwrap_or(0.0),
            periapsis_argument: record.periapsis_argument.unwrap_or(0.0),
            eccentricity: record.eccentricity.unwrap_or(0.0),
            semi_major_axis,
            mean_anomaly_at_epoch: record.mean_anomaly_at_epoch.unwrap_or(0.0),
        };
        let sma = record.semi_major_axis.or(record.separation_meters);
        match (sma, record.period, massive_body_mass) {
            (Some(a), _, Some(m)) => Self::new(parameters(a), m),
            (Some(a), Some(t), None) => Self::with_period(parameters(a), t),
            (None, Some(t), Some(m)) => {
                if !t.is_finite() || t <= 0.0 {
                    return Err(OrbitError::InvalidPeriod(t));
                }
                if !m.is_finite() || m <= 0.0 {
                    return Err(OrbitError::InvalidMass(m));
                }
                let mu = GRAVITATIONAL_CONSTANT * m;
                // the elliptic Kepler III relation, meaningless for
                // open orbits
                let a = libm::cbrt(mu * t * t / (4.0 * consts::PI * consts::PI));
                let parameters = parameters(a);
                if parameters.regime() != OrbitRegime::Elliptic {
                    return Err(OrbitError::PeriodWithOpenOrbit(parameters.eccentricity));
                }
                Self::new(parameters, m)
            }
            _ => Err(OrbitError::Underdetermined),
        }
    }

    /// The serialized record as a JSON value.
    pub fn json_representation(&self) -> serde_json::Value {
        serde_json::to_value(self.to_record()).unwrap_or(serde_json::Value::Null)
    }

    /// The inverse of [`Orbit::from_record`]; carries the period so the
    /// record reconstructs without external mass context.
    pub fn to_record(&self) -> OrbitRecord {
        OrbitRecord {
            semi_major_axis: Some(self.parameters.semi_major_axis),
            period: self.period.is_finite().then_some(self.period),
            separation_meters: None,
            inclination: Some(self.parameters.inclination),
            ascending_node_longitude: Some(self.parameters.ascending_node_longitude),
            periapsis_argument: Some(self.parameters.periapsis_argument),
            eccentricity: Some(self.parameters.eccentricity),
            mean_anomaly_at_epoch: Some(self.parameters.mean_anomaly_at_epoch),
        }
    }

    /// Caller guarantees the parts were validated.
    pub(crate) fn from_parts(parameters: Parameters, massive_body_mass: f64) -> Self {
        let period = match parameters.regime() {
            OrbitRegime::Elliptic => {
                let a = parameters.semi_major_axis;
                consts::TAU
                    * libm::sqrt(a * a * a / (GRAVITATIONAL_CONSTANT * massive_body_mass))
            }
            OrbitRegime::Parabolic | OrbitRegime::Hyperbolic => f64::INFINITY,
        };
        Self {
            parameters,
            massive_body_mass,
            period,
        }
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn massive_body_mass(&self) -> f64 {
        self.massive_body_mass
    }

    /// Orbital period (s); infinite for parabolic and hyperbolic orbits.
    pub fn period(&self) -> f64 {
        self.period
    }

    pub fn regime(&self) -> OrbitRegime {
        self.parameters.regime()
    }

    pub fn periapsis_radius(&self) -> f64 {
        match self.regime() {
            OrbitRegime::Parabolic => self.parameters.semi_major_axis,
            _ => self.parameters.semi_major_axis * (1.0 - self.parameters.eccentricity),
        }
    }

    pub fn apoapsis_radius(&self) -> f64 {
        match self.regime() {
            OrbitRegime::Elliptic => {
                self.parameters.semi_major_axis * (1.0 + self.parameters.eccentricity)
            }
            OrbitRegime::Parabolic | OrbitRegime::Hyperbolic => f64::INFINITY,
        }
    }

    fn mean_motion(&self) -> f64 {
        let a = self.parameters.semi_major_axis;
        let mu = GRAVITATIONAL_CONSTANT * self.massive_body_mass;
        match self.regime() {
            // Barker's form: the stored axis is the periapsis radius
            OrbitRegime::Parabolic => libm::sqrt(mu / (2.0 * a * a * a)),
            _ => libm::sqrt(mu / libm::fabs(a * a * a)),
        }
    }

    /// Mean anomaly at `ut`.
    ///
    /// Closed orbits reduce `ut` modulo the period in fixed point
    /// first, so astronomically large times keep full phase accuracy.
    pub fn mean_anomaly_at_ut(&self, ut: UniversalTime) -> f64 {
        let dt = if self.period.is_finite() {
            ut.rem_euclid_seconds(self.period)
        } else {
            ut.as_seconds_f64()
        };
        self.mean_motion() * dt + self.parameters.mean_anomaly_at_epoch
    }

    /// Eccentric anomaly at `ut`. For parabolic orbits this is
    /// Barker's `D = tan(nu / 2)`, not a true eccentric anomaly.
    pub fn eccentric_anomaly_at_ut(&self, ut: UniversalTime) -> f64 {
        let ma = self.mean_anomaly_at_ut(ut);
        match self.regime() {
            OrbitRegime::Elliptic => anomaly::solve_elliptic(ma, self.parameters.eccentricity),
            OrbitRegime::Parabolic => anomaly::solve_parabolic(ma),
            OrbitRegime::Hyperbolic => {
                anomaly::solve_hyperbolic(ma, self.parameters.eccentricity)
            }
        }
    }

    pub fn true_anomaly_at_ut(&self, ut: UniversalTime) -> f64 {
        let e = self.parameters.eccentricity;
        let ea = self.eccentric_anomaly_at_ut(ut);
        match self.regime() {
            OrbitRegime::Elliptic => {
                2.0 * libm::atan(libm::sqrt((1.0 + e) / (1.0 - e)) * libm::tan(ea / 2.0))
            }
            OrbitRegime::Parabolic => 2.0 * libm::atan(ea),
            OrbitRegime::Hyperbolic => {
                2.0 * libm::atan(libm::sqrt((e + 1.0) / (e - 1.0)) * libm::tanh(ea / 2.0))
            }
        }
    }

    /// Distance to the orbited body (m) at `ut`.
    pub fn massive_body_distance_at_ut(&self, ut: UniversalTime) -> f64 {
        let nu = self.true_anomaly_at_ut(ut);
        let a = self.parameters.semi_major_axis;
        let e = self.parameters.eccentricity;
        match self.regime() {
            OrbitRegime::Parabolic => 2.0 * a / (1.0 + libm::cos(nu)),
            _ => a * (1.0 - e * e) / (1.0 + e * libm::cos(nu)),
        }
    }

    /// Position in the parent's reference frame (m) at `ut`.
    ///
    /// The in-plane point at the true anomaly is rotated by the
    /// periapsis argument about Z, the inclination about X, then the
    /// ascending node longitude about Z.
    pub fn position_at_ut(&self, ut: UniversalTime) -> Vector3<f64> {
        let nu = self.true_anomaly_at_ut(ut);
        let r = self.massive_body_distance_at_ut(ut);
        self.plane_rotation(self.parameters.periapsis_argument + nu) * Vector3::new(r, 0.0, 0.0)
    }

    /// Unit vector along the orbital angular momentum.
    pub fn north(&self) -> Vector3<f64> {
        self.plane_orientation() * Vector3::z()
    }

    /// Orientation of the orbital plane in the parent frame:
    /// inclination about X, then ascending node longitude about Z.
    pub fn plane_orientation(&self) -> Rotation3<f64> {
        self.plane_rotation(0.0)
    }

    fn plane_rotation(&self, in_plane_angle: f64) -> Rotation3<f64> {
        Rotation3::from_axis_angle(
            &Vector3::z_axis(),
            self.parameters.ascending_node_longitude,
        ) * Rotation3::from_axis_angle(&Vector3::x_axis(), self.parameters.inclination)
            * Rotation3::from_axis_angle(&Vector3::z_axis(), in_plane_angle)
    }
}

/// Serialized orbit description. Every field is optional; see
/// [`Orbit::from_record`] for how missing elements are derived.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrbitRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semi_major_axis: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separation_meters: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inclination: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ascending_node_longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub periapsis_argument: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eccentricity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_anomaly_at_epoch: Option<f64>,
}

#[cfg(test)]
mod tests {
    use std::f64::consts;

    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use nalgebra::Vector3;

    use super::{Orbit, OrbitError, OrbitRecord, Parameters};
    use crate::time::UniversalTime;

    const SOLAR_MASS: f64 = 1.9891e30;
    const AU: f64 = 1.496e11;

    fn circular(a: f64) -> Parameters {
        Parameters {
            inclination: 0.0,
            ascending_node_longitude: 0.0,
            periapsis_argument: 0.0,
            eccentricity: 0.0,
            semi_major_axis: a,
            mean_anomaly_at_epoch: 0.0,
        }
    }

    #[test]
    fn keplers_third_law_one_au() {
        let orbit = Orbit::new(circular(AU), SOLAR_MASS).unwrap();
        assert_relative_eq!(orbit.period(), 3.156e7, max_relative = 1e-3);
    }

    #[test]
    fn mean_anomaly_is_periodic() {
        let mut params = circular(AU);
        params.eccentricity = 0.3;
        params.mean_anomaly_at_epoch = 1.2;
        let orbit = Orbit::new(params, SOLAR_MASS).unwrap();
        let t = UniversalTime::new_seconds(8.64e6);
        let m0 = orbit.mean_anomaly_at_ut(t).rem_euclid(consts::TAU);
        let m1 = orbit
            .mean_anomaly_at_ut(t + orbit.period())
            .rem_euclid(consts::TAU);
        assert_abs_diff_eq!(m0, m1, epsilon = 1e-6);
    }

    #[test]
    fn eccentric_anomaly_satisfies_keplers_equation() {
        let mut params = circular(AU);
        params.eccentricity = 0.6;
        let orbit = Orbit::new(params, SOLAR_MASS).unwrap();
        let t = UniversalTime::new_seconds(1.3e7);
        let ma = orbit.mean_anomaly_at_ut(t).rem_euclid(consts::TAU);
        let ea = orbit.eccentric_anomaly_at_ut(t);
        assert_abs_diff_eq!(ea - 0.6 * libm::sin(ea), ma, epsilon = 1e-10);
    }

    #[test]
    fn record_round_trip() {
        let params = Parameters {
            inclination: 0.3,
            ascending_node_longitude: 1.1,
            periapsis_argument: 2.2,
            eccentricity: 0.25,
            semi_major_axis: 2.0 * AU,
            mean_anomaly_at_epoch: 0.7,
        };
        let orbit = Orbit::new(params, SOLAR_MASS).unwrap();
        let rebuilt = Orbit::from_record(&orbit.to_record(), None).unwrap();
        assert_eq!(*rebuilt.parameters(), params);
        assert_relative_eq!(rebuilt.period(), orbit.period(), max_relative = 1e-9);
    }

    #[test]
    fn record_derives_axis_from_period_and_mass() {
        let record = OrbitRecord {
            period: Some(3.156e7),
            ..OrbitRecord::default()
        };
        let orbit = Orbit::from_record(&record, Some(SOLAR_MASS)).unwrap();
        assert_relative_eq!(orbit.parameters().semi_major_axis, AU, max_relative = 1e-3);
    }

    #[test]
    fn record_uses_separation_as_axis_fallback() {
        let record = OrbitRecord {
            separation_meters: Some(AU),
            period: Some(3.156e7),
            ..OrbitRecord::default()
        };
        let orbit = Orbit::from_record(&record, None).unwrap();
        assert_eq!(orbit.parameters().semi_major_axis, AU);
    }

    #[test]
    fn period_with_open_orbit_is_an_error() {
        let record = OrbitRecord {
            period: Some(3.156e7),
            eccentricity: Some(1.5),
            ..OrbitRecord::default()
        };
        assert_eq!(
            Orbit::from_record(&record, Some(SOLAR_MASS)),
            Err(OrbitError::PeriodWithOpenOrbit(1.5))
        );

        let mut params = circular(AU);
        params.eccentricity = 1.0;
        assert_eq!(
            Orbit::with_period(params, 3.156e7),
            Err(OrbitError::PeriodWithOpenOrbit(1.0))
        );
    }

    #[test]
    fn underdetermined_record_is_an_error() {
        let record = OrbitRecord {
            eccentricity: Some(0.1),
            ..OrbitRecord::default()
        };
        assert_eq!(
            Orbit::from_record(&record, None),
            Err(OrbitError::Underdetermined)
        );
    }

    #[test]
    fn negative_eccentricity_is_an_error() {
        let mut params = circular(AU);
        params.eccentricity = -0.1;
        assert_eq!(
            Orbit::new(params, SOLAR_MASS),
            Err(OrbitError::NegativeEccentricity(-0.1))
        );
    }

    #[test]
    fn position_queries_are_idempotent() {
        let mut params = circular(AU);
        params.eccentricity = 0.4;
        params.inclination = 0.5;
        let orbit = Orbit::new(params, SOLAR_MASS).unwrap();
        let t0 = UniversalTime::new_seconds(1.0e6);
        let t1 = UniversalTime::new_seconds(2.0e6);
        let first = orbit.position_at_ut(t0);
        assert_eq!(orbit.position_at_ut(t0), first);
        let _ = orbit.position_at_ut(t1);
        assert_eq!(orbit.position_at_ut(t0), first);
    }

    #[test]
    fn circular_orbit_starts_at_periapsis_on_x() {
        let orbit = Orbit::new(circular(AU), SOLAR_MASS).unwrap();
        let pos = orbit.position_at_ut(UniversalTime::EPOCH);
        assert_abs_diff_eq!(pos.x, AU, epsilon = 1.0);
        assert_abs_diff_eq!(pos.y, 0.0, epsilon = 1.0);
        assert_abs_diff_eq!(pos.z, 0.0, epsilon = 1.0);
    }

    #[test]
    fn circular_orbit_distance_is_constant() {
        let orbit = Orbit::new(circular(AU), SOLAR_MASS).unwrap();
        for i in 0..8 {
            let t = UniversalTime::new_seconds(i as f64 * 4.0e6);
            assert_relative_eq!(
                orbit.massive_body_distance_at_ut(t),
                AU,
                max_relative = 1e-9
            );
        }
    }

    #[test]
    fn north_follows_inclination_then_node() {
        let mut params = circular(AU);
        params.inclination = consts::FRAC_PI_2;
        let orbit = Orbit::new(params, SOLAR_MASS).unwrap();
        let north = orbit.north();
        assert_abs_diff_eq!(north, Vector3::new(0.0, -1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn hyperbolic_axis_is_normalized_negative() {
        let mut params = circular(AU);
        params.eccentricity = 2.0;
        let orbit = Orbit::new(params, SOLAR_MASS).unwrap();
        assert_eq!(orbit.parameters().semi_major_axis, -AU);
        assert!(orbit.period().is_infinite());
        // periapsis distance stays positive under the a < 0 convention
        assert_relative_eq!(orbit.periapsis_radius(), AU, max_relative = 1e-12);
    }

    #[test]
    fn parabolic_periapsis_distance() {
        let mut params = circular(AU);
        params.eccentricity = 1.0;
        let orbit = Orbit::new(params, SOLAR_MASS).unwrap();
        // at the epoch the mean anomaly is zero, so the body sits at periapsis
        assert_relative_eq!(
            orbit.massive_body_distance_at_ut(UniversalTime::EPOCH),
            AU,
            max_relative = 1e-9
        );
    }
}
