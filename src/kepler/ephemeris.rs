//! Orbits whose elements come from time-indexed ephemeris tables
//! rather than fixed parameters.

use std::{
    collections::BTreeMap,
    f64::consts,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    kepler::{
        orbits::{Orbit, Parameters},
        GRAVITATIONAL_CONSTANT,
    },
    time::UniversalTime,
};

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// How the periapsis argument is interpolated between table entries.
///
/// `Shortest` takes the shortest angular path. Bodies whose near-zero
/// eccentricity lets the periapsis argument precess faster than half a
/// turn per table interval need `Forward`, which always walks the
/// angle forward.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AngleInterpolation {
    #[default]
    Shortest,
    Forward,
}

#[derive(Debug, Error)]
pub enum EphemerisError {
    #[error("ephemeris body name is empty")]
    EmptyBodyName,
    #[error("ephemeris directory {} does not exist", .0.display())]
    MissingDirectory(PathBuf),
    #[error("ephemeris directory {} holds no table entries", .0.display())]
    EmptyTable(PathBuf),
    #[error("massive body mass {0} kg is not finite and positive")]
    InvalidMass(f64),
    #[error("row for day {day} in {}: {detail}", .path.display())]
    InvalidRow {
        path: PathBuf,
        day: i64,
        detail: String,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EphemerisRow {
    day: i64,
    inclination: f64,
    ascending_node_longitude: f64,
    periapsis_argument: f64,
    eccentricity: f64,
    semi_major_axis: f64,
    mean_anomaly_at_epoch: f64,
}

/// An orbit read from per-day osculating elements.
///
/// The table is loaded once at construction and never mutated; every
/// query interpolates a fresh [`Parameters`] and builds the
/// corresponding [`Orbit`], so queries stay pure.
#[derive(Clone, Debug)]
pub struct EphemerisOrbit {
    massive_body_mass: f64,
    table: BTreeMap<i64, Parameters>,
    periapsis_interpolation: AngleInterpolation,
}

impl EphemerisOrbit {
    /// Load every `*.csv` file under `directory/<body_name>`, in
    /// lexicographic file order. Rows are validated here so the
    /// per-frame query path cannot fail.
    pub fn load(
        directory: &Path,
        body_name: &str,
        massive_body_mass: f64,
        periapsis_interpolation: AngleInterpolation,
    ) -> Result<Self, EphemerisError> {
        if body_name.is_empty() {
            return Err(EphemerisError::EmptyBodyName);
        }
        let dir = directory.join(body_name);
        if !dir.is_dir() {
            return Err(EphemerisError::MissingDirectory(dir));
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        paths.sort();

        let mut table = BTreeMap::new();
        for path in &paths {
            let mut reader = csv::Reader::from_path(path)?;
            for row in reader.deserialize() {
                let row: EphemerisRow = row?;
                let parameters = Parameters {
                    inclination: row.inclination,
                    ascending_node_longitude: row.ascending_node_longitude,
                    periapsis_argument: row.periapsis_argument,
                    eccentricity: row.eccentricity,
                    semi_major_axis: row.semi_major_axis,
                    mean_anomaly_at_epoch: row.mean_anomaly_at_epoch,
                };
                validate_row(path, row.day, &parameters)?;
                if table.insert(row.day, parameters).is_some() {
                    warn!(body = body_name, day = row.day, "duplicate ephemeris day, keeping the later row");
                }
            }
        }
        if table.is_empty() {
            return Err(EphemerisError::EmptyTable(dir));
        }
        info!(
            body = body_name,
            entries = table.len(),
            files = paths.len(),
            "loaded ephemeris table"
        );
        Self::from_table(table, massive_body_mass, periapsis_interpolation)
    }

    /// Build directly from an already-validated table.
    pub fn from_table(
        table: BTreeMap<i64, Parameters>,
        massive_body_mass: f64,
        periapsis_interpolation: AngleInterpolation,
    ) -> Result<Self, EphemerisError> {
        if !massive_body_mass.is_finite() || massive_body_mass <= 0.0 {
            return Err(EphemerisError::InvalidMass(massive_body_mass));
        }
        if table.is_empty() {
            return Err(EphemerisError::EmptyTable(PathBuf::new()));
        }
        Ok(Self {
            massive_body_mass,
            table,
            periapsis_interpolation,
        })
    }

    pub fn massive_body_mass(&self) -> f64 {
        self.massive_body_mass
    }

    pub fn table(&self) -> &BTreeMap<i64, Parameters> {
        &self.table
    }

    pub fn periapsis_interpolation(&self) -> AngleInterpolation {
        self.periapsis_interpolation
    }

    /// Elements at `ut`: clamped outside the table (with the day-zero
    /// mean anomaly anchoring the epoch), interpolated between the
    /// bracketing entries inside it.
    pub fn parameters_at_ut(&self, ut: UniversalTime) -> Parameters {
        let day = ut.day_index();
        let before = self.table.range(..=day).next_back();
        let after = self.table.range(day + 1..).next();

        match (before, after) {
            (Some((&d0, p0)), Some((&d1, p1))) => self.interpolate(ut, d0, p0, d1, p1),
            (Some((&d, p)), None) | (None, Some((&d, p))) => {
                debug!(day, entry = d, "ephemeris query outside the table, clamping");
                self.clamp(p)
            }
            (None, None) => unreachable!("ephemeris tables are never empty"),
        }
    }

    /// The interpolated orbit at `ut`.
    pub fn orbit_at_ut(&self, ut: UniversalTime) -> Orbit {
        Orbit::from_parts(self.parameters_at_ut(ut), self.massive_body_mass)
    }

    pub fn position_at_ut(&self, ut: UniversalTime) -> nalgebra::Vector3<f64> {
        self.orbit_at_ut(ut).position_at_ut(ut)
    }

    fn clamp(&self, entry: &Parameters) -> Parameters {
        let mut parameters = *entry;
        if let Some(anchor) = self.table.get(&0) {
            parameters.mean_anomaly_at_epoch = anchor.mean_anomaly_at_epoch;
        }
        parameters
    }

    fn interpolate(
        &self,
        ut: UniversalTime,
        d0: i64,
        p0: &Parameters,
        d1: i64,
        p1: &Parameters,
    ) -> Parameters {
        let span = (d1 - d0) as f64 * SECONDS_PER_DAY;
        let dt = (ut - UniversalTime::from_day_index(d0)).as_seconds_f64();
        let frac = dt / span;
        let lerp = |a: f64, b: f64| a + (b - a) * frac;

        let semi_major_axis = lerp(p0.semi_major_axis, p1.semi_major_axis);
        let periapsis_argument = match self.periapsis_interpolation {
            AngleInterpolation::Shortest => {
                p0.periapsis_argument
                    + wrap_signed(p1.periapsis_argument - p0.periapsis_argument) * frac
            }
            AngleInterpolation::Forward => {
                p0.periapsis_argument
                    + (p1.periapsis_argument - p0.periapsis_argument).rem_euclid(consts::TAU)
                        * frac
            }
        };

        let mu = GRAVITATIONAL_CONSTANT * self.massive_body_mass;
        let mean_motion = |a: f64| libm::sqrt(mu / libm::fabs(a * a * a));
        let n0 = mean_motion(p0.semi_major_axis);
        let n1 = mean_motion(p1.semi_major_axis);
        let nt = mean_motion(semi_major_axis);

        // mean anomaly each bracketing entry predicts at its own day
        let ma_at = |day: i64, p: &Parameters, n: f64| {
            let reduced = UniversalTime::from_day_index(day).rem_euclid_seconds(consts::TAU / n);
            (n * reduced + p.mean_anomaly_at_epoch).rem_euclid(consts::TAU)
        };
        let ma0 = ma_at(d0, p0, n0);
        let ma1 = ma_at(d1, p1, n1);

        let period0 = consts::TAU / n0;
        let ma_query = if span < 0.5 * period0 {
            // short gap: direct interpolation, wrapped forward so the
            // anomaly keeps increasing across the entry
            ma0 + (ma1 - ma0).rem_euclid(consts::TAU) * frac
        } else {
            // long gap: propagate at the mean motion and spread the
            // residual against the next sample over the interval
            let residual = wrap_signed(ma1 - (ma0 + n0 * span));
            ma0 + n0 * dt + residual * frac
        };

        // epoch anomaly that makes the orbit machinery reproduce
        // ma_query at ut
        let reduced = ut.rem_euclid_seconds(consts::TAU / nt);
        let mean_anomaly_at_epoch = (ma_query - nt * reduced).rem_euclid(consts::TAU);

        Parameters {
            inclination: lerp(p0.inclination, p1.inclination),
            ascending_node_longitude: lerp(
                p0.ascending_node_longitude,
                p1.ascending_node_longitude,
            ),
            periapsis_argument,
            eccentricity: lerp(p0.eccentricity, p1.eccentricity),
            semi_major_axis,
            mean_anomaly_at_epoch,
        }
    }
}

fn validate_row(path: &Path, day: i64, p: &Parameters) -> Result<(), EphemerisError> {
    let invalid = |detail: &str| EphemerisError::InvalidRow {
        path: path.to_path_buf(),
        day,
        detail: detail.to_owned(),
    };
    if !p.eccentricity.is_finite() || p.eccentricity < 0.0 {
        return Err(invalid("eccentricity must be finite and non-negative"));
    }
    if !p.semi_major_axis.is_finite() || p.semi_major_axis <= 0.0 {
        return Err(invalid("semi-major axis must be finite and positive"));
    }
    if !p.inclination.is_finite()
        || !p.ascending_node_longitude.is_finite()
        || !p.periapsis_argument.is_finite()
        || !p.mean_anomaly_at_epoch.is_finite()
    {
        return Err(invalid("angles must be finite"));
    }
    Ok(())
}

/// Wrap an angle difference into `(-pi, pi]`.
fn wrap_signed(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(consts::TAU);
    if wrapped > consts::PI {
        wrapped - consts::TAU
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, f64::consts, fs, io::Write};

    use approx::{assert_abs_diff_eq, assert_relative_eq};

    use super::{AngleInterpolation, EphemerisError, EphemerisOrbit, SECONDS_PER_DAY};
    use crate::{kepler::orbits::Parameters, time::UniversalTime};

    const EARTH_MASS: f64 = 5.972e24;
    const MOON_SMA: f64 = 3.844e8;

    fn entry(sma: f64, argpe: f64, ma: f64) -> Parameters {
        Parameters {
            inclination: 0.1,
            ascending_node_longitude: 0.2,
            periapsis_argument: argpe,
            eccentricity: 0.05,
            semi_major_axis: sma,
            mean_anomaly_at_epoch: ma,
        }
    }

    fn write_table(dir: &std::path::Path, body: &str, rows: &[(i64, Parameters)]) {
        let body_dir = dir.join(body);
        fs::create_dir_all(&body_dir).unwrap();
        let mut file = fs::File::create(body_dir.join("elements.csv")).unwrap();
        writeln!(
            file,
            "day,inclination,ascendingNodeLongitude,periapsisArgument,eccentricity,semiMajorAxis,meanAnomalyAtEpoch"
        )
        .unwrap();
        for (day, p) in rows {
            writeln!(
                file,
                "{},{},{},{},{},{},{}",
                day,
                p.inclination,
                p.ascending_node_longitude,
                p.periapsis_argument,
                p.eccentricity,
                p.semi_major_axis,
                p.mean_anomaly_at_epoch
            )
            .unwrap();
        }
    }

    #[test]
    fn missing_directory_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let err = EphemerisOrbit::load(
            dir.path(),
            "Nowhere",
            EARTH_MASS,
            AngleInterpolation::Shortest,
        )
        .unwrap_err();
        assert!(matches!(err, EphemerisError::MissingDirectory(_)));
    }

    #[test]
    fn empty_body_name_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let err =
            EphemerisOrbit::load(dir.path(), "", EARTH_MASS, AngleInterpolation::Shortest)
                .unwrap_err();
        assert!(matches!(err, EphemerisError::EmptyBodyName));
    }

    #[test]
    fn loads_and_interpolates_between_entries() {
        let dir = tempfile::tempdir().unwrap();
        write_table(
            dir.path(),
            "Luna",
            &[
                (0, entry(MOON_SMA, 0.4, 0.0)),
                (2, entry(MOON_SMA * 1.1, 0.6, 0.0)),
            ],
        );
        let orbit = EphemerisOrbit::load(
            dir.path(),
            "Luna",
            EARTH_MASS,
            AngleInterpolation::Shortest,
        )
        .unwrap();
        assert_eq!(orbit.table().len(), 2);

        let mid = orbit.parameters_at_ut(UniversalTime::from_day_index(1));
        assert_relative_eq!(mid.semi_major_axis, MOON_SMA * 1.05, max_relative = 1e-12);
        assert_abs_diff_eq!(mid.periapsis_argument, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn clamps_outside_the_table_with_day_zero_anchor() {
        let table = BTreeMap::from([
            (0, entry(MOON_SMA, 0.4, 1.5)),
            (3, entry(MOON_SMA * 1.2, 0.6, 2.5)),
        ]);
        let orbit =
            EphemerisOrbit::from_table(table, EARTH_MASS, AngleInterpolation::Shortest).unwrap();

        let before = orbit.parameters_at_ut(UniversalTime::new_seconds(-1.0e6));
        assert_eq!(before.semi_major_axis, MOON_SMA);
        assert_eq!(before.mean_anomaly_at_epoch, 1.5);

        let after = orbit.parameters_at_ut(UniversalTime::from_day_index(10));
        assert_eq!(after.semi_major_axis, MOON_SMA * 1.2);
        // the epoch anomaly still comes from day zero
        assert_eq!(after.mean_anomaly_at_epoch, 1.5);
    }

    #[test]
    fn forward_interpolation_walks_the_angle_forward() {
        let table = |interp| {
            EphemerisOrbit::from_table(
                BTreeMap::from([
                    (0, entry(MOON_SMA, 0.5, 0.0)),
                    (1, entry(MOON_SMA, 6.0, 0.0)),
                ]),
                EARTH_MASS,
                interp,
            )
            .unwrap()
        };
        let half_day = UniversalTime::new_seconds(0.5 * SECONDS_PER_DAY);

        let shortest = table(AngleInterpolation::Shortest).parameters_at_ut(half_day);
        let delta = 6.0 - 0.5 - consts::TAU;
        assert_abs_diff_eq!(
            shortest.periapsis_argument,
            0.5 + delta / 2.0,
            epsilon = 1e-12
        );

        let forward = table(AngleInterpolation::Forward).parameters_at_ut(half_day);
        assert_abs_diff_eq!(forward.periapsis_argument, 0.5 + 5.5 / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn mean_anomaly_is_continuous_across_entries() {
        let table = BTreeMap::from([
            (0, entry(MOON_SMA, 0.4, 0.3)),
            (1, entry(MOON_SMA * 1.01, 0.4, 0.9)),
            (2, entry(MOON_SMA * 1.02, 0.4, 1.4)),
        ]);
        let orbit =
            EphemerisOrbit::from_table(table, EARTH_MASS, AngleInterpolation::Shortest).unwrap();

        let left = UniversalTime::new_seconds(SECONDS_PER_DAY - 1.0);
        let right = UniversalTime::new_seconds(SECONDS_PER_DAY + 1.0);
        let ma_left = orbit.orbit_at_ut(left).mean_anomaly_at_ut(left);
        let ma_right = orbit.orbit_at_ut(right).mean_anomaly_at_ut(right);
        let gap = (ma_right - ma_left).rem_euclid(consts::TAU);
        // two seconds of lunar mean motion is ~5e-6 rad
        assert_abs_diff_eq!(gap, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn long_gaps_propagate_through_whole_revolutions() {
        // 100-day gap, ~27-day period: the anomaly must advance by
        // roughly 3.7 revolutions, not take a shortest path
        let table = BTreeMap::from([
            (0, entry(MOON_SMA, 0.4, 0.0)),
            (100, entry(MOON_SMA, 0.4, 0.0)),
        ]);
        let orbit =
            EphemerisOrbit::from_table(table, EARTH_MASS, AngleInterpolation::Shortest).unwrap();

        let mu = super::GRAVITATIONAL_CONSTANT * EARTH_MASS;
        let n = libm::sqrt(mu / (MOON_SMA * MOON_SMA * MOON_SMA));
        let t = UniversalTime::new_seconds(50.0 * SECONDS_PER_DAY);
        let inner = orbit.orbit_at_ut(t);
        let expected = (n * 50.0 * SECONDS_PER_DAY).rem_euclid(consts::TAU);
        assert_abs_diff_eq!(
            inner.mean_anomaly_at_ut(t).rem_euclid(consts::TAU),
            expected,
            epsilon = 1e-4
        );
    }
}
