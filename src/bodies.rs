//! Definitions of celestial bodies.

use std::f64::consts;

use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::{
    arena::BodyId,
    kepler::ephemeris::{AngleInterpolation, EphemerisOrbit},
    kepler::orbits::{Orbit, OrbitRecord},
    time::UniversalTime,
};

/// Mass of the Sun (kg).
pub const SOLAR_MASS: f64 = 1.9891e30;

/// The closed set of body kinds a system tree may contain.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyKind {
    Binary,
    Star,
    Planet,
}

/// What moves a body relative to its parent's frame.
#[derive(Clone, Debug)]
pub enum BodyOrbit {
    /// Fixed Keplerian elements.
    Fixed(Orbit),
    /// Elements interpolated from an ephemeris table.
    Ephemeris(EphemerisOrbit),
}

impl BodyOrbit {
    pub fn position_at_ut(&self, ut: UniversalTime) -> Vector3<f64> {
        match self {
            BodyOrbit::Fixed(orbit) => orbit.position_at_ut(ut),
            BodyOrbit::Ephemeris(ephemeris) => ephemeris.position_at_ut(ut),
        }
    }

    pub fn north_at_ut(&self, ut: UniversalTime) -> Vector3<f64> {
        match self {
            BodyOrbit::Fixed(orbit) => orbit.north(),
            BodyOrbit::Ephemeris(ephemeris) => ephemeris.orbit_at_ut(ut).north(),
        }
    }

    pub fn plane_orientation_at_ut(&self, ut: UniversalTime) -> Rotation3<f64> {
        match self {
            BodyOrbit::Fixed(orbit) => orbit.plane_orientation(),
            BodyOrbit::Ephemeris(ephemeris) => ephemeris.orbit_at_ut(ut).plane_orientation(),
        }
    }

    /// Semi-major axis used for ordering planets; for ephemeris orbits
    /// the table is sampled at the epoch.
    pub fn semi_major_axis_at_epoch(&self) -> f64 {
        match self {
            BodyOrbit::Fixed(orbit) => orbit.parameters().semi_major_axis,
            BodyOrbit::Ephemeris(ephemeris) => {
                ephemeris.parameters_at_ut(UniversalTime::EPOCH).semi_major_axis
            }
        }
    }

    /// Serialized form. Ephemeris orbits are re-derived from their CSV
    /// tables, not persisted, so they serialize to nothing.
    pub fn record(&self) -> Option<OrbitRecord> {
        match self {
            BodyOrbit::Fixed(orbit) => Some(orbit.to_record()),
            BodyOrbit::Ephemeris(_) => None,
        }
    }
}

/// A node of the hierarchical body tree.
///
/// The orbit, when present, describes motion relative to the parent's
/// reference frame; the root's orbit (if any) is relative to the
/// system's absolute frame.
#[derive(Clone, Debug)]
pub struct Orbitable {
    pub name: String,
    pub kind: BodyKind,
    /// Mass (kg). Drives star naming and the orbits of children.
    pub mass: f64,
    /// Mean radius (m).
    pub radius: f64,
    /// Length of the sidereal day (s); infinite when the body does
    /// not rotate (or no rotation data exists).
    pub sidereal_rotation_period: f64,
    /// Rotation about the spin axis at the epoch (rad).
    pub rotation_at_epoch: f64,
    pub orbit: Option<BodyOrbit>,
    /// `None` only for the system root.
    pub parent: Option<BodyId>,
    pub children: Vec<BodyId>,
}

impl Orbitable {
    pub fn new(kind: BodyKind, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            mass: 0.0,
            radius: 0.0,
            sidereal_rotation_period: f64::INFINITY,
            rotation_at_epoch: 0.0,
            orbit: None,
            parent: None,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_mass(mut self, mass: f64) -> Self {
        self.mass = mass;
        self
    }

    #[must_use]
    pub fn with_orbit(mut self, orbit: BodyOrbit) -> Self {
        self.orbit = Some(orbit);
        self
    }

    /// Spin angle at `ut` (rad), reduced in fixed point so large times
    /// keep full phase accuracy.
    pub fn rotation_angle_at_ut(&self, ut: UniversalTime) -> f64 {
        if !self.sidereal_rotation_period.is_finite() || self.sidereal_rotation_period <= 0.0 {
            return self.rotation_at_epoch;
        }
        let phase = ut.rem_euclid_seconds(self.sidereal_rotation_period)
            / self.sidereal_rotation_period;
        (self.rotation_at_epoch + consts::TAU * phase).rem_euclid(consts::TAU)
    }

    /// Renderer-facing attitude: the orbital-plane orientation (when
    /// an orbit exists) composed with the spin about the body's axis.
    pub fn rotation_at_ut(&self, ut: UniversalTime) -> Rotation3<f64> {
        let frame = self
            .orbit
            .as_ref()
            .map_or_else(Rotation3::identity, |orbit| orbit.plane_orientation_at_ut(ut));
        frame
            * Rotation3::from_axis_angle(&Vector3::z_axis(), self.rotation_angle_at_ut(ut))
    }
}

/// Serialized body node: physical fields, an optional orbit and the
/// child arrays, keyed by kind.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BodyRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mass: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sidereal_rotation_period: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_at_epoch: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orbit: Option<OrbitRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub periapsis_interpolation: Option<AngleInterpolation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub binaries: Vec<BodyRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stars: Vec<BodyRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planets: Vec<BodyRecord>,
}

/// Serialized system: the base name, declination tilt and the root
/// body arrays.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemRecord {
    pub name: String,
    pub declination_tilt: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub binaries: Vec<BodyRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stars: Vec<BodyRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planets: Vec<BodyRecord>,
}
