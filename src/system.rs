//! The owning system: body tree, name/kind indices, naming
//! conventions and position resolution.

use std::{cmp, collections::HashMap, path::PathBuf};

use itertools::Itertools;
use nalgebra::Vector3;
use ordered_float::OrderedFloat;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    arena::{Arena, BodyId},
    bodies::{BodyKind, BodyOrbit, BodyRecord, Orbitable, SystemRecord},
    kepler::{
        ephemeris::{AngleInterpolation, EphemerisError, EphemerisOrbit},
        orbits::{Orbit, OrbitError},
    },
    time::UniversalTime,
};

#[derive(Debug, Error)]
pub enum SystemError {
    #[error("system `{0}` has no root body")]
    EmptyRoot(String),
    #[error("orbit for body `{name}`: {source}")]
    Orbit {
        name: String,
        #[source]
        source: OrbitError,
    },
    #[error("ephemeris for body `{name}`: {source}")]
    Ephemeris {
        name: String,
        #[source]
        source: EphemerisError,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Non-fatal oddity found while parsing a system description.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Diagnostic {
    #[error("duplicate body name `{0}`; keeping the first occurrence")]
    DuplicateName(String),
    #[error("system `{0}` has {1} extra root candidate(s); keeping the first")]
    MultipleRootCandidates(String, usize),
}

/// A hierarchical system of orbiting bodies.
///
/// Owns every node through the arena; destroying the system destroys
/// the whole tree. Name lookups go through incrementally maintained
/// index maps, one per kind family.
#[derive(Debug)]
pub struct OrbitalSystem {
    name: String,
    declination_tilt: f64,
    arena: Arena<Orbitable>,
    root: BodyId,
    name_index: HashMap<String, BodyId>,
    binary_index: HashMap<String, BodyId>,
    celestial_index: HashMap<String, BodyId>,
    star_index: HashMap<String, BodyId>,
    planet_index: HashMap<String, BodyId>,
    first_class_index: HashMap<String, BodyId>,
    satellite_index: HashMap<String, BodyId>,
}

impl OrbitalSystem {
    pub fn new(name: impl Into<String>, declination_tilt: f64, root: Orbitable) -> Self {
        let mut system = Self {
            name: name.into(),
            declination_tilt,
            arena: Arena::new(),
            root: BodyId::from_raw(0),
            name_index: HashMap::new(),
            binary_index: HashMap::new(),
            celestial_index: HashMap::new(),
            star_index: HashMap::new(),
            planet_index: HashMap::new(),
            first_class_index: HashMap::new(),
            satellite_index: HashMap::new(),
        };
        let mut root = root;
        root.parent = None;
        let root_id = system.arena.push(root);
        system.root = root_id;
        system.index_body(root_id);
        system
    }

    /// Insert `body` under `parent`, updating every index map.
    pub fn add_child(&mut self, parent: BodyId, mut body: Orbitable) -> BodyId {
        body.parent = Some(parent);
        let id = self.arena.push(body);
        self.arena[parent].children.push(id);
        self.index_body(id);
        id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declination_tilt(&self) -> f64 {
        self.declination_tilt
    }

    pub fn root(&self) -> BodyId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn body(&self, id: BodyId) -> &Orbitable {
        &self.arena[id]
    }

    pub(crate) fn body_mut(&mut self, id: BodyId) -> &mut Orbitable {
        &mut self.arena[id]
    }

    // -- lookups ------------------------------------------------------

    pub fn lookup(&self, name: &str) -> Option<BodyId> {
        self.name_index.get(name).copied()
    }

    pub fn lookup_binary(&self, name: &str) -> Option<BodyId> {
        self.binary_index.get(name).copied()
    }

    pub fn lookup_celestial_body(&self, name: &str) -> Option<BodyId> {
        self.celestial_index.get(name).copied()
    }

    pub fn lookup_star(&self, name: &str) -> Option<BodyId> {
        self.star_index.get(name).copied()
    }

    pub fn lookup_planet(&self, name: &str) -> Option<BodyId> {
        self.planet_index.get(name).copied()
    }

    pub fn lookup_first_class_planet(&self, name: &str) -> Option<BodyId> {
        self.first_class_index.get(name).copied()
    }

    pub fn lookup_satellite(&self, name: &str) -> Option<BodyId> {
        self.satellite_index.get(name).copied()
    }

    // -- enumerations (arena order, deterministic) --------------------

    pub fn ids(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.arena.iter().map(|(id, _)| id)
    }

    pub fn binaries(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.of_kind(BodyKind::Binary)
    }

    pub fn stars(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.of_kind(BodyKind::Star)
    }

    pub fn planets(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.of_kind(BodyKind::Planet)
    }

    pub fn celestial_bodies(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.arena
            .iter()
            .filter(|(_, b)| b.kind != BodyKind::Binary)
            .map(|(id, _)| id)
    }

    pub fn first_class_planets(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.planets()
            .filter(|&id| !self.is_satellite(id))
            .collect_vec()
            .into_iter()
    }

    pub fn satellites(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.planets()
            .filter(|&id| self.is_satellite(id))
            .collect_vec()
            .into_iter()
    }

    pub fn all_names(&self) -> Vec<&str> {
        self.ids().map(|id| self.arena[id].name.as_str()).collect()
    }

    pub fn binary_names(&self) -> Vec<&str> {
        self.binaries().map(|id| self.arena[id].name.as_str()).collect()
    }

    pub fn star_names(&self) -> Vec<&str> {
        self.stars().map(|id| self.arena[id].name.as_str()).collect()
    }

    pub fn planet_names(&self) -> Vec<&str> {
        self.planets().map(|id| self.arena[id].name.as_str()).collect()
    }

    pub fn celestial_body_names(&self) -> Vec<&str> {
        self.celestial_bodies()
            .map(|id| self.arena[id].name.as_str())
            .collect()
    }

    pub fn first_class_planet_names(&self) -> Vec<&str> {
        self.first_class_planets()
            .map(|id| self.arena[id].name.as_str())
            .collect()
    }

    pub fn satellite_names(&self) -> Vec<&str> {
        self.satellites()
            .map(|id| self.arena[id].name.as_str())
            .collect()
    }

    fn of_kind(&self, kind: BodyKind) -> impl Iterator<Item = BodyId> + '_ {
        self.arena
            .iter()
            .filter(move |(_, b)| b.kind == kind)
            .map(|(id, _)| id)
    }

    fn is_satellite(&self, id: BodyId) -> bool {
        self.arena[id]
            .parent
            .is_some_and(|p| self.arena[p].kind == BodyKind::Planet)
    }

    // -- position resolution ------------------------------------------

    /// The body's position in its parent's frame; zero without an orbit.
    pub fn relative_to_parent_at_ut(&self, id: BodyId, ut: UniversalTime) -> Vector3<f64> {
        self.arena[id]
            .orbit
            .as_ref()
            .map_or_else(Vector3::zeros, |orbit| orbit.position_at_ut(ut))
    }

    /// Position in the system's absolute frame, summed along the
    /// ancestor chain up to the root.
    pub fn absolute_position_at_ut(&self, id: BodyId, ut: UniversalTime) -> Vector3<f64> {
        let mut position = self.relative_to_parent_at_ut(id, ut);
        let mut current = self.arena[id].parent;
        while let Some(ancestor) = current {
            position += self.relative_to_parent_at_ut(ancestor, ut);
            current = self.arena[ancestor].parent;
        }
        position
    }

    /// Displacement from `from` to `to` at `ut`.
    ///
    /// Walks both ancestor chains from the root end inward to the
    /// deepest common ancestor and sums only the terms below it:
    /// shared ancestors cancel exactly instead of being materialized
    /// as near-equal absolute coordinates and subtracted.
    pub fn relative_position_at_ut(
        &self,
        from: BodyId,
        to: BodyId,
        ut: UniversalTime,
    ) -> Vector3<f64> {
        let from_chain = self.ancestor_chain(from, ut);
        let to_chain = self.ancestor_chain(to, ut);

        let mut common = 0;
        while common < from_chain.len()
            && common < to_chain.len()
            && from_chain[from_chain.len() - 1 - common].0 == to_chain[to_chain.len() - 1 - common].0
        {
            common += 1;
        }
        if common == 0 {
            // disconnected trees should not happen in a well-formed system
            warn!(?from, ?to, "no common ancestor, falling back to absolute positions");
            return self.absolute_position_at_ut(to, ut) - self.absolute_position_at_ut(from, ut);
        }

        let sum = |chain: &[(BodyId, Vector3<f64>)]| {
            chain[..chain.len() - common]
                .iter()
                .fold(Vector3::zeros(), |acc, &(_, rel)| acc + rel)
        };
        sum(&to_chain) - sum(&from_chain)
    }

    /// The node and each of its ancestors up to the root, paired with
    /// their orbit-relative positions at `ut`.
    fn ancestor_chain(&self, id: BodyId, ut: UniversalTime) -> Vec<(BodyId, Vector3<f64>)> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            chain.push((node, self.relative_to_parent_at_ut(node, ut)));
            current = self.arena[node].parent;
        }
        chain
    }

    // -- naming -------------------------------------------------------

    /// Assign the deterministic names every record-unnamed body gets,
    /// in the fixed order stars, binaries, planets.
    pub fn assign_names(&mut self) {
        self.assign_star_names();
        self.assign_binary_names();
        self.assign_planet_names();
    }

    /// Stars by descending mass: `<system> A`, `<system> B`, ...
    fn assign_star_names(&mut self) {
        let unnamed = self
            .stars()
            .filter(|&id| self.arena[id].name.is_empty())
            .sorted_by_key(|&id| cmp::Reverse(OrderedFloat(self.arena[id].mass)))
            .collect_vec();
        let base = self.name.clone();
        let mut index = 0;
        for id in unnamed {
            let name = self.free_label(&base, &mut index, true);
            self.set_name(id, name);
        }
    }

    /// Binaries merge their two children's names at the first point of
    /// alphabetic divergence, deepest binaries first so nested pairs
    /// see named children.
    fn assign_binary_names(&mut self) {
        for id in self.post_order() {
            let node = &self.arena[id];
            if node.kind != BodyKind::Binary || !node.name.is_empty() {
                continue;
            }
            let children = node
                .children
                .iter()
                .map(|&c| self.arena[c].name.clone())
                .filter(|n| !n.is_empty())
                .sorted()
                .collect_vec();
            let mut name = match children.as_slice() {
                [a, b, ..] => merge_names(a, b),
                [a] => format!("{a} barycenter"),
                [] => format!("{} barycenter", self.name),
            };
            if self.name_index.contains_key(&name) {
                warn!(%name, "merged binary name collides, appending marker");
                name.push_str(" system");
            }
            self.set_name(id, name);
        }
    }

    /// Planets by ascending semi-major axis within their parent:
    /// `<system> b`, `<system> c`, ... for first-class planets,
    /// `<parent> a`, `<parent> b`, ... for satellites.
    fn assign_planet_names(&mut self) {
        for parent in self.ids().collect_vec() {
            let unnamed = self.arena[parent]
                .children
                .iter()
                .copied()
                .filter(|&c| {
                    self.arena[c].kind == BodyKind::Planet && self.arena[c].name.is_empty()
                })
                .sorted_by_key(|&c| {
                    OrderedFloat(
                        self.arena[c]
                            .orbit
                            .as_ref()
                            .map_or(f64::INFINITY, BodyOrbit::semi_major_axis_at_epoch),
                    )
                })
                .collect_vec();
            if unnamed.is_empty() {
                continue;
            }
            let satellite = self.arena[parent].kind == BodyKind::Planet;
            let base = if satellite {
                self.arena[parent].name.clone()
            } else {
                self.name.clone()
            };
            // the parent star is the implicit `a` of its own system
            let mut index = usize::from(!satellite);
            for id in unnamed {
                let name = self.free_label_lower(&base, &mut index);
                self.set_name(id, name);
            }
        }
    }

    fn free_label(&self, base: &str, index: &mut usize, uppercase: bool) -> String {
        loop {
            let candidate = format!("{base} {}", alpha_label(*index, uppercase));
            *index += 1;
            if !self.name_index.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn free_label_lower(&self, base: &str, index: &mut usize) -> String {
        self.free_label(base, index, false)
    }

    fn post_order(&self) -> Vec<BodyId> {
        let mut order = Vec::with_capacity(self.arena.len());
        let mut stack = vec![(self.root, false)];
        while let Some((id, visited)) = stack.pop() {
            if visited {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            for &child in &self.arena[id].children {
                stack.push((child, false));
            }
        }
        order
    }

    fn set_name(&mut self, id: BodyId, name: String) {
        let old = std::mem::replace(&mut self.arena[id].name, name);
        if !old.is_empty() {
            for index in [
                &mut self.name_index,
                &mut self.binary_index,
                &mut self.celestial_index,
                &mut self.star_index,
                &mut self.planet_index,
                &mut self.first_class_index,
                &mut self.satellite_index,
            ] {
                if index.get(&old) == Some(&id) {
                    index.remove(&old);
                }
            }
        }
        self.index_body(id);
    }

    /// Incrementally index one node into every map its kind belongs
    /// to. The first holder of a name wins.
    fn index_body(&mut self, id: BodyId) {
        let name = self.arena[id].name.clone();
        if name.is_empty() {
            return;
        }
        if let Some(&existing) = self.name_index.get(&name) {
            if existing != id {
                warn!(%name, "duplicate body name, keeping the first occurrence");
                return;
            }
        }
        self.name_index.insert(name.clone(), id);
        match self.arena[id].kind {
            BodyKind::Binary => {
                self.binary_index.insert(name, id);
            }
            BodyKind::Star => {
                self.celestial_index.insert(name.clone(), id);
                self.star_index.insert(name, id);
            }
            BodyKind::Planet => {
                self.celestial_index.insert(name.clone(), id);
                self.planet_index.insert(name.clone(), id);
                if self.is_satellite(id) {
                    self.satellite_index.insert(name, id);
                } else {
                    self.first_class_index.insert(name, id);
                }
            }
        }
    }

    // -- serialization ------------------------------------------------

    pub fn record(&self) -> SystemRecord {
        let mut record = SystemRecord {
            name: self.name.clone(),
            declination_tilt: self.declination_tilt,
            ..SystemRecord::default()
        };
        let root_record = self.body_record(self.root);
        match self.arena[self.root].kind {
            BodyKind::Binary => record.binaries.push(root_record),
            BodyKind::Star => record.stars.push(root_record),
            BodyKind::Planet => record.planets.push(root_record),
        }
        record
    }

    /// The inverse serialization; orbits loaded from ephemeris tables
    /// are omitted, they are re-derived from their CSV files.
    pub fn json_representation(&self) -> serde_json::Value {
        serde_json::to_value(self.record()).unwrap_or(serde_json::Value::Null)
    }

    /// The serialized form of one body subtree as a JSON value.
    pub fn body_json_representation(&self, id: BodyId) -> serde_json::Value {
        serde_json::to_value(self.body_record(id)).unwrap_or(serde_json::Value::Null)
    }

    pub fn body_record(&self, id: BodyId) -> BodyRecord {
        let body = &self.arena[id];
        let mut record = BodyRecord {
            name: Some(body.name.clone()),
            mass: (body.mass > 0.0).then_some(body.mass),
            radius: (body.radius > 0.0).then_some(body.radius),
            sidereal_rotation_period: body
                .sidereal_rotation_period
                .is_finite()
                .then_some(body.sidereal_rotation_period),
            rotation_at_epoch: (body.rotation_at_epoch != 0.0).then_some(body.rotation_at_epoch),
            orbit: body.orbit.as_ref().and_then(BodyOrbit::record),
            periapsis_interpolation: match &body.orbit {
                Some(BodyOrbit::Ephemeris(ephemeris))
                    if ephemeris.periapsis_interpolation() != AngleInterpolation::default() =>
                {
                    Some(ephemeris.periapsis_interpolation())
                }
                _ => None,
            },
            ..BodyRecord::default()
        };
        for &child in &body.children {
            let child_record = self.body_record(child);
            match self.arena[child].kind {
                BodyKind::Binary => record.binaries.push(child_record),
                BodyKind::Star => record.stars.push(child_record),
                BodyKind::Planet => record.planets.push(child_record),
            }
        }
        record
    }
}

/// Merge two sibling names at their first point of alphabetic
/// divergence: `Test A` + `Test B` becomes `Test AB`.
fn merge_names(a: &str, b: &str) -> String {
    let common = a
        .char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map_or(a.len().min(b.len()), |((i, _), _)| i);
    format!("{a}{}", &b[common..])
}

/// Bijective base-26 label: `A..Z, AA, AB, ...`
fn alpha_label(mut index: usize, uppercase: bool) -> String {
    let base = if uppercase { b'A' } else { b'a' };
    let mut letters = Vec::new();
    loop {
        letters.push(char::from(base + (index % 26) as u8));
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.iter().rev().collect()
}

/// Result of parsing a system description: the system plus any
/// non-fatal diagnostics found along the way.
#[derive(Debug)]
pub struct LoadedSystem {
    pub system: OrbitalSystem,
    pub diagnostics: Vec<Diagnostic>,
}

/// Builds an [`OrbitalSystem`] from its serialized description,
/// resolving ephemeris directories and reporting progress through an
/// explicit callback instead of global state.
#[derive(Default)]
pub struct SystemLoader<'a> {
    ephemerides_dir: Option<PathBuf>,
    progress: Option<Box<dyn FnMut(usize, usize) + 'a>>,
}

impl<'a> SystemLoader<'a> {
    pub fn new() -> Self {
        Self {
            ephemerides_dir: None,
            progress: None,
        }
    }

    /// Bodies whose name matches a subdirectory get their orbit from
    /// the CSV tables inside it instead of their serialized record.
    #[must_use]
    pub fn ephemerides_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ephemerides_dir = Some(dir.into());
        self
    }

    /// Called with `(bodies built, total)` after each body.
    #[must_use]
    pub fn on_progress(mut self, callback: impl FnMut(usize, usize) + 'a) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn load_json(self, json: &str) -> Result<LoadedSystem, SystemError> {
        let record: SystemRecord = serde_json::from_str(json)?;
        self.load(&record)
    }

    pub fn load(mut self, record: &SystemRecord) -> Result<LoadedSystem, SystemError> {
        let mut diagnostics = Vec::new();

        let candidates = record
            .binaries
            .iter()
            .map(|r| (BodyKind::Binary, r))
            .chain(record.stars.iter().map(|r| (BodyKind::Star, r)))
            .chain(record.planets.iter().map(|r| (BodyKind::Planet, r)))
            .collect_vec();
        let Some(&(root_kind, root_record)) = candidates.first() else {
            return Err(SystemError::EmptyRoot(record.name.clone()));
        };
        if candidates.len() > 1 {
            warn!(
                system = %record.name,
                extra = candidates.len() - 1,
                "multiple root candidates, keeping the first"
            );
            diagnostics.push(Diagnostic::MultipleRootCandidates(
                record.name.clone(),
                candidates.len() - 1,
            ));
        }

        let total = count_bodies(root_record);
        let mut done = 0;

        let root_body = self.build_orbitable(root_kind, root_record, None)?;
        let mut system =
            OrbitalSystem::new(record.name.as_str(), record.declination_tilt, root_body);
        done += 1;
        self.report(done, total);

        let root_id = system.root();
        self.build_children(&mut system, root_id, root_record, &mut diagnostics, &mut done, total)?;
        if root_kind == BodyKind::Binary && root_record.mass.is_none() {
            let sum = children_mass(&system, root_id);
            system.body_mut(root_id).mass = sum;
        }

        system.assign_names();
        info!(system = system.name(), bodies = system.len(), "loaded orbital system");
        Ok(LoadedSystem {
            system,
            diagnostics,
        })
    }

    fn build_children(
        &mut self,
        system: &mut OrbitalSystem,
        parent_id: BodyId,
        record: &BodyRecord,
        diagnostics: &mut Vec<Diagnostic>,
        done: &mut usize,
        total: usize,
    ) -> Result<(), SystemError> {
        let groups = [
            (BodyKind::Binary, &record.binaries),
            (BodyKind::Star, &record.stars),
            (BodyKind::Planet, &record.planets),
        ];
        for (kind, children) in groups {
            for child in children {
                let parent_mass = {
                    let mass = system.body(parent_id).mass;
                    (mass > 0.0).then_some(mass)
                };
                let body = self.build_orbitable(kind, child, parent_mass)?;
                if let Some(name) = &child.name {
                    if system.lookup(name).is_some() {
                        diagnostics.push(Diagnostic::DuplicateName(name.clone()));
                    }
                }
                let id = system.add_child(parent_id, body);
                *done += 1;
                self.report(*done, total);
                self.build_children(system, id, child, diagnostics, done, total)?;
                if kind == BodyKind::Binary && child.mass.is_none() {
                    let sum = children_mass(system, id);
                    system.body_mut(id).mass = sum;
                }
            }
        }
        Ok(())
    }

    fn build_orbitable(
        &self,
        kind: BodyKind,
        record: &BodyRecord,
        parent_mass: Option<f64>,
    ) -> Result<Orbitable, SystemError> {
        let name = record.name.clone().unwrap_or_default();
        let mut body = Orbitable::new(kind, name.clone());
        body.mass = record.mass.unwrap_or(0.0);
        body.radius = record.radius.unwrap_or(0.0);
        body.sidereal_rotation_period =
            record.sidereal_rotation_period.unwrap_or(f64::INFINITY);
        body.rotation_at_epoch = record.rotation_at_epoch.unwrap_or(0.0);

        let display = if name.is_empty() {
            "<unnamed>".to_owned()
        } else {
            name.clone()
        };
        if let Some(dir) = &self.ephemerides_dir {
            if !name.is_empty() && dir.join(&name).is_dir() {
                let mass = parent_mass.ok_or_else(|| SystemError::Ephemeris {
                    name: display.clone(),
                    source: EphemerisError::InvalidMass(0.0),
                })?;
                let ephemeris = EphemerisOrbit::load(
                    dir,
                    &name,
                    mass,
                    record.periapsis_interpolation.unwrap_or_default(),
                )
                .map_err(|source| SystemError::Ephemeris {
                    name: display,
                    source,
                })?;
                body.orbit = Some(BodyOrbit::Ephemeris(ephemeris));
                return Ok(body);
            }
        }
        if let Some(orbit_record) = &record.orbit {
            let orbit = Orbit::from_record(orbit_record, parent_mass)
                .map_err(|source| SystemError::Orbit {
                    name: display,
                    source,
                })?;
            body.orbit = Some(BodyOrbit::Fixed(orbit));
        }
        Ok(body)
    }

    fn report(&mut self, done: usize, total: usize) {
        if let Some(callback) = &mut self.progress {
            callback(done, total);
        }
    }
}

fn children_mass(system: &OrbitalSystem, id: BodyId) -> f64 {
    system
        .body(id)
        .children
        .iter()
        .map(|&child| system.body(child).mass)
        .sum()
}

fn count_bodies(record: &BodyRecord) -> usize {
    1 + record
        .binaries
        .iter()
        .chain(&record.stars)
        .chain(&record.planets)
        .map(count_bodies)
        .sum::<usize>()
}
