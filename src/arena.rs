use std::{
    fmt,
    ops::{Index, IndexMut},
};

use serde::{Deserialize, Serialize};

/// Index of a body node inside its owning [`Arena`].
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BodyId(usize);

impl BodyId {
    pub fn into_raw(self) -> usize {
        self.0
    }

    pub fn from_raw(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Debug for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BodyId({})", self.0)
    }
}

/// Append-only node store addressed by [`BodyId`].
///
/// Insertion order is the iteration order, which keeps naming and
/// serialization deterministic.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Arena<T> {
    inner: Vec<T>,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self { inner: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn push(&mut self, x: T) -> BodyId {
        let id = BodyId(self.inner.len());
        self.inner.push(x);
        id
    }

    pub fn get(&self, id: BodyId) -> Option<&T> {
        self.inner.get(id.0)
    }

    pub fn get_mut(&mut self, id: BodyId) -> Option<&mut T> {
        self.inner.get_mut(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (BodyId, &T)> {
        self.inner.iter().enumerate().map(|(i, v)| (BodyId(i), v))
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<BodyId> for Arena<T> {
    type Output = T;

    fn index(&self, index: BodyId) -> &Self::Output {
        &self.inner[index.0]
    }
}

impl<T> IndexMut<BodyId> for Arena<T> {
    fn index_mut(&mut self, index: BodyId) -> &mut Self::Output {
        &mut self.inner[index.0]
    }
}
