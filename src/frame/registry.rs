//! Scene registry
//!
//! Scenes are registered once and addressed by [`SceneId`]. At most one is
//! active; activating another hands the previous id back to the caller,
//! which owns unloading its GPU state.

use std::collections::BTreeMap;

use crate::core::error::Error;
use crate::core::types::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneId(u32);

impl SceneId {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SceneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scene#{}", self.0)
    }
}

/// Outcome of [`SceneRegistry::activate`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    /// The scene was already active
    Unchanged,
    /// The scene became active; the previously active scene, if any, must
    /// be unloaded
    Replaced(Option<SceneId>),
}

pub struct SceneRegistry<T> {
    scenes: BTreeMap<SceneId, T>,
    next_id: u32,
    active: Option<SceneId>,
}

impl<T> Default for SceneRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SceneRegistry<T> {
    pub fn new() -> Self {
        Self {
            scenes: BTreeMap::new(),
            next_id: 0,
            active: None,
        }
    }

    pub fn register(&mut self, scene: T) -> SceneId {
        let id = SceneId(self.next_id);
        self.next_id += 1;
        self.scenes.insert(id, scene);
        id
    }

    /// Remove a scene; an active scene is deactivated first
    pub fn remove(&mut self, id: SceneId) -> Option<T> {
        if self.active == Some(id) {
            self.active = None;
        }
        self.scenes.remove(&id)
    }

    pub fn activate(&mut self, id: SceneId) -> Result<Activation> {
        if !self.scenes.contains_key(&id) {
            return Err(Error::Scene(format!("{id} is not registered")));
        }
        if self.active == Some(id) {
            return Ok(Activation::Unchanged);
        }
        Ok(Activation::Replaced(self.active.replace(id)))
    }

    /// Returns the scene that was active
    pub fn deactivate(&mut self) -> Option<SceneId> {
        self.active.take()
    }

    pub fn active_id(&self) -> Option<SceneId> {
        self.active
    }

    pub fn active(&self) -> Option<(SceneId, &T)> {
        let id = self.active?;
        self.scenes.get(&id).map(|scene| (id, scene))
    }

    pub fn get(&self, id: SceneId) -> Option<&T> {
        self.scenes.get(&id)
    }

    pub fn get_mut(&mut self, id: SceneId) -> Option<&mut T> {
        self.scenes.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = SceneId> + '_ {
        self.scenes.keys().copied()
    }
}
