//! Position smoothing for entities driven by inbound snapshots.
//!
//! Updates arrive at network cadence; between them each entity moves linearly
//! from where it was displayed when the update arrived towards the reported
//! position, reaching it after one interpolation window.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::geometry::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RemoteEntity {
    /// Displayed position
    pub position: Vec3,
    pub target_position: Vec3,
    /// Displayed position when the latest update arrived
    pub last_position: Vec3,
    /// Reported velocity, carried for consumers; not used for extrapolation
    pub velocity: Vec3,
    /// Seconds since the latest update
    pub interpolation_time: f32,
}

impl RemoteEntity {
    fn at(position: Vec3) -> Self {
        Self {
            position,
            target_position: position,
            last_position: position,
            ..Default::default()
        }
    }

    fn advance(&mut self, delta_seconds: f32, window_seconds: f32) {
        self.interpolation_time += delta_seconds.max(0.0);
        let t = if window_seconds > 0.0 {
            (self.interpolation_time / window_seconds).clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.position = if t >= 1.0 {
            self.target_position
        } else {
            self.last_position.lerp(self.target_position, t)
        };
    }
}

/// Per-entity interpolation state keyed by the entity's opaque id
#[derive(Debug)]
pub struct Interpolator {
    window: Duration,
    entities: Mutex<HashMap<String, RemoteEntity>>,
}

impl Interpolator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entities: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Start tracking an entity at rest; replaces any previous state
    pub fn insert(&self, id: &str, position: Vec3) {
        self.lock().insert(id.to_string(), RemoteEntity::at(position));
    }

    pub fn remove(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Record a fresh inbound position.
    ///
    /// Movement restarts from the currently displayed position, so an update
    /// arriving mid-window never snaps the entity. Returns `false` for an
    /// unknown id.
    pub fn update(&self, id: &str, target: Vec3, velocity: Vec3) -> bool {
        let mut entities = self.lock();
        let Some(entity) = entities.get_mut(id) else {
            debug!("Update for untracked entity {}", id);
            return false;
        };
        entity.last_position = entity.position;
        entity.target_position = target;
        entity.velocity = velocity;
        entity.interpolation_time = 0.0;
        true
    }

    /// Advance every entity by `delta_seconds`
    pub fn tick(&self, delta_seconds: f32) {
        let window = self.window.as_secs_f32();
        for entity in self.lock().values_mut() {
            entity.advance(delta_seconds, window);
        }
    }

    pub fn position(&self, id: &str) -> Option<Vec3> {
        self.lock().get(id).map(|e| e.position)
    }

    pub fn entity(&self, id: &str) -> Option<RemoteEntity> {
        self.lock().get(id).copied()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RemoteEntity>> {
        self.entities.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
