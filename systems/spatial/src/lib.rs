#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Spatial indices used by the population engine.
//!
//! [`Quadtree`] is a loose quadtree over the XY plane shared by the marker
//! registry and the blackout index. [`BlackOutZones`] stores the spheres that
//! suppress spawning, optionally scoped to a mission.

use std::collections::BTreeMap;

use glam::Vec3;
use population_core::{Aabb, BlackOutId, PrototypeId, Sphere};

mod quadtree;

pub use quadtree::{Quadtree, QuadtreeConfig};

/// Sphere suppressing spawns, optionally scoped to one mission.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlackOutZone {
    /// Identifier of the zone.
    pub id: BlackOutId,
    /// Suppressed volume.
    pub sphere: Sphere,
    /// Mission the zone belongs to.
    pub mission: Option<PrototypeId>,
}

/// Index of every blackout zone in a region.
#[derive(Clone, Debug)]
pub struct BlackOutZones {
    zones: BTreeMap<BlackOutId, BlackOutZone>,
    tree: Quadtree<BlackOutId>,
    next_id: u64,
}

impl BlackOutZones {
    /// Creates an empty index covering `bounds`.
    #[must_use]
    pub fn new(bounds: Aabb, config: QuadtreeConfig) -> Self {
        Self {
            zones: BTreeMap::new(),
            tree: Quadtree::new(bounds, config),
            next_id: 1,
        }
    }

    /// Registers a zone. Returns `None` when the zone lies outside the region.
    pub fn add(
        &mut self,
        position: Vec3,
        radius: f32,
        mission: Option<PrototypeId>,
    ) -> Option<BlackOutId> {
        let id = BlackOutId::new(self.next_id);
        let sphere = Sphere::new(position, radius);
        if !self.tree.insert(id, sphere.aabb()) {
            return None;
        }
        self.next_id += 1;
        let _ = self.zones.insert(
            id,
            BlackOutZone {
                id,
                sphere,
                mission,
            },
        );
        log::debug!("blackout zone {id} added at {position} with radius {radius}");
        Some(id)
    }

    /// Removes a zone.
    pub fn remove(&mut self, id: BlackOutId) -> Option<BlackOutZone> {
        let zone = self.zones.remove(&id)?;
        let _ = self.tree.remove(id);
        Some(zone)
    }

    /// Looks up a zone.
    #[must_use]
    pub fn get(&self, id: BlackOutId) -> Option<&BlackOutZone> {
        self.zones.get(&id)
    }

    /// Number of registered zones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Reports whether no zone is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Iterates every zone in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &BlackOutZone> {
        self.zones.values()
    }

    /// Zones whose sphere overlaps `sphere`, in identifier order.
    #[must_use]
    pub fn zones_overlapping(&self, sphere: &Sphere) -> Vec<&BlackOutZone> {
        let mut candidates = Vec::new();
        self.tree.query(&sphere.aabb(), &mut candidates);
        candidates
            .into_iter()
            .filter_map(|id| self.zones.get(&id))
            .filter(|zone| zone.sphere.intersects(sphere))
            .collect()
    }

    /// Reports whether a sphere at `position` is suppressed.
    ///
    /// With a mission every overlapping zone must belong to that mission;
    /// a zone of another mission lifts the suppression.
    #[must_use]
    pub fn in_blackout_zone(
        &self,
        position: Vec3,
        radius: f32,
        mission: Option<PrototypeId>,
    ) -> bool {
        let overlapping = self.zones_overlapping(&Sphere::new(position, radius));
        if overlapping.is_empty() {
            return false;
        }
        match mission {
            Some(mission) => overlapping.iter().all(|zone| zone.mission == Some(mission)),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zones() -> BlackOutZones {
        BlackOutZones::new(
            Aabb::new(Vec3::ZERO, Vec3::new(2048.0, 2048.0, 256.0)),
            QuadtreeConfig::default(),
        )
    }

    #[test]
    fn ids_start_at_one_and_increment() {
        let mut zones = zones();
        let first = zones.add(Vec3::new(100.0, 100.0, 0.0), 50.0, None);
        let second = zones.add(Vec3::new(300.0, 100.0, 0.0), 50.0, None);
        assert_eq!(first, Some(BlackOutId::new(1)));
        assert_eq!(second, Some(BlackOutId::new(2)));
        assert_eq!(zones.len(), 2);
    }

    #[test]
    fn zone_outside_region_is_rejected_without_consuming_an_id() {
        let mut zones = zones();
        assert_eq!(zones.add(Vec3::new(-500.0, 0.0, 0.0), 10.0, None), None);
        assert_eq!(
            zones.add(Vec3::new(10.0, 10.0, 0.0), 10.0, None),
            Some(BlackOutId::new(1))
        );
    }

    #[test]
    fn removed_zone_stops_suppressing() {
        let mut zones = zones();
        let id = zones
            .add(Vec3::new(500.0, 500.0, 0.0), 100.0, None)
            .expect("zone inside region");
        assert!(zones.in_blackout_zone(Vec3::new(550.0, 500.0, 0.0), 10.0, None));
        assert!(zones.remove(id).is_some());
        assert!(!zones.in_blackout_zone(Vec3::new(550.0, 500.0, 0.0), 10.0, None));
        assert!(zones.get(id).is_none());
    }
}
