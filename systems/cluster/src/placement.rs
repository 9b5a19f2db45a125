//! Layout validation and the placement searches.

use std::f32::consts::TAU;

use glam::Vec3;
use population_core::{
    Aabb, ClusterObjectFlags, EntityHost, FormationFacing, NaviMesh, Picker, RegionView,
    SpawnError, SpawnFlags,
};
use population_system_spatial::BlackOutZones;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::formation::test_facing_yaw;
use crate::{ClusterHandle, ClusterTree};

const MAX_SECTORS: u32 = 5;
const MIN_BOUNDS_STEP: f32 = 32.0;
const MAX_BOUNDS_CANDIDATES: usize = 256;
/// Outer radius of the search around a bare position.
const POSITION_SEARCH_RADIUS: f32 = 256.0;

/// Read-only view of the world a layout is validated against.
#[derive(Clone, Copy)]
pub struct PlacementScene<'a> {
    /// Region geometry and navigation.
    pub region: &'a dyn RegionView,
    /// Active blackout zones.
    pub blackouts: &'a BlackOutZones,
    /// Entities already standing in the region.
    pub host: &'a dyn EntityHost,
}

/// Where a cluster should be placed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SpawnTarget {
    /// A reserved marker slot; placed without validation.
    Marker {
        /// Marker position.
        position: Vec3,
        /// Marker yaw, used when the object keeps marker orientation.
        yaw: f32,
    },
    /// Around a spawner entity.
    Spawner {
        /// Spawner position.
        position: Vec3,
        /// Spawner yaw.
        yaw: f32,
        /// Inner radius of the search annulus.
        min_distance: f32,
        /// Outer radius of the search annulus.
        max_distance: f32,
        /// Facing applied to the cluster at each candidate.
        facing: FormationFacing,
    },
    /// Anywhere inside a box.
    Bounds(Aabb),
    /// Near a position.
    Position(Vec3),
}

impl ClusterTree {
    /// Projects a leaf onto the floor, shifting its relative offset by the
    /// vertical correction. Returns the absolute floor position.
    pub fn project_to_floor(&mut self, handle: ClusterHandle, navi: &dyn NaviMesh) -> Option<Vec3> {
        let absolute = self.absolute_position(handle);
        if self.nodes[handle.0]
            .flags
            .contains(ClusterObjectFlags::PROJECT_TO_FLOOR)
        {
            return Some(absolute);
        }
        let projected = navi.project_to_floor(absolute)?;
        if !projected.is_finite() {
            return None;
        }
        let node = &self.nodes[handle.0];
        let relative = node.position + (projected - absolute);
        let yaw = node.yaw;
        self.set_relative(handle, relative, yaw);
        self.nodes[handle.0]
            .flags
            .insert(ClusterObjectFlags::PROJECT_TO_FLOOR);
        Some(projected)
    }

    /// Checks every leaf against navigation, blackout zones and spawned entities.
    pub fn test_layout(&mut self, scene: &PlacementScene<'_>) -> bool {
        let navi = scene.region.navi();
        for leaf in self.leaves() {
            let Some(position) = self.project_to_floor(leaf, navi) else {
                return false;
            };
            let node = &self.nodes[leaf.0];
            let (radius, height, path_flags) = (node.radius, node.height, node.path_flags);
            let (spawn_flags, mission) = self
                .parent_group(leaf)
                .map_or((SpawnFlags::empty(), None), |group| {
                    (group.spawn_flags, group.mission())
                });

            if !path_flags.is_empty() && !navi.contains(position, radius, path_flags) {
                return false;
            }
            if !spawn_flags.contains(SpawnFlags::IGNORE_BLACKOUT)
                && scene.blackouts.in_blackout_zone(position, radius, mission)
            {
                return false;
            }
            if !spawn_flags.contains(SpawnFlags::IGNORE_SPAWNED)
                && scene
                    .host
                    .is_bounds_blocked(position + Vec3::Z * height, radius)
            {
                return false;
            }
        }
        true
    }

    /// Reports whether any leaf overlaps a blocking entity of `host`.
    #[must_use]
    pub fn overlaps_blocking(&self, host: &dyn EntityHost) -> bool {
        self.leaves().into_iter().any(|leaf| {
            let node = &self.nodes[leaf.0];
            let position = self.absolute_position(leaf);
            host.is_bounds_blocked(position + Vec3::Z * node.height, node.radius)
        })
    }

    /// Searches the annulus `[min, max]` around `position` for a valid layout.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError::InvalidSector`] for a malformed annulus,
    /// [`SpawnError::ZeroRadius`] for a cluster without footprint and
    /// [`SpawnError::PlacementFailed`] when no candidate passes.
    #[allow(clippy::too_many_arguments)]
    pub fn pick_position_in_sector<R: Rng + ?Sized>(
        &mut self,
        position: Vec3,
        yaw: f32,
        min: f32,
        max: f32,
        facing: FormationFacing,
        scene: &PlacementScene<'_>,
        rng: &mut R,
    ) -> Result<(), SpawnError> {
        if min < 0.0 || max <= 0.0 || min > max {
            return Err(SpawnError::InvalidSector { min, max });
        }
        let radius = self.radius();
        if radius <= 0.0 {
            return Err(SpawnError::ZeroRadius);
        }

        let cluster_size = 2.0 * radius;
        let per_unit = TAU / cluster_size;
        let min_distance = min + radius;
        let mut max = max;
        let mut outer = min + cluster_size;
        if max - min < cluster_size {
            max = outer;
        }

        let mut sectors = Picker::new();
        let mut distance = min_distance;
        for sector in 0..MAX_SECTORS {
            sectors.add(sector, (per_unit * distance).floor() as u32);
            distance += cluster_size;
            outer += cluster_size;
            if outer > max {
                break;
            }
        }

        let root = self.root;
        while let Some(sector) = sectors.pick_remove(rng) {
            let distance = min_distance + sector as f32 * cluster_size;
            let candidates = (per_unit * distance).floor() as u32;
            if candidates == 0 {
                continue;
            }
            let start = rng.gen_range(0..candidates);
            let step = TAU / candidates as f32;
            for offset in 0..candidates {
                let angle = ((start + offset) % candidates) as f32 * step;
                let (sin, cos) = angle.sin_cos();
                let candidate = position + Vec3::new(distance * cos, distance * sin, 0.0);
                if scene.region.cell_at(candidate).is_none() {
                    continue;
                }
                let candidate_yaw = match facing {
                    FormationFacing::FaceParent => yaw,
                    _ => test_facing_yaw(facing, position - candidate, yaw),
                };
                self.set_relative(root, candidate, candidate_yaw);
                if self.test_layout(scene) {
                    return Ok(());
                }
            }
        }
        Err(SpawnError::PlacementFailed)
    }

    /// Searches a shuffled grid over `bounds` for a valid layout.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError::PlacementFailed`] when the box cannot hold the
    /// cluster or no candidate passes.
    pub fn pick_position_in_bounds<R: Rng + ?Sized>(
        &mut self,
        bounds: &Aabb,
        scene: &PlacementScene<'_>,
        rng: &mut R,
    ) -> Result<(), SpawnError> {
        let radius = self.radius();
        if radius <= 0.0 {
            return Err(SpawnError::ZeroRadius);
        }
        if bounds.width() < radius || bounds.length() < radius {
            return Err(SpawnError::PlacementFailed);
        }

        let step = radius.max(MIN_BOUNDS_STEP);
        let z = bounds.center().z;
        let mut candidates = Vec::new();
        let mut x = bounds.min().x;
        while x < bounds.max().x {
            let mut y = bounds.min().y;
            while y < bounds.max().y {
                candidates.push(Vec3::new(x, y, z));
                y += step;
            }
            x += step;
        }
        candidates.shuffle(rng);

        let root = self.root;
        for candidate in candidates.into_iter().take(MAX_BOUNDS_CANDIDATES) {
            self.set_relative(root, candidate, 0.0);
            if self.test_layout(scene) {
                return Ok(());
            }
        }
        Err(SpawnError::PlacementFailed)
    }

    fn place<R: Rng + ?Sized>(
        &mut self,
        target: &SpawnTarget,
        scene: &PlacementScene<'_>,
        rng: &mut R,
    ) -> Result<(), SpawnError> {
        match *target {
            SpawnTarget::Marker { position, yaw } => {
                let yaw = if self
                    .root_group()
                    .is_some_and(|group| group.use_marker_orientation)
                {
                    yaw
                } else {
                    0.0
                };
                self.set_relative(self.root, position, yaw);
                Ok(())
            }
            SpawnTarget::Spawner {
                position,
                yaw,
                min_distance,
                max_distance,
                facing,
            } => self.pick_position_in_sector(
                position,
                yaw,
                min_distance,
                max_distance,
                facing,
                scene,
                rng,
            ),
            SpawnTarget::Bounds(bounds) => self.pick_position_in_bounds(&bounds, scene, rng),
            SpawnTarget::Position(position) => self.pick_position_in_sector(
                position,
                0.0,
                0.0,
                POSITION_SEARCH_RADIUS,
                FormationFacing::None,
                scene,
                rng,
            ),
        }
    }

    /// Places the cluster at `target`, retrying with relaxed rules when the
    /// spawn flags allow it.
    ///
    /// A spawner target with [`SpawnFlags::RETRY_FORCE`] always succeeds: the
    /// cluster is dropped on the spawner without validation. Callers can detect
    /// the resulting overlap with [`ClusterTree::overlaps_blocking`].
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt.
    pub fn try_place<R: Rng + ?Sized>(
        &mut self,
        target: &SpawnTarget,
        scene: &PlacementScene<'_>,
        rng: &mut R,
    ) -> Result<(), SpawnError> {
        let mut result = self.place(target, scene, rng);
        let flags = self.spawn_flags();
        if result.is_err()
            && !flags.contains(SpawnFlags::IGNORE_BLACKOUT)
            && flags.contains(SpawnFlags::RETRY_IGNORING_BLACKOUT)
        {
            log::debug!("retrying placement of {} ignoring blackout zones", self.describe());
            self.insert_spawn_flags(SpawnFlags::IGNORE_BLACKOUT);
            result = self.place(target, scene, rng);
        }
        if result.is_err() && flags.contains(SpawnFlags::RETRY_FORCE) {
            if let SpawnTarget::Spawner { position, yaw, .. } = *target {
                log::debug!("forcing {} onto its spawner", self.describe());
                self.set_relative(self.root, position, yaw);
                result = Ok(());
            }
        }
        result
    }

    fn describe(&self) -> String {
        self.root_group()
            .map_or_else(|| "cluster".to_owned(), |group| group.object.to_string())
    }
}
