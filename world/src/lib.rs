#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Concrete region used by the population engine outside of a game server.
//!
//! A [`Region`] is built from a serialisable [`RegionLayout`] describing areas,
//! cells, markers and obstacles. It implements [`RegionView`] and exposes a
//! [`NavigationGrid`] as its navigation mesh. [`EntityLedger`] is an in-memory
//! [`population_core::EntityHost`] that records created entities.

use std::collections::{BTreeMap, BTreeSet};

use glam::Vec3;
use population_core::{
    Aabb, AreaDescriptor, AreaId, CellDescriptor, CellId, MarkerPlacement, NaviMesh, PrototypeId,
    RegionView, Sphere,
};
use serde::{Deserialize, Serialize};

mod entities;
mod navigation;

pub use entities::{EntityLedger, LedgerEntity};
pub use navigation::NavigationGrid;

const DEFAULT_AREA_LEVEL: u32 = 1;

fn default_level() -> u32 {
    DEFAULT_AREA_LEVEL
}

/// Serialisable description of an area.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AreaLayout {
    /// Identifier of the area.
    pub id: AreaId,
    /// Character level of entities spawned in the area.
    #[serde(default = "default_level")]
    pub level: u32,
    /// Population prototype driving the area.
    #[serde(default)]
    pub population: Option<PrototypeId>,
}

/// Circular obstacle blocking walkers.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObstacleLayout {
    /// Offset from the cell centre.
    pub position: Vec3,
    /// Planar radius.
    pub radius: f32,
}

/// Serialisable description of a cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellLayout {
    /// Identifier of the cell.
    pub id: CellId,
    /// Area the cell belongs to.
    pub area: AreaId,
    /// Lower corner of the cell.
    pub min: Vec3,
    /// Upper corner of the cell.
    pub max: Vec3,
    /// Floor height; defaults to the lower corner. Holes set `has_floor = false`.
    #[serde(default)]
    pub floor: Option<f32>,
    /// Whether the cell has a walkable floor.
    #[serde(default = "default_true")]
    pub has_floor: bool,
    /// Navigable floor area; defaults to the footprint when the cell has a floor.
    #[serde(default)]
    pub spawnable_area: Option<f32>,
    /// Authored markers.
    #[serde(default)]
    pub markers: Vec<MarkerPlacement>,
    /// Obstacles standing in the cell.
    #[serde(default)]
    pub obstacles: Vec<ObstacleLayout>,
}

fn default_true() -> bool {
    true
}

/// Serialisable description of a whole region.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionLayout {
    /// Lower corner of the region.
    pub min: Vec3,
    /// Upper corner of the region.
    pub max: Vec3,
    /// Marker filters the region accepts.
    #[serde(default)]
    pub marker_filters: Vec<PrototypeId>,
    /// Areas.
    #[serde(default)]
    pub areas: Vec<AreaLayout>,
    /// Cells.
    #[serde(default)]
    pub cells: Vec<CellLayout>,
}

/// Problems detected while building a [`Region`].
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RegionError {
    /// The region bounds have no footprint.
    #[error("region bounds have no planar footprint")]
    EmptyBounds,
    /// Two areas share an identifier.
    #[error("area {0} is declared twice")]
    DuplicateArea(AreaId),
    /// Two cells share an identifier.
    #[error("cell {0} is declared twice")]
    DuplicateCell(CellId),
    /// A cell references an undeclared area.
    #[error("cell {cell} references unknown area {area}")]
    UnknownArea {
        /// Offending cell.
        cell: CellId,
        /// Missing area.
        area: AreaId,
    },
    /// A cell has no footprint.
    #[error("cell {0} has no planar footprint")]
    EmptyCell(CellId),
}

/// Region geometry implementing [`RegionView`].
#[derive(Clone, Debug)]
pub struct Region {
    bounds: Aabb,
    marker_filters: BTreeSet<PrototypeId>,
    areas: BTreeMap<AreaId, AreaDescriptor>,
    cells: BTreeMap<CellId, CellDescriptor>,
    navi: NavigationGrid,
}

impl Region {
    /// Builds and validates a region.
    ///
    /// # Errors
    ///
    /// Returns a [`RegionError`] when identifiers collide, a cell names an
    /// unknown area, or the region or a cell has no footprint.
    pub fn from_layout(layout: &RegionLayout) -> Result<Self, RegionError> {
        let bounds = Aabb::new(layout.min, layout.max);
        if bounds.is_degenerate() {
            return Err(RegionError::EmptyBounds);
        }

        let mut areas = BTreeMap::new();
        for area in &layout.areas {
            let descriptor = AreaDescriptor {
                id: area.id,
                level: area.level,
                population: area.population,
                cells: Vec::new(),
                spawnable_area: 0.0,
            };
            if areas.insert(area.id, descriptor).is_some() {
                return Err(RegionError::DuplicateArea(area.id));
            }
        }

        let mut cells = BTreeMap::new();
        let mut navi = NavigationGrid::new();
        for cell in &layout.cells {
            let cell_bounds = Aabb::new(cell.min, cell.max);
            if cell_bounds.is_degenerate() {
                return Err(RegionError::EmptyCell(cell.id));
            }
            let area = areas.get_mut(&cell.area).ok_or(RegionError::UnknownArea {
                cell: cell.id,
                area: cell.area,
            })?;

            let floor = cell
                .has_floor
                .then(|| cell.floor.unwrap_or(cell_bounds.min().z));
            let spawnable_area = cell.spawnable_area.unwrap_or(if floor.is_some() {
                cell_bounds.area_xy()
            } else {
                0.0
            });
            navi.add_cell(cell_bounds, floor);
            for obstacle in &cell.obstacles {
                navi.add_obstacle(Sphere::new(
                    cell_bounds.center() + obstacle.position,
                    obstacle.radius,
                ));
            }

            area.cells.push(cell.id);
            area.spawnable_area += spawnable_area;
            let descriptor = CellDescriptor {
                id: cell.id,
                area: cell.area,
                bounds: cell_bounds,
                spawnable_area,
                markers: cell.markers.clone(),
            };
            if cells.insert(cell.id, descriptor).is_some() {
                return Err(RegionError::DuplicateCell(cell.id));
            }
        }

        log::debug!(
            "region built with {} areas and {} cells",
            areas.len(),
            cells.len()
        );
        Ok(Self {
            bounds,
            marker_filters: layout.marker_filters.iter().copied().collect(),
            areas,
            cells,
            navi,
        })
    }

    /// Navigation mesh of the region.
    #[must_use]
    pub fn navigation(&self) -> &NavigationGrid {
        &self.navi
    }
}

impl RegionView for Region {
    fn bounds(&self) -> Aabb {
        self.bounds
    }

    fn cell(&self, id: CellId) -> Option<&CellDescriptor> {
        self.cells.get(&id)
    }

    fn area(&self, id: AreaId) -> Option<&AreaDescriptor> {
        self.areas.get(&id)
    }

    fn cell_ids(&self) -> Vec<CellId> {
        self.cells.keys().copied().collect()
    }

    fn area_ids(&self) -> Vec<AreaId> {
        self.areas.keys().copied().collect()
    }

    fn cell_at(&self, position: Vec3) -> Option<CellId> {
        self.cells
            .values()
            .find(|cell| cell.bounds.contains_xy(position))
            .map(|cell| cell.id)
    }

    fn navi(&self) -> &dyn NaviMesh {
        &self.navi
    }

    fn check_marker_filter(&self, filter: Option<PrototypeId>) -> bool {
        filter.map_or(true, |filter| self.marker_filters.contains(&filter))
    }
}

/// Read-only helpers over a [`Region`].
pub mod query {
    use super::Region;
    use population_core::{AreaId, CellId, PrototypeId, RegionView};

    /// Number of cells in the region.
    #[must_use]
    pub fn cell_count(region: &Region) -> usize {
        region.cells.len()
    }

    /// Number of areas in the region.
    #[must_use]
    pub fn area_count(region: &Region) -> usize {
        region.areas.len()
    }

    /// Cells belonging to `area`, in declaration order.
    #[must_use]
    pub fn cells_in_area(region: &Region, area: AreaId) -> Vec<CellId> {
        region
            .area(area)
            .map(|descriptor| descriptor.cells.clone())
            .unwrap_or_default()
    }

    /// Navigable floor area summed over the whole region.
    #[must_use]
    pub fn total_spawnable_area(region: &Region) -> f32 {
        region.areas.values().map(|area| area.spawnable_area).sum()
    }

    /// Number of authored markers of type `marker`, filtered ones included.
    #[must_use]
    pub fn authored_marker_count(region: &Region, marker: PrototypeId) -> usize {
        region
            .cells
            .values()
            .flat_map(|cell| cell.markers.iter())
            .filter(|placement| placement.marker == marker)
            .count()
    }
}
