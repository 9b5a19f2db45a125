//! Grid navigation mesh built from the region cells.

use glam::Vec3;
use population_core::{geometry, Aabb, NaviMesh, PathFlags, Sphere};

#[derive(Clone, Debug)]
struct FloorCell {
    bounds: Aabb,
    floor: Option<f32>,
}

/// Navigation mesh made of axis-aligned floor cells and circular obstacles.
///
/// A disc is navigable when its centre and its four extreme points stand on a
/// floor and, for walkers, it touches no obstacle. Flying entities ignore
/// obstacles but still need a floor below them.
#[derive(Clone, Debug, Default)]
pub struct NavigationGrid {
    cells: Vec<FloorCell>,
    obstacles: Vec<Sphere>,
}

impl NavigationGrid {
    /// Creates an empty mesh.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a floor cell. Cells without a floor are holes.
    pub(crate) fn add_cell(&mut self, bounds: Aabb, floor: Option<f32>) {
        self.cells.push(FloorCell { bounds, floor });
    }

    /// Adds a circular obstacle.
    pub(crate) fn add_obstacle(&mut self, obstacle: Sphere) {
        self.obstacles.push(obstacle);
    }

    /// Number of obstacles.
    #[must_use]
    pub fn obstacle_count(&self) -> usize {
        self.obstacles.len()
    }

    fn floor_at(&self, position: Vec3) -> Option<f32> {
        self.cells
            .iter()
            .find(|cell| cell.bounds.contains_xy(position))
            .and_then(|cell| cell.floor)
    }

    fn touches_obstacle(&self, position: Vec3, radius: f32) -> bool {
        self.obstacles.iter().any(|obstacle| {
            geometry::distance_2d(obstacle.center(), position) < obstacle.radius() + radius
        })
    }
}

impl NaviMesh for NavigationGrid {
    fn contains(&self, position: Vec3, radius: f32, flags: PathFlags) -> bool {
        let samples = [
            position,
            position + Vec3::new(radius, 0.0, 0.0),
            position - Vec3::new(radius, 0.0, 0.0),
            position + Vec3::new(0.0, radius, 0.0),
            position - Vec3::new(0.0, radius, 0.0),
        ];
        if samples.iter().any(|sample| self.floor_at(*sample).is_none()) {
            return false;
        }
        if flags.contains(PathFlags::FLY) {
            return true;
        }
        !self.touches_obstacle(position, radius)
    }

    fn project_to_floor(&self, position: Vec3) -> Option<Vec3> {
        let floor = self.floor_at(position)?;
        Some(Vec3::new(position.x, position.y, floor))
    }
}
