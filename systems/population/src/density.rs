//! Per-cell cluster density used to spread location spawns.

use std::collections::BTreeMap;

use population_core::{Aabb, AreaDescriptor, AreaId, CellDescriptor, CellId, Picker, SpawnLocation};
use rand::Rng;

const CELL_WEIGHT_SCALE: f32 = 1000.0;
const DEFAULT_DENSITY_PCT: f32 = 100.0;

/// Density bookkeeping of one cell.
#[derive(Clone, Debug, PartialEq)]
pub struct SpawnCell {
    /// Identifier of the cell.
    pub cell: CellId,
    /// Region-space bounds of the cell.
    pub bounds: Aabb,
    /// Clusters the cell should hold.
    pub density: f32,
    /// Clusters the cell may hold at most.
    pub density_peak: f32,
    /// Base pick weight derived from the navigable area.
    pub cell_weight: f32,
    /// Hostile entities currently placed in the cell.
    pub weight: f32,
}

impl SpawnCell {
    fn new(descriptor: &CellDescriptor, cluster_area: f32, pct: f32, peak_pct: f32) -> Self {
        let clusters = if cluster_area > 0.0 {
            descriptor.spawnable_area / cluster_area
        } else {
            0.0
        };
        Self {
            cell: descriptor.id,
            bounds: descriptor.bounds,
            density: clusters * pct / 100.0,
            density_peak: clusters * peak_pct / 100.0,
            cell_weight: descriptor.spawnable_area / CELL_WEIGHT_SCALE,
            weight: 0.0,
        }
    }

    /// Pick weight scaled by the share of the peak still free.
    #[must_use]
    pub fn pick_weight(&self) -> f32 {
        if self.density_peak <= 0.0 || self.weight >= self.density_peak {
            return 0.0;
        }
        self.cell_weight * (self.density_peak - self.weight) / self.density_peak
    }
}

/// Spawn cells of one area.
#[derive(Clone, Debug, PartialEq)]
pub struct PopulationArea {
    /// Identifier of the area.
    pub area: AreaId,
    /// Character level of the area.
    pub level: u32,
    /// Clusters the whole area should hold.
    pub density: f32,
    /// Spawn cells keyed by cell.
    pub cells: BTreeMap<CellId, SpawnCell>,
    cluster_area: f32,
    density_pct: f32,
    peak_pct: f32,
}

impl PopulationArea {
    pub(crate) fn new(
        descriptor: &AreaDescriptor,
        cells: impl IntoIterator<Item = CellDescriptor>,
        cluster_area: f32,
        density: Option<(f32, f32)>,
    ) -> Self {
        let (pct, peak_pct) = density.unwrap_or((DEFAULT_DENSITY_PCT, DEFAULT_DENSITY_PCT));
        let area_density = if cluster_area > 0.0 {
            descriptor.spawnable_area / cluster_area * pct / 100.0
        } else {
            0.0
        };
        Self {
            area: descriptor.id,
            level: descriptor.level,
            density: area_density,
            cells: cells
                .into_iter()
                .map(|cell| (cell.id, SpawnCell::new(&cell, cluster_area, pct, peak_pct)))
                .collect(),
            cluster_area,
            density_pct: pct,
            peak_pct,
        }
    }

    /// Adds a spawn cell; a cell already present keeps its placed weight.
    pub(crate) fn add_cell(&mut self, descriptor: &CellDescriptor) {
        let (cluster_area, pct, peak_pct) = (self.cluster_area, self.density_pct, self.peak_pct);
        let _ = self
            .cells
            .entry(descriptor.id)
            .or_insert_with(|| SpawnCell::new(descriptor, cluster_area, pct, peak_pct));
    }

    pub(crate) fn remove_cell(&mut self, cell: CellId) {
        let _ = self.cells.remove(&cell);
    }

    /// Adds `amount` placed hostiles to `cell`; negative amounts remove them.
    pub fn adjust_weight(&mut self, cell: CellId, amount: f32) {
        if let Some(spawn_cell) = self.cells.get_mut(&cell) {
            spawn_cell.weight = (spawn_cell.weight + amount).max(0.0);
        }
    }
}

/// Picks a cell allowed by `location`, weighted by remaining density.
pub(crate) fn pick_spawn_cell<'a, R: Rng + ?Sized>(
    areas: impl IntoIterator<Item = &'a PopulationArea>,
    location: &SpawnLocation,
    rng: &mut R,
) -> Option<(AreaId, CellId, Aabb)> {
    let mut picker = Picker::new();
    for area in areas {
        for spawn_cell in area.cells.values() {
            if !location.spawnable_cell(spawn_cell.cell, area.area) {
                continue;
            }
            let weight = spawn_cell.pick_weight().ceil() as u32;
            picker.add((area.area, spawn_cell.cell, spawn_cell.bounds), weight);
        }
    }
    picker.pick(rng).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn cell(id: u32, spawnable: f32) -> CellDescriptor {
        CellDescriptor {
            id: CellId::new(id),
            area: AreaId::new(1),
            bounds: Aabb::new(Vec3::ZERO, Vec3::new(500.0, 500.0, 10.0)),
            spawnable_area: spawnable,
            markers: Vec::new(),
        }
    }

    fn area(cells: &[CellDescriptor]) -> PopulationArea {
        let descriptor = AreaDescriptor {
            id: AreaId::new(1),
            level: 3,
            population: None,
            cells: cells.iter().map(|cell| cell.id).collect(),
            spawnable_area: cells.iter().map(|cell| cell.spawnable_area).sum(),
        };
        PopulationArea::new(&descriptor, cells.to_vec(), 250_000.0, Some((100.0, 200.0)))
    }

    #[test]
    fn densities_scale_with_spawnable_area() {
        let area = area(&[cell(1, 500_000.0)]);
        let spawn_cell = &area.cells[&CellId::new(1)];
        assert_eq!(area.density, 2.0);
        assert_eq!(spawn_cell.density, 2.0);
        assert_eq!(spawn_cell.density_peak, 4.0);
        assert_eq!(spawn_cell.cell_weight, 500.0);
        assert_eq!(spawn_cell.pick_weight(), 500.0);
    }

    #[test]
    fn pick_weight_drops_to_zero_at_peak() {
        let mut area = area(&[cell(1, 500_000.0)]);
        area.adjust_weight(CellId::new(1), 2.0);
        assert_eq!(area.cells[&CellId::new(1)].pick_weight(), 250.0);
        area.adjust_weight(CellId::new(1), 2.0);
        assert_eq!(area.cells[&CellId::new(1)].pick_weight(), 0.0);
        area.adjust_weight(CellId::new(1), -10.0);
        assert_eq!(area.cells[&CellId::new(1)].weight, 0.0);
    }

    #[test]
    fn full_cells_are_never_picked() {
        let mut area = area(&[cell(1, 500_000.0), cell(2, 500_000.0)]);
        area.adjust_weight(CellId::new(1), 4.0);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..16 {
            let picked = pick_spawn_cell([&area], &SpawnLocation::default(), &mut rng);
            assert_eq!(picked.map(|(_, cell, _)| cell), Some(CellId::new(2)));
        }
        let only_first = SpawnLocation::restricted([], [CellId::new(1)]);
        assert_eq!(pick_spawn_cell([&area], &only_first, &mut rng), None);
    }
}
