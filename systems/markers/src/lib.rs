#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Spawn marker registry.
//!
//! Harvests the designer-placed markers of every cell into reservations and
//! indexes them by marker type at region, area and cell granularity plus a
//! quadtree for volume queries. The registry owns the `Free`/`Reserved` claim
//! state and is the only place a slot can be claimed.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use glam::Vec3;
use population_core::{
    Aabb, AreaId, Catalog, CellId, MarkerKind, MarkerState, Picker, PrototypeId, RegionView,
    ReservationId, SpawnFlags, SpawnLocation, Sphere,
};
use population_system_spatial::{BlackOutZone, Quadtree, QuadtreeConfig};
use rand::Rng;

mod reservation;

pub use reservation::SpawnReservation;

type MarkerBuckets = BTreeMap<PrototypeId, BTreeSet<ReservationId>>;

/// Tuning for a [`SpawnMarkerRegistry`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegistryConfig {
    reservation_radius: f32,
    quadtree: QuadtreeConfig,
}

impl RegistryConfig {
    /// Creates a configuration.
    #[must_use]
    pub const fn new(reservation_radius: f32, quadtree: QuadtreeConfig) -> Self {
        Self {
            reservation_radius,
            quadtree,
        }
    }

    /// Radius of the sphere a reservation occupies in volume queries.
    #[must_use]
    pub const fn reservation_radius(&self) -> f32 {
        self.reservation_radius
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new(64.0, QuadtreeConfig::default())
    }
}

/// Index of every marker slot in a region.
#[derive(Clone, Debug)]
pub struct SpawnMarkerRegistry {
    config: RegistryConfig,
    reservations: BTreeMap<ReservationId, SpawnReservation>,
    region_lookup: MarkerBuckets,
    area_lookup: BTreeMap<AreaId, MarkerBuckets>,
    cell_lookup: BTreeMap<CellId, MarkerBuckets>,
    harvested: BTreeSet<CellId>,
    /// Last index handed out per cell; survives cell removal so ids held by
    /// stale groups never name a newer slot.
    last_index: BTreeMap<CellId, u32>,
    tree: Quadtree<ReservationId>,
}

impl SpawnMarkerRegistry {
    /// Creates an empty registry covering `bounds`.
    #[must_use]
    pub fn new(bounds: Aabb, config: RegistryConfig) -> Self {
        Self {
            config,
            reservations: BTreeMap::new(),
            region_lookup: BTreeMap::new(),
            area_lookup: BTreeMap::new(),
            cell_lookup: BTreeMap::new(),
            harvested: BTreeSet::new(),
            last_index: BTreeMap::new(),
            tree: Quadtree::new(bounds, config.quadtree),
        }
    }

    /// Clears the registry and harvests every cell of `region`.
    pub fn initialize<R>(&mut self, region: &R, catalog: &Catalog)
    where
        R: RegionView + ?Sized,
    {
        let last_index = std::mem::take(&mut self.last_index);
        *self = Self::new(region.bounds(), self.config);
        self.last_index = last_index;
        for cell in region.cell_ids() {
            self.add_cell(region, catalog, cell);
        }
        log::debug!("marker registry harvested {} reservations", self.len());
    }

    /// Harvests the markers of `cell`.
    ///
    /// A cell that is already harvested is left untouched so claims on its
    /// slots survive. Every harvest hands out indices above any the cell used
    /// before.
    pub fn add_cell<R>(&mut self, region: &R, catalog: &Catalog, cell: CellId)
    where
        R: RegionView + ?Sized,
    {
        if self.harvested.contains(&cell) {
            log::warn!("cell {cell} is already harvested");
            return;
        }
        let Some(descriptor) = region.cell(cell) else {
            log::warn!("cannot harvest markers of unknown cell {cell}");
            return;
        };
        let _ = self.harvested.insert(cell);

        let center = descriptor.bounds.center();
        let mut index = self.last_index.get(&cell).copied().unwrap_or(0);
        for placement in &descriptor.markers {
            let Some(marker) = catalog.marker(placement.marker) else {
                continue;
            };
            if marker.kind == MarkerKind::Prop || !region.check_marker_filter(placement.filter) {
                continue;
            }
            index += 1;

            let position = center + placement.position;
            if !descriptor.bounds.contains_xy(position) {
                log::warn!(
                    "[DESIGN] marker {} lies outside cell {cell} bounds {:?} at {position}",
                    placement.marker,
                    descriptor.bounds
                );
            }

            let id = ReservationId::new(cell, index);
            let reservation = SpawnReservation::new(
                id,
                placement.marker,
                marker.kind,
                descriptor.area,
                position,
                placement.yaw,
            );
            self.insert(reservation);
        }
        let _ = self.last_index.insert(cell, index);
    }

    fn insert(&mut self, reservation: SpawnReservation) {
        let id = reservation.id();
        let marker = reservation.marker();
        let bounds = reservation.sphere(self.config.reservation_radius).aabb();
        let _ = self.tree.insert(id, bounds);
        let _ = self.region_lookup.entry(marker).or_default().insert(id);
        let _ = self
            .area_lookup
            .entry(reservation.area())
            .or_default()
            .entry(marker)
            .or_default()
            .insert(id);
        let _ = self
            .cell_lookup
            .entry(id.cell())
            .or_default()
            .entry(marker)
            .or_default()
            .insert(id);
        let _ = self.reservations.insert(id, reservation);
    }

    /// Removes every reservation of `cell` from all lookups.
    pub fn remove_cell(&mut self, cell: CellId) {
        let _ = self.harvested.remove(&cell);
        let Some(buckets) = self.cell_lookup.remove(&cell) else {
            return;
        };
        for id in buckets.into_values().flatten() {
            let Some(reservation) = self.reservations.remove(&id) else {
                log::warn!("reservation {id} missing from master list while removing cell {cell}");
                continue;
            };
            let _ = self.tree.remove(id);
            let marker = reservation.marker();
            remove_from_bucket(&mut self.region_lookup, marker, id);
            if let Some(area) = self.area_lookup.get_mut(&reservation.area()) {
                remove_from_bucket(area, marker, id);
                if area.is_empty() {
                    let _ = self.area_lookup.remove(&reservation.area());
                }
            }
        }
    }

    /// Picks a claimable slot of type `marker` inside `location` and flips it to
    /// [`MarkerState::Reserved`].
    ///
    /// When nothing qualifies the search is repeated first without
    /// [`SpawnFlags::IGNORE_SIMULATED`] and then with
    /// [`SpawnFlags::IGNORE_BLACKOUT`].
    pub fn reserve_free_reservation<G: Rng + ?Sized>(
        &mut self,
        marker: PrototypeId,
        rng: &mut G,
        now: Duration,
        location: &SpawnLocation,
        mut flags: SpawnFlags,
        respawn_delay: Duration,
    ) -> Option<ReservationId> {
        let respawn = Some((now, respawn_delay));
        let mut picker = self.collect_candidates(marker, location, flags, respawn);

        if picker.is_empty() && flags.contains(SpawnFlags::IGNORE_SIMULATED) {
            flags.remove(SpawnFlags::IGNORE_SIMULATED);
            picker = self.collect_candidates(marker, location, flags, respawn);
        }
        if picker.is_empty() && !flags.contains(SpawnFlags::IGNORE_BLACKOUT) {
            flags.insert(SpawnFlags::IGNORE_BLACKOUT);
            picker = self.collect_candidates(marker, location, flags, respawn);
        }

        let id = *picker.pick(rng)?;
        let reservation = self.reservations.get_mut(&id)?;
        reservation.state = MarkerState::Reserved;
        log::trace!("reserved marker slot {id} of {marker}");
        Some(id)
    }

    fn collect_candidates(
        &self,
        marker: PrototypeId,
        location: &SpawnLocation,
        flags: SpawnFlags,
        respawn: Option<(Duration, Duration)>,
    ) -> Picker<ReservationId> {
        let mut picker = Picker::new();
        let mut consider = |ids: &BTreeSet<ReservationId>, areas: &BTreeSet<AreaId>| {
            for id in ids {
                let Some(reservation) = self.reservations.get(id) else {
                    continue;
                };
                if !areas.is_empty() && !areas.contains(&reservation.area()) {
                    continue;
                }
                if reservation.test(flags, respawn, true) {
                    picker.add(*id, 1);
                }
            }
        };

        let unrestricted = BTreeSet::new();
        if !location.cells.is_empty() {
            for cell in &location.cells {
                if let Some(ids) = self.cell_lookup.get(cell).and_then(|map| map.get(&marker)) {
                    consider(ids, &location.areas);
                }
            }
        } else if !location.areas.is_empty() {
            for area in &location.areas {
                if let Some(ids) = self.area_lookup.get(area).and_then(|map| map.get(&marker)) {
                    consider(ids, &unrestricted);
                }
            }
        } else if let Some(ids) = self.region_lookup.get(&marker) {
            consider(ids, &unrestricted);
        }
        picker
    }

    /// Releases a claimed slot and stamps the release time.
    pub fn free_reservation(&mut self, id: ReservationId, now: Duration) -> bool {
        let Some(reservation) = self.reservations.get_mut(&id) else {
            return false;
        };
        reservation.state = MarkerState::Free;
        reservation.last_free_time = Some(now);
        true
    }

    /// Counts free slots of type `marker` in `area`, or region-wide.
    ///
    /// Blackout zones are ignored and no respawn delay applies.
    #[must_use]
    pub fn calc_free_reservation(&self, marker: PrototypeId, area: Option<AreaId>) -> usize {
        self.count_reservations(marker, area, SpawnFlags::IGNORE_BLACKOUT)
    }

    /// Counts free slots of type `marker` passing `flags`.
    #[must_use]
    pub fn count_reservations(
        &self,
        marker: PrototypeId,
        area: Option<AreaId>,
        flags: SpawnFlags,
    ) -> usize {
        let bucket = match area {
            Some(area) => self.area_lookup.get(&area).and_then(|map| map.get(&marker)),
            None => self.region_lookup.get(&marker),
        };
        bucket.map_or(0, |ids| {
            ids.iter()
                .filter_map(|id| self.reservations.get(id))
                .filter(|reservation| reservation.test(flags, None, true))
                .count()
        })
    }

    /// Marks the slots inside `zone` as covered by one more blackout zone.
    pub fn add_blackout_zone(&mut self, zone: &BlackOutZone) {
        for id in self.ids_touching(&zone.sphere) {
            if let Some(reservation) = self.reservations.get_mut(&id) {
                reservation.blackout_count += 1;
            }
        }
    }

    /// Reverts [`SpawnMarkerRegistry::add_blackout_zone`].
    pub fn remove_blackout_zone(&mut self, zone: &BlackOutZone) {
        for id in self.ids_touching(&zone.sphere) {
            if let Some(reservation) = self.reservations.get_mut(&id) {
                reservation.blackout_count = reservation.blackout_count.saturating_sub(1);
            }
        }
    }

    fn ids_touching(&self, sphere: &Sphere) -> Vec<ReservationId> {
        let radius = self.config.reservation_radius;
        let mut candidates = Vec::new();
        self.tree.query(&sphere.aabb(), &mut candidates);
        candidates.retain(|id| {
            self.reservations
                .get(id)
                .is_some_and(|reservation| reservation.sphere(radius).intersects(sphere))
        });
        candidates
    }

    /// Updates simulation state of the slots in `cell`.
    ///
    /// With no players the slots lose their simulated mark and their release
    /// time. The first player marks them simulated.
    pub fn on_simulation(&mut self, cell: CellId, players: u32) {
        let ids: Vec<ReservationId> = self
            .cell_lookup
            .get(&cell)
            .map(|buckets| buckets.values().flatten().copied().collect())
            .unwrap_or_default();
        for id in ids {
            let Some(reservation) = self.reservations.get_mut(&id) else {
                continue;
            };
            match players {
                0 => {
                    reservation.simulated = false;
                    reservation.last_free_time = None;
                }
                1 => reservation.simulated = true,
                _ => {}
            }
        }
    }

    /// Looks up a slot.
    #[must_use]
    pub fn reservation(&self, id: ReservationId) -> Option<&SpawnReservation> {
        self.reservations.get(&id)
    }

    /// Looks up a slot by its packed identifier.
    #[must_use]
    pub fn reservation_by_pid(&self, pid: u64) -> Option<&SpawnReservation> {
        self.reservations.get(&ReservationId::from_pid(pid)?)
    }

    /// Slots whose volume overlaps `volume`, in identifier order.
    #[must_use]
    pub fn reservations_in_volume(&self, volume: &Aabb) -> Vec<&SpawnReservation> {
        let mut ids = Vec::new();
        self.tree.query(volume, &mut ids);
        ids.iter()
            .filter_map(|id| self.reservations.get(id))
            .collect()
    }

    /// Region positions of every slot of type `marker`.
    #[must_use]
    pub fn positions_by_marker(&self, marker: PrototypeId) -> Vec<Vec3> {
        self.region_lookup.get(&marker).map_or_else(Vec::new, |ids| {
            ids.iter()
                .filter_map(|id| self.reservations.get(id))
                .map(SpawnReservation::position)
                .collect()
        })
    }

    /// Marker types with at least one harvested slot.
    pub fn marker_types(&self) -> impl Iterator<Item = PrototypeId> + '_ {
        self.region_lookup.keys().copied()
    }

    /// Iterates every slot in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &SpawnReservation> {
        self.reservations.values()
    }

    /// Number of harvested slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    /// Reports whether no slot is harvested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    /// Reports whether `id` is present in every lookup it belongs to.
    #[must_use]
    pub fn is_indexed(&self, id: ReservationId) -> bool {
        let Some(reservation) = self.reservations.get(&id) else {
            return false;
        };
        let marker = reservation.marker();
        let in_bucket = |buckets: Option<&MarkerBuckets>| {
            buckets
                .and_then(|map| map.get(&marker))
                .is_some_and(|ids| ids.contains(&id))
        };
        self.region_lookup
            .get(&marker)
            .is_some_and(|ids| ids.contains(&id))
            && in_bucket(self.area_lookup.get(&reservation.area()))
            && in_bucket(self.cell_lookup.get(&id.cell()))
    }
}

fn remove_from_bucket(buckets: &mut MarkerBuckets, marker: PrototypeId, id: ReservationId) {
    if let Some(ids) = buckets.get_mut(&marker) {
        let _ = ids.remove(&id);
        if ids.is_empty() {
            let _ = buckets.remove(&marker);
        }
    }
}
