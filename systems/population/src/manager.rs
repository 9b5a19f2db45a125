//! The population manager: owner of every spawn event, group and timer.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;
use population_core::{
    Aabb, AreaId, BlackOutId, Catalog, CellId, EntityHost, EntityId, Event, FormationFacing,
    PrototypeId, RegionView, SpawnEventId, SpawnFlags, SpawnGroupId, SpawnLocation,
    SpawnProperties, SpawnSpecId, SpawnState,
};
use population_system_markers::{RegistryConfig, SpawnMarkerRegistry};
use population_system_spatial::{BlackOutZones, QuadtreeConfig};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::PopulationConfig;
use crate::density::PopulationArea;
use crate::event::{SchedulerKey, SpawnEvent};
use crate::group::{SpawnGroup, SpawnSpec};

/// Deferred work owned by the manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum TimerKind {
    MarkerPoll(PrototypeId),
    LocationPoll,
    ClearCluster(SpawnGroupId),
    DestroyEntity(EntityId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Timer {
    at: Duration,
    sequence: u64,
    kind: TimerKind,
}

/// Where a direct spawn should be placed.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestTarget {
    /// A free marker slot of one type inside a location.
    Marker {
        /// Marker type.
        marker: PrototypeId,
        /// Areas and cells the slot may lie in.
        location: SpawnLocation,
    },
    /// Around a spawner entity.
    Spawner {
        /// Spawner the entities report to.
        entity: EntityId,
        /// Spawner position.
        position: Vec3,
        /// Spawner yaw.
        yaw: f32,
        /// Inner radius of the search annulus.
        min_distance: f32,
        /// Outer radius of the search annulus.
        max_distance: f32,
        /// Facing applied to the cluster.
        facing: FormationFacing,
    },
    /// Anywhere inside a box.
    Bounds(Aabb),
    /// Near a position.
    Position(Vec3),
}

/// Immediate spawn of one population object.
#[derive(Clone, Debug, PartialEq)]
pub struct SpawnRequest {
    /// Population object prototype.
    pub object: PrototypeId,
    /// Placement target.
    pub target: RequestTarget,
    /// Properties handed to the cluster.
    pub properties: SpawnProperties,
    /// Placement switches.
    pub flags: SpawnFlags,
    /// Whether the group is removed once its cluster is cleared.
    pub cleanup: bool,
}

impl SpawnRequest {
    /// Request without properties or flags.
    #[must_use]
    pub fn new(object: PrototypeId, target: RequestTarget) -> Self {
        Self {
            object,
            target,
            properties: SpawnProperties::default(),
            flags: SpawnFlags::empty(),
            cleanup: false,
        }
    }
}

/// Schedules, places and tracks the population of one region.
#[derive(Debug)]
pub struct PopulationManager {
    pub(crate) config: PopulationConfig,
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) spawn_rng: ChaCha8Rng,
    pub(crate) respawn_rng: ChaCha8Rng,
    pub(crate) now: Duration,
    pub(crate) registry: SpawnMarkerRegistry,
    pub(crate) blackouts: BlackOutZones,
    pub(crate) groups: BTreeMap<SpawnGroupId, SpawnGroup>,
    pub(crate) specs: BTreeMap<SpawnSpecId, SpawnSpec>,
    pub(crate) events: BTreeMap<SpawnEventId, SpawnEvent>,
    pub(crate) areas: BTreeMap<AreaId, PopulationArea>,
    pub(crate) encounter_phases: BTreeMap<(PrototypeId, Option<PrototypeId>), u32>,
    timers: BinaryHeap<Reverse<Timer>>,
    pending_timers: BTreeMap<TimerKind, Duration>,
    timer_sequence: u64,
    pub(crate) next_group: u64,
    pub(crate) next_spec: u64,
    pub(crate) next_event: u64,
}

impl PopulationManager {
    /// Creates a manager for `region`. Markers are harvested by
    /// [`PopulationManager::initialize`].
    #[must_use]
    pub fn new(config: PopulationConfig, catalog: Arc<Catalog>, region: &dyn RegionView) -> Self {
        let bounds = region.bounds();
        let registry_config = RegistryConfig::new(config.reservation_radius, QuadtreeConfig::default());
        Self {
            spawn_rng: ChaCha8Rng::seed_from_u64(config.spawn_seed()),
            respawn_rng: ChaCha8Rng::seed_from_u64(config.respawn_seed()),
            config,
            catalog,
            now: Duration::ZERO,
            registry: SpawnMarkerRegistry::new(bounds, registry_config),
            blackouts: BlackOutZones::new(bounds, QuadtreeConfig::default()),
            groups: BTreeMap::new(),
            specs: BTreeMap::new(),
            events: BTreeMap::new(),
            areas: BTreeMap::new(),
            encounter_phases: BTreeMap::new(),
            timers: BinaryHeap::new(),
            pending_timers: BTreeMap::new(),
            timer_sequence: 0,
            next_group: 1,
            next_spec: 1,
            next_event: 1,
        }
    }

    /// Harvests the marker registry and builds the spawn-cell tables.
    pub fn initialize(&mut self, region: &dyn RegionView) {
        self.registry.initialize(region, &self.catalog);
        let catalog = &self.catalog;
        let cluster_area = self.config.cluster_area;
        self.areas = region
            .area_ids()
            .into_iter()
            .filter_map(|id| {
                let descriptor = region.area(id)?;
                let density = descriptor
                    .population
                    .and_then(|population| catalog.population(population))
                    .map(|population| {
                        (
                            population.cluster_density_pct,
                            population.cluster_density_peak_pct,
                        )
                    });
                let cells = descriptor
                    .cells
                    .iter()
                    .filter_map(|cell| region.cell(*cell).cloned());
                Some((id, PopulationArea::new(descriptor, cells, cluster_area, density)))
            })
            .collect();
        log::debug!(
            "population manager initialised {} areas and {} reservations",
            self.areas.len(),
            self.registry.len()
        );
    }

    /// Harvests a cell that was added to the region.
    pub fn add_cell(&mut self, region: &dyn RegionView, cell: CellId) {
        self.registry.add_cell(region, &self.catalog, cell);
        if let Some(descriptor) = region.cell(cell) {
            if let Some(area) = self.areas.get_mut(&descriptor.area) {
                area.add_cell(descriptor);
            }
        }
    }

    /// Forgets a cell that was removed from the region.
    pub fn remove_cell(&mut self, cell: CellId) {
        self.registry.remove_cell(cell);
        for area in self.areas.values_mut() {
            area.remove_cell(cell);
        }
    }

    /// Moves the clock by `dt` and fires every timer due by then, in time order.
    pub fn advance(
        &mut self,
        dt: Duration,
        region: &dyn RegionView,
        host: &mut dyn EntityHost,
        out: &mut Vec<Event>,
    ) {
        let target = self.now + dt;
        while let Some(Reverse(timer)) = self.timers.peek() {
            if timer.at > target {
                break;
            }
            let Some(Reverse(timer)) = self.timers.pop() else {
                break;
            };
            if self.pending_timers.get(&timer.kind) != Some(&timer.at) {
                continue;
            }
            let _ = self.pending_timers.remove(&timer.kind);
            self.now = self.now.max(timer.at);
            self.fire(timer.kind, region, host, out);
        }
        self.now = target;
    }

    fn fire(
        &mut self,
        kind: TimerKind,
        region: &dyn RegionView,
        host: &mut dyn EntityHost,
        out: &mut Vec<Event>,
    ) {
        match kind {
            TimerKind::MarkerPoll(marker) => self.marker_poll(marker, region, host, out),
            TimerKind::LocationPoll => self.location_poll(region, host, out),
            TimerKind::ClearCluster(group) => self.on_clear_cluster(group, host, out),
            TimerKind::DestroyEntity(entity) => host.destroy_entity(entity),
        }
    }

    /// Schedules `kind` at `at` unless it is already pending at that time or sooner.
    pub(crate) fn schedule(&mut self, kind: TimerKind, at: Duration) {
        if self
            .pending_timers
            .get(&kind)
            .is_some_and(|pending| *pending <= at)
        {
            return;
        }
        let _ = self.pending_timers.insert(kind, at);
        self.timers.push(Reverse(Timer {
            at,
            sequence: self.timer_sequence,
            kind,
        }));
        self.timer_sequence += 1;
    }

    pub(crate) fn cancel(&mut self, kind: TimerKind) {
        let _ = self.pending_timers.remove(&kind);
    }

    pub(crate) fn schedule_poll(&mut self, key: &SchedulerKey, at: Duration) {
        let kind = match key {
            SchedulerKey::Marker(marker) => TimerKind::MarkerPoll(*marker),
            SchedulerKey::Location(_) => TimerKind::LocationPoll,
        };
        self.schedule(kind, at);
    }

    /// Registers a blackout zone and marks the slots it covers.
    ///
    /// Returns `None` when the zone lies outside the region.
    pub fn spawn_blackout_zone(
        &mut self,
        position: Vec3,
        radius: f32,
        mission: Option<PrototypeId>,
    ) -> Option<BlackOutId> {
        let Some(id) = self.blackouts.add(position, radius, mission) else {
            log::warn!("blackout zone at {position} lies outside the region");
            return None;
        };
        if let Some(zone) = self.blackouts.get(id) {
            self.registry.add_blackout_zone(zone);
        }
        Some(id)
    }

    /// Removes a blackout zone and releases the slots it covered.
    pub fn remove_blackout_zone(&mut self, id: BlackOutId) -> bool {
        let Some(zone) = self.blackouts.remove(id) else {
            return false;
        };
        self.registry.remove_blackout_zone(&zone);
        true
    }

    /// Reports whether a sphere is suppressed for `mission`.
    #[must_use]
    pub fn in_blackout_zone(&self, position: Vec3, radius: f32, mission: Option<PrototypeId>) -> bool {
        self.blackouts.in_blackout_zone(position, radius, mission)
    }

    /// Forwards a change of player presence in `cell` to the registry.
    pub fn on_simulation(&mut self, cell: CellId, players: u32) {
        self.registry.on_simulation(cell, players);
    }

    /// Looks up a group.
    #[must_use]
    pub fn spawn_group(&self, id: SpawnGroupId) -> Option<&SpawnGroup> {
        self.groups.get(&id)
    }

    /// Every group in identifier order.
    pub fn spawn_groups(&self) -> impl Iterator<Item = &SpawnGroup> {
        self.groups.values()
    }

    /// Looks up a spec.
    #[must_use]
    pub fn spawn_spec(&self, id: SpawnSpecId) -> Option<&SpawnSpec> {
        self.specs.get(&id)
    }

    /// Looks up an event.
    #[must_use]
    pub fn spawn_event(&self, id: SpawnEventId) -> Option<&SpawnEvent> {
        self.events.get(&id)
    }

    /// Every active event in identifier order.
    pub fn spawn_events(&self) -> impl Iterator<Item = &SpawnEvent> {
        self.events.values()
    }

    /// Spawn-cell table of an area.
    #[must_use]
    pub fn population_area(&self, area: AreaId) -> Option<&PopulationArea> {
        self.areas.get(&area)
    }

    /// Marker registry.
    #[must_use]
    pub const fn registry(&self) -> &SpawnMarkerRegistry {
        &self.registry
    }

    /// Blackout zone index.
    #[must_use]
    pub const fn blackout_zones(&self) -> &BlackOutZones {
        &self.blackouts
    }

    /// Current simulation time.
    #[must_use]
    pub const fn now(&self) -> Duration {
        self.now
    }

    /// Tuning the manager was created with.
    #[must_use]
    pub const fn config(&self) -> &PopulationConfig {
        &self.config
    }

    /// Entities of every live spec, in spec order.
    #[must_use]
    pub fn live_entities(&self) -> Vec<EntityId> {
        self.specs
            .values()
            .filter(|spec| spec.state == SpawnState::Live)
            .filter_map(|spec| spec.active_entity)
            .collect()
    }
}
