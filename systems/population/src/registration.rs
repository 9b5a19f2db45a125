//! Spawn event creation and population registration.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use population_core::content::RequiredObject;
use population_core::{
    AreaId, Picker, PrototypeId, RegionView, SpawnEventId, SpawnLocation, SpawnProperties,
};

use crate::event::{SchedulerKey, SpawnEvent, SpawnEventKind};
use crate::manager::{PopulationManager, TimerKind};
use crate::object::PopulationObject;

impl PopulationManager {
    /// Creates an empty spawn event.
    pub fn create_spawn_event(&mut self, kind: SpawnEventKind) -> SpawnEventId {
        let id = SpawnEventId::new(self.next_event);
        self.next_event += 1;
        let _ = self
            .events
            .insert(id, SpawnEvent::new(id, kind, self.config.respawn_delay));
        log::debug!("spawn event {id} created for {kind:?}");
        id
    }

    /// Queues `object` on `event` and schedules the poll that serves it.
    ///
    /// Returns `None` when the event does not exist.
    pub fn add_population_object(
        &mut self,
        event: SpawnEventId,
        mut object: PopulationObject,
    ) -> Option<SchedulerKey> {
        object.event = Some(event);
        let at = object.time.max(self.now);
        let key = self.events.get_mut(&event)?.push_object(object);
        self.schedule_poll(&key, at);
        Some(key)
    }

    /// Schedules an immediate poll of every scheduler `event` owns.
    pub fn schedule_spawn_event(&mut self, event: SpawnEventId) -> bool {
        let Some(owner) = self.events.get(&event) else {
            return false;
        };
        let markers: Vec<PrototypeId> = owner.marker_types().collect();
        let has_locations = owner.locations().next().is_some();
        for marker in markers {
            self.schedule(TimerKind::MarkerPoll(marker), self.now);
        }
        if has_locations {
            self.schedule(TimerKind::LocationPoll, self.now);
        }
        true
    }

    /// Creates the theme population of `area`.
    ///
    /// Enemies are spread over the free floor until the area density is used
    /// up; encounters take a share of the free markers of each marker type.
    /// Returns `None` when the area has no population.
    pub fn generate_area_population(
        &mut self,
        region: &dyn RegionView,
        area: AreaId,
    ) -> Option<SpawnEventId> {
        let catalog = Arc::clone(&self.catalog);
        let descriptor = region.area(area)?;
        let Some(population) = descriptor
            .population
            .and_then(|population| catalog.population(population))
        else {
            log::debug!("area {area} has no population");
            return None;
        };
        let theme = population.themes.first().and_then(|theme| {
            let found = catalog.theme(*theme);
            if found.is_none() {
                log::warn!("[DESIGN] population {} names unknown theme {theme}", population.id);
            }
            found
        });
        let density = self.areas.get(&area).map_or(0.0, |table| table.density);

        let event = self.create_spawn_event(SpawnEventKind::Area(area));
        let location = SpawnLocation::area(area);

        let mut enemies = Picker::new();
        for entry in theme.map(|theme| theme.enemies.as_slice()).unwrap_or_default() {
            enemies.add(entry.prototype, entry.weight);
        }
        let mut remaining = density;
        while remaining > 0.0 {
            let Some(object) = enemies.pick(&mut self.spawn_rng).copied() else {
                break;
            };
            remaining -= catalog.average_size(object);
            let mut request = PopulationObject::new(object, Some(event));
            request.location = location.clone();
            let _ = self.add_population_object(event, request);
        }

        let mut by_marker: BTreeMap<PrototypeId, Picker<PrototypeId>> = BTreeMap::new();
        let encounters = population
            .global_encounters
            .iter()
            .chain(theme.map(|theme| theme.encounters.as_slice()).unwrap_or_default());
        for entry in encounters {
            let Some(marker) = catalog
                .object(entry.prototype)
                .and_then(|object| object.use_population_marker)
            else {
                log::warn!(
                    "[DESIGN] encounter {} has no population marker",
                    entry.prototype
                );
                continue;
            };
            by_marker
                .entry(marker)
                .or_insert_with(Picker::new)
                .add(entry.prototype, entry.weight);
        }
        for (marker, picker) in by_marker {
            let slots = self.registry.calc_free_reservation(marker, Some(area));
            if slots == 0 {
                continue;
            }
            let Some(object) = picker.pick(&mut self.spawn_rng).copied() else {
                continue;
            };
            let share = (slots as f32 * population.encounter_density(marker) / 100.0) as usize;
            for _ in 0..share.max(1) {
                let mut request = PopulationObject::new(object, Some(event));
                request.marker = Some(marker);
                request.location = location.clone();
                let _ = self.add_population_object(event, request);
            }
        }

        log::info!(
            "area {area} population queued {} requests",
            self.events.get(&event).map_or(0, SpawnEvent::pending_count)
        );
        Some(event)
    }

    /// Queues the population a mission requires.
    ///
    /// Entries restricted to areas absent from `region` are skipped. Returns
    /// `None` for an unknown mission or one without population.
    pub fn add_mission_population(
        &mut self,
        region: &dyn RegionView,
        mission: PrototypeId,
    ) -> Option<SpawnEventId> {
        let catalog = Arc::clone(&self.catalog);
        let Some(prototype) = catalog.mission(mission) else {
            log::warn!("mission {mission} is missing from the catalog");
            return None;
        };
        if prototype.population.is_empty() {
            return None;
        }
        let present = region.area_ids();
        let critical = prototype.is_critical();
        let event = self.create_spawn_event(SpawnEventKind::Mission(mission));
        for entry in &prototype.population {
            if !entry.restrict_areas.is_empty()
                && !entry.restrict_areas.iter().any(|area| present.contains(area))
            {
                log::debug!(
                    "mission {mission} entry {} is restricted to other regions",
                    entry.object
                );
                continue;
            }
            let marker = catalog
                .object(entry.object)
                .and_then(|object| object.use_population_marker);
            let location = SpawnLocation::restricted(
                entry.restrict_areas.iter().copied(),
                entry.restrict_cells.iter().copied(),
            );
            for _ in 0..entry.count {
                let mut request = PopulationObject::new(entry.object, Some(event));
                request.marker = marker;
                request.critical = critical;
                request.location = location.clone();
                request.properties = SpawnProperties::for_mission(Some(mission));
                let _ = self.add_population_object(event, request);
            }
        }
        Some(event)
    }

    /// Queues scripted objects, picked in random order.
    ///
    /// Objects with a positive density get a count proportional to the floor
    /// of their location.
    pub fn add_required_objects(
        &mut self,
        region: &dyn RegionView,
        objects: &[RequiredObject],
        location: SpawnLocation,
    ) -> SpawnEventId {
        let catalog = Arc::clone(&self.catalog);
        let event = self.create_spawn_event(SpawnEventKind::Scripted);

        let mut picker = Picker::new();
        for index in 0..objects.len() {
            picker.add(index, 1);
        }
        while let Some(index) = picker.pick_remove(&mut self.spawn_rng) {
            let Some(required) = objects.get(index) else {
                continue;
            };
            let object_location = if required.restrict_areas.is_empty()
                && required.restrict_cells.is_empty()
            {
                location.clone()
            } else {
                SpawnLocation::restricted(
                    required.restrict_areas.iter().copied(),
                    required.restrict_cells.iter().copied(),
                )
            };
            let count = if required.density > 0.0 && self.config.cluster_area > 0.0 {
                let spawnable = spawnable_area(region, &object_location);
                (required.density / catalog.average_size(required.object) * spawnable
                    / self.config.cluster_area) as u32
            } else {
                required.count
            };
            let marker = catalog
                .object(required.object)
                .and_then(|object| object.use_population_marker);
            for _ in 0..count {
                let mut request = PopulationObject::new(required.object, Some(event));
                request.marker = marker;
                request.critical = required.critical;
                request.location = object_location.clone();
                let _ = self.add_population_object(event, request);
            }
        }
        event
    }

    /// Queues a destroyed group's request on `event` again, due after `delay`.
    pub(crate) fn requeue(&mut self, event: SpawnEventId, mut object: PopulationObject, delay: Duration) {
        object.group = None;
        object.time = self.now + delay;
        let _ = self.add_population_object(event, object);
    }
}

/// Navigable floor of the cells `location` allows.
fn spawnable_area(region: &dyn RegionView, location: &SpawnLocation) -> f32 {
    region
        .cell_ids()
        .into_iter()
        .filter_map(|cell| region.cell(cell))
        .filter(|cell| location.spawnable_cell(cell.id, cell.area))
        .map(|cell| cell.spawnable_area)
        .sum()
}
