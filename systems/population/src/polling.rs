//! Scheduler polls and the build, place and spawn pipeline they drive.

use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;
use population_core::content::PopulationRider;
use population_core::{
    geometry, ClusterObjectFlags, EntityHost, EntityId, EntitySettings, Event, PrototypeId,
    RegionView, ReservationId, SpawnError, SpawnEventId, SpawnFlags, SpawnGroupId,
    SpawnProperties, SpawnSpecId, SpawnState, Transform,
};
use population_system_cluster::{ClusterTree, PlacementScene, SpawnTarget};

use crate::density::pick_spawn_cell;
use crate::event::{SchedulerKey, SpawnEvent};
use crate::group::{SpawnGroup, SpawnSpec};
use crate::manager::{PopulationManager, RequestTarget, SpawnRequest, TimerKind};
use crate::object::{PopulationObject, SpawnScheduler};

/// Level used when a cell's area is unknown.
const FALLBACK_LEVEL: u32 = 1;

pub(crate) fn phase_bit(phase: u32) -> u32 {
    1_u32.checked_shl(phase).unwrap_or(0)
}

impl PopulationManager {
    /// Builds, places and spawns one population object right away.
    ///
    /// # Errors
    ///
    /// Returns the error of the failing stage: a missing prototype, an empty
    /// or malformed cluster, no free marker slot or no valid placement.
    pub fn spawn_object(
        &mut self,
        request: &SpawnRequest,
        region: &dyn RegionView,
        host: &mut dyn EntityHost,
        out: &mut Vec<Event>,
    ) -> Result<SpawnGroupId, SpawnError> {
        let mut object = PopulationObject::new(request.object, None);
        object.properties = request.properties.clone();
        object.flags = request.flags;
        object.cleanup = request.cleanup;
        match &request.target {
            RequestTarget::Marker { marker, location } => {
                object.marker = Some(*marker);
                object.location = location.clone();
            }
            RequestTarget::Spawner { entity, .. } => object.spawner = Some(*entity),
            RequestTarget::Bounds(_) | RequestTarget::Position(_) => {}
        }
        self.spawn_cluster(object, &request.target, region, host, out)
    }

    pub(crate) fn spawn_cluster(
        &mut self,
        object: PopulationObject,
        target: &RequestTarget,
        region: &dyn RegionView,
        host: &mut dyn EntityHost,
        out: &mut Vec<Event>,
    ) -> Result<SpawnGroupId, SpawnError> {
        let catalog = Arc::clone(&self.catalog);
        let mut tree = ClusterTree::build(
            &catalog,
            object.object,
            &object.properties,
            object.flags,
            &mut self.spawn_rng,
        )
        .and_then(|mut tree| tree.initialize(&catalog).map(|()| tree))
        .map_err(|err| {
            log::warn!("cluster of {} cannot be built: {err}", object.object);
            err
        })?;

        let respawn_delay = object
            .event
            .and_then(|event| self.events.get(&event))
            .map_or(self.config.respawn_delay, SpawnEvent::respawn_delay);
        let mut reservation = None;
        let spawn_target = match target {
            RequestTarget::Marker { marker, location } => {
                let id = self
                    .registry
                    .reserve_free_reservation(
                        *marker,
                        &mut self.spawn_rng,
                        self.now,
                        location,
                        tree.spawn_flags(),
                        respawn_delay,
                    )
                    .ok_or(SpawnError::NoReservation)?;
                let Some(slot) = self.registry.reservation(id) else {
                    return Err(SpawnError::NoReservation);
                };
                let spawn_target = SpawnTarget::Marker {
                    position: slot.position(),
                    yaw: slot.yaw(),
                };
                reservation = Some(id);
                tree.set_reservation(reservation);
                spawn_target
            }
            RequestTarget::Spawner {
                position,
                yaw,
                min_distance,
                max_distance,
                facing,
                ..
            } => SpawnTarget::Spawner {
                position: *position,
                yaw: *yaw,
                min_distance: *min_distance,
                max_distance: *max_distance,
                facing: *facing,
            },
            RequestTarget::Bounds(bounds) => SpawnTarget::Bounds(*bounds),
            RequestTarget::Position(position) => SpawnTarget::Position(*position),
        };

        let scene = PlacementScene {
            region,
            blackouts: &self.blackouts,
            host: &*host,
        };
        if let Err(err) = tree.try_place(&spawn_target, &scene, &mut self.spawn_rng) {
            if let Some(id) = reservation {
                let _ = self.registry.free_reservation(id, self.now);
            }
            log::warn!("no placement for {} at {spawn_target:?}: {err}", object.object);
            return Err(err);
        }
        Ok(self.materialize(tree, object, reservation, region, host, out))
    }

    /// Turns a placed cluster into a group with one spec per entity leaf.
    fn materialize(
        &mut self,
        mut tree: ClusterTree,
        mut object: PopulationObject,
        reservation: Option<ReservationId>,
        region: &dyn RegionView,
        host: &mut dyn EntityHost,
        out: &mut Vec<Event>,
    ) -> SpawnGroupId {
        let id = SpawnGroupId::new(self.next_group);
        self.next_group += 1;

        let transform = tree.absolute_transform(tree.root());
        let origin = transform.position();
        let (encounter, encounter_blackout, root_mission) = tree
            .root_group()
            .map_or((None, None, None), |root| {
                (root.encounter(), root.blackout(), root.mission())
            });
        let mission = object.mission().or(root_mission);
        let cleanup = object.cleanup || tree.spawn_flags().contains(SpawnFlags::CLEANUP);

        let region_bounds = region.bounds();
        let mut specs = Vec::new();
        let mut hostile_count = 0.0;
        for leaf in tree.leaves() {
            let absolute = tree.absolute_position(leaf);
            let position = if region_bounds.contains_xy(absolute) {
                tree.project_to_floor(leaf, region.navi()).unwrap_or(absolute)
            } else {
                origin
            };
            let yaw = tree.absolute_transform(leaf).yaw();
            let Some(node) = tree.node(leaf) else {
                continue;
            };
            let Some(entity) = node.as_entity() else {
                continue;
            };
            if node.flags().contains(ClusterObjectFlags::HOSTILE) {
                hostile_count += 1.0;
            }

            let mut properties = tree
                .parent_group(leaf)
                .map(|group| group.properties().clone())
                .unwrap_or_default();
            properties.rank = entity.rank().or(properties.rank);
            properties.modifiers.extend(entity.modifiers().iter().copied());
            properties.mission = mission;
            properties.encounter = encounter.or(properties.encounter);

            let spec_id = SpawnSpecId::new(self.next_spec);
            self.next_spec += 1;
            let relative = geometry::rotate_z(position - origin, -transform.yaw());
            let spec = SpawnSpec {
                id: spec_id,
                group: id,
                entity: entity.entity(),
                transform: Transform::new(relative, yaw - transform.yaw()),
                properties,
                state: SpawnState::Pending,
                encounter_phase: entity.encounter_phase(),
                snap_to_floor: entity.snap_to_floor(),
                half_height: entity.bounds().map_or(0.0, |bounds| bounds.half_height),
                active_entity: None,
                spawned_at: None,
            };
            let _ = self.specs.insert(spec_id, spec);
            specs.push(spec_id);
        }

        let placed_cell = region
            .cell_at(origin)
            .and_then(|cell| region.cell(cell).map(|descriptor| (descriptor.area, cell)));
        if let Some((area, cell)) = placed_cell {
            if let Some(population_area) = self.areas.get_mut(&area) {
                population_area.adjust_weight(cell, hostile_count);
            }
        }

        let prototype = object.object;
        let event = object.event;
        let spawner = object.spawner;
        object.group = Some(id);
        let group = SpawnGroup {
            id,
            transform,
            state: SpawnState::Live,
            specs: specs.clone(),
            object: prototype,
            population_object: Some(object),
            event,
            encounter,
            mission,
            spawner,
            reservation,
            blackouts: Vec::new(),
            cleanup,
            placed_cell,
            hostile_count,
        };
        let _ = self.groups.insert(id, group);
        if let Some(owner) = event.and_then(|event| self.events.get_mut(&event)) {
            owner.set_spawn_data(id, []);
        }
        out.push(Event::SpawnGroupCreated {
            group: id,
            object: Some(prototype),
            event,
        });
        log::debug!(
            "group {id} of {prototype} placed at {origin} with {} specs",
            specs.len()
        );

        for spec in specs {
            match self.activate_spec(spec, region, host, out) {
                Ok(_) | Err(SpawnError::EncounterPhaseLocked) => {}
                Err(err) => log::debug!("spec {spec} of group {id} stays pending: {err}"),
            }
        }

        let mut zones = Vec::new();
        let catalog = Arc::clone(&self.catalog);
        let riders = catalog
            .object(prototype)
            .map(|object| object.riders.as_slice())
            .unwrap_or_default();
        for rider in riders {
            if let PopulationRider::BlackOut { zone } = rider {
                zones.push((*zone, origin));
            }
        }
        if let Some((zone, offset)) = encounter_blackout {
            let position = transform.compose(&Transform::new(offset, 0.0)).position();
            zones.push((zone, position));
        }
        let mut blackouts = Vec::new();
        for (zone, position) in zones {
            let Some(prototype) = catalog.blackout(zone) else {
                log::warn!("{}", SpawnError::MissingPrototype(zone));
                continue;
            };
            if let Some(blackout) = self.spawn_blackout_zone(position, prototype.radius, mission) {
                blackouts.push(blackout);
            }
        }
        if let Some(group) = self.groups.get_mut(&id) {
            group.blackouts = blackouts;
        }
        id
    }

    pub(crate) fn phase_armed(
        &self,
        phase: u32,
        encounter: Option<PrototypeId>,
        mission: Option<PrototypeId>,
    ) -> bool {
        if phase == 0 {
            return true;
        }
        let Some(encounter) = encounter else {
            return true;
        };
        self.encounter_phases
            .get(&(encounter, mission))
            .is_some_and(|mask| mask & phase_bit(phase) != 0)
    }

    /// Creates the entity of a pending spec.
    pub(crate) fn activate_spec(
        &mut self,
        spec_id: SpawnSpecId,
        region: &dyn RegionView,
        host: &mut dyn EntityHost,
        out: &mut Vec<Event>,
    ) -> Result<EntityId, SpawnError> {
        let spec = self
            .specs
            .get(&spec_id)
            .ok_or(SpawnError::MissingSpawnSpec(spec_id))?;
        let group = self
            .groups
            .get(&spec.group)
            .ok_or(SpawnError::MissingSpawnGroup(spec.group))?;
        if spec.state != SpawnState::Pending {
            return Err(SpawnError::InvalidTransition {
                from: spec.state,
                to: SpawnState::Live,
            });
        }
        if !self.phase_armed(spec.encounter_phase, group.encounter, group.mission) {
            return Err(SpawnError::EncounterPhaseLocked);
        }

        let transform = group.transform.compose(&spec.transform);
        let position = transform.position();
        let Some((cell, area)) = region
            .cell_at(position)
            .and_then(|cell| region.cell(cell).map(|descriptor| (cell, descriptor.area)))
        else {
            log::warn!("no cell at {position} for spec {spec_id}");
            return Err(SpawnError::NoCell(position));
        };
        let level = region
            .area(area)
            .map_or(FALLBACK_LEVEL, |descriptor| descriptor.level);

        let mut properties = spec.properties.clone();
        properties.merge_from(&SpawnProperties {
            group: Some(group.id),
            cluster: Some(group.object),
            level: Some(level),
            ..SpawnProperties::default()
        });
        let settings = EntitySettings {
            prototype: spec.entity,
            position: position + Vec3::Z * spec.half_height,
            yaw: transform.yaw(),
            cell,
            area,
            level: properties.level.unwrap_or(level),
            properties,
            group: group.id,
            spec: spec_id,
            snap_to_floor: spec.snap_to_floor.unwrap_or(true),
            spawner: group.spawner,
        };
        let (group_id, event) = (group.id, group.event);

        let entity = host.create_entity(&settings).map_err(|err| {
            log::warn!("spec {spec_id} of group {group_id} stays pending: {err}");
            err
        })?;
        if let Some(spec) = self.specs.get_mut(&spec_id) {
            spec.transition(SpawnState::Live)?;
            spec.active_entity = Some(entity);
            spec.spawned_at = Some(self.now);
        }
        if let Some(owner) = event.and_then(|event| self.events.get_mut(&event)) {
            owner.set_spawn_data(group_id, [entity]);
        }
        out.push(Event::EntitySpawned {
            group: group_id,
            spec: spec_id,
            entity,
        });
        Ok(entity)
    }

    fn scheduler_mut(
        &mut self,
        event: SpawnEventId,
        key: &SchedulerKey,
    ) -> Option<&mut SpawnScheduler> {
        self.events.get_mut(&event)?.scheduler_mut(key)
    }

    fn pop_due(
        &mut self,
        event: SpawnEventId,
        key: &SchedulerKey,
        critical: bool,
    ) -> Option<PopulationObject> {
        let now = self.now;
        let scheduler = self.scheduler_mut(event, key)?;
        if !scheduler.can_spawn(now, critical) {
            return None;
        }
        scheduler.pop(critical)
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_scheduled(
        &mut self,
        event: SpawnEventId,
        key: &SchedulerKey,
        object: PopulationObject,
        target: &RequestTarget,
        region: &dyn RegionView,
        host: &mut dyn EntityHost,
        out: &mut Vec<Event>,
    ) {
        match self.spawn_cluster(object.clone(), target, region, host, out) {
            Ok(group) => {
                if let Some(scheduler) = self.scheduler_mut(event, key) {
                    scheduler.record_spawned(group);
                }
            }
            Err(err) => {
                log::debug!("{} of event {event} parked: {err}", object.object);
                if let Some(scheduler) = self.scheduler_mut(event, key) {
                    scheduler.add_failed_object(object);
                }
            }
        }
    }

    /// Requeues parked requests and reports completed events.
    fn finish_poll(&mut self, polled: &[(SpawnEventId, SchedulerKey)], out: &mut Vec<Event>) {
        for (event_id, key) in polled {
            let Some(event) = self.events.get_mut(event_id) else {
                continue;
            };
            if let Some(scheduler) = event.scheduler_mut(key) {
                scheduler.push_failed_objects();
            }
            if event.take_completion() {
                log::info!("spawn event {event_id} has spawned its population");
                out.push(Event::PopulationSpawned {
                    event: *event_id,
                    mission: event.mission(),
                });
            }
        }
    }

    /// Next poll time: the earliest future due time, capped at `interval`.
    fn next_poll(&self, due: Option<Duration>, interval: Duration) -> Option<Duration> {
        let due = due?;
        let cap = self.now + interval;
        Some(if due > self.now { due.min(cap) } else { cap })
    }

    pub(crate) fn marker_poll(
        &mut self,
        marker: PrototypeId,
        region: &dyn RegionView,
        host: &mut dyn EntityHost,
        out: &mut Vec<Event>,
    ) {
        let key = SchedulerKey::Marker(marker);
        let polled: Vec<(SpawnEventId, SchedulerKey)> = self
            .events
            .values()
            .filter(|event| event.scheduler(&key).is_some())
            .map(|event| (event.id(), key.clone()))
            .collect();
        log::trace!("marker poll of {marker} over {} events", polled.len());

        for critical in [true, false] {
            for (event, _) in &polled {
                while self.registry.calc_free_reservation(marker, None) > 0 {
                    let Some(object) = self.pop_due(*event, &key, critical) else {
                        break;
                    };
                    let target = RequestTarget::Marker {
                        marker,
                        location: object.location.clone(),
                    };
                    self.spawn_scheduled(*event, &key, object, &target, region, host, out);
                }
            }
        }
        self.finish_poll(&polled, out);

        let due = self
            .events
            .values()
            .filter_map(|event| event.scheduler(&key))
            .filter_map(SpawnScheduler::min_event_time)
            .min();
        if let Some(at) = self.next_poll(due, self.config.marker_poll_interval) {
            self.schedule(TimerKind::MarkerPoll(marker), at);
        }
    }

    pub(crate) fn location_poll(
        &mut self,
        region: &dyn RegionView,
        host: &mut dyn EntityHost,
        out: &mut Vec<Event>,
    ) {
        let polled: Vec<(SpawnEventId, SchedulerKey)> = self
            .events
            .values()
            .flat_map(|event| {
                event
                    .locations()
                    .map(move |location| (event.id(), SchedulerKey::Location(location.clone())))
            })
            .collect();
        log::trace!("location poll over {} schedulers", polled.len());

        for (event, key) in &polled {
            loop {
                let Some(object) = self
                    .pop_due(*event, key, true)
                    .or_else(|| self.pop_due(*event, key, false))
                else {
                    break;
                };
                let cell = pick_spawn_cell(self.areas.values(), &object.location, &mut self.spawn_rng);
                match cell {
                    Some((_, _, bounds)) => {
                        let target = RequestTarget::Bounds(bounds);
                        self.spawn_scheduled(*event, key, object, &target, region, host, out);
                    }
                    None => {
                        log::debug!("no spawn cell has room for {}", object.object);
                        if let Some(scheduler) = self.scheduler_mut(*event, key) {
                            scheduler.add_failed_object(object);
                        }
                    }
                }
            }
        }
        self.finish_poll(&polled, out);

        let due = polled
            .iter()
            .filter_map(|(event, key)| self.events.get(event)?.scheduler(key)?.min_event_time())
            .min();
        if let Some(at) = self.next_poll(due, self.config.location_poll_interval) {
            self.schedule(TimerKind::LocationPoll, at);
        }
    }
}
