//! Defeat, destruction and respawn of groups, specs and events.

use std::time::Duration;

use population_core::{
    EntityHost, EntityId, Event, PrototypeId, RegionView, SpawnError, SpawnEventId,
    SpawnGroupId, SpawnSpecId, SpawnState,
};
use rand::Rng;

use crate::event::SchedulerKey;
use crate::manager::{PopulationManager, TimerKind};
use crate::polling::phase_bit;

impl PopulationManager {
    /// Records that the entity of a live spec was defeated and schedules a
    /// clear check of its group.
    ///
    /// # Errors
    ///
    /// Fails for an unknown spec or one that is not live.
    pub fn on_defeat(&mut self, spec: SpawnSpecId, out: &mut Vec<Event>) -> Result<(), SpawnError> {
        let slot = self
            .specs
            .get_mut(&spec)
            .ok_or(SpawnError::MissingSpawnSpec(spec))?;
        slot.transition(SpawnState::Defeated)?;
        let (group, entity) = (slot.group, slot.active_entity);
        self.notify_spawner(group, entity, out);
        self.schedule(TimerKind::ClearCluster(group), self.now);
        Ok(())
    }

    fn notify_spawner(&self, group: SpawnGroupId, entity: Option<EntityId>, out: &mut Vec<Event>) {
        let spawner = self.groups.get(&group).and_then(|group| group.spawner);
        if let (Some(spawner), Some(entity)) = (spawner, entity) {
            out.push(Event::SpawnerDefeated {
                spawner,
                group,
                entity,
            });
        }
    }

    /// Removes an entity now, or after the linger time when it is dead.
    fn release_entity(&mut self, entity: EntityId, host: &mut dyn EntityHost) {
        match host.entity_status(entity) {
            None => {}
            Some(status) if status.destroyed => {}
            Some(status) if status.dead => {
                let at = self.now + self.config.dead_entity_linger;
                self.schedule(TimerKind::DestroyEntity(entity), at);
            }
            Some(_) => host.destroy_entity(entity),
        }
    }

    fn destroy_spec(&mut self, id: SpawnSpecId, host: &mut dyn EntityHost, out: &mut Vec<Event>) {
        let Some(spec) = self.specs.get_mut(&id) else {
            return;
        };
        let was = spec.state;
        if matches!(was, SpawnState::Destroyed | SpawnState::Respawning) {
            return;
        }
        if spec.transition(SpawnState::Destroyed).is_err() {
            return;
        }
        let entity = spec.active_entity.take();
        let group = spec.group;
        if was == SpawnState::Live {
            self.notify_spawner(group, entity, out);
        }
        if let Some(entity) = entity {
            self.release_entity(entity, host);
        }
        let group_alive = self
            .groups
            .get(&group)
            .is_some_and(|group| group.state != SpawnState::Destroyed);
        if was == SpawnState::Live && group_alive {
            self.schedule(TimerKind::ClearCluster(group), self.now);
        }
    }

    fn respawn_spec(
        &mut self,
        id: SpawnSpecId,
        region: &dyn RegionView,
        host: &mut dyn EntityHost,
        out: &mut Vec<Event>,
    ) -> Result<EntityId, SpawnError> {
        let spec = self.specs.get_mut(&id).ok_or(SpawnError::MissingSpawnSpec(id))?;
        if spec.state != SpawnState::Pending {
            spec.transition(SpawnState::Respawning)?;
            let entity = spec.active_entity.take();
            spec.spawned_at = None;
            spec.transition(SpawnState::Pending)?;
            if let Some(entity) = entity {
                self.release_entity(entity, host);
            }
        }
        self.activate_spec(id, region, host, out)
    }

    fn respawn_jitter(&mut self) -> Duration {
        let max = u64::try_from(self.config.respawn_jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(self.respawn_rng.gen_range(0..=max))
    }

    /// Destroys a group: releases its slot and blackout zones, queues its
    /// object again when the owning event respawns objects, retires every
    /// spec and detaches the group from its event.
    ///
    /// Returns `false` when the group does not exist, which makes repeated
    /// calls harmless.
    pub fn destroy_spawn_group(
        &mut self,
        id: SpawnGroupId,
        host: &mut dyn EntityHost,
        out: &mut Vec<Event>,
    ) -> bool {
        let Some(group) = self.groups.get_mut(&id) else {
            return false;
        };
        if group.state == SpawnState::Destroyed {
            return false;
        }
        group.state = SpawnState::Destroyed;
        let reservation = group.reservation.take();
        let blackouts = std::mem::take(&mut group.blackouts);
        let object = group.population_object.take();
        let (event, placed_cell, hostile_count) = (group.event, group.placed_cell, group.hostile_count);
        let specs = group.specs.clone();
        self.cancel(TimerKind::ClearCluster(id));

        if let Some(reservation) = reservation {
            let _ = self.registry.free_reservation(reservation, self.now);
        }
        for blackout in blackouts {
            let _ = self.remove_blackout_zone(blackout);
        }
        if let Some((area, cell)) = placed_cell {
            if let Some(table) = self.areas.get_mut(&area) {
                table.adjust_weight(cell, -hostile_count);
            }
        }
        let respawn = event
            .and_then(|event| self.events.get(&event))
            .filter(|owner| owner.respawn_object())
            .map(|owner| owner.respawn_delay());
        if let (Some(event), Some(object), Some(delay)) = (event, object, respawn) {
            let delay = delay + self.respawn_jitter();
            log::debug!("{} of group {id} queued again in {delay:?}", object.object);
            self.requeue(event, object, delay);
        }

        let mut entities = Vec::new();
        for spec in specs.iter().rev() {
            if let Some(entity) = self.specs.get(spec).and_then(|spec| spec.active_entity) {
                entities.push(entity);
            }
            self.destroy_spec(*spec, host, out);
            let _ = self.specs.remove(spec);
        }
        if let Some(owner) = event.and_then(|event| self.events.get_mut(&event)) {
            owner.remove_group(id, &entities);
        }
        let _ = self.groups.remove(&id);
        out.push(Event::SpawnGroupDestroyed { group: id });
        log::debug!("group {id} destroyed");
        true
    }

    /// Respawns every spec of a group. Returns the number of entities created.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError::MissingSpawnGroup`] for an unknown group.
    pub fn respawn_spawn_group(
        &mut self,
        id: SpawnGroupId,
        region: &dyn RegionView,
        host: &mut dyn EntityHost,
        out: &mut Vec<Event>,
    ) -> Result<usize, SpawnError> {
        let group = self
            .groups
            .get_mut(&id)
            .ok_or(SpawnError::MissingSpawnGroup(id))?;
        group.state = SpawnState::Live;
        let specs = group.specs.clone();
        let spawner = group.spawner;
        self.cancel(TimerKind::ClearCluster(id));

        let mut spawned = 0;
        for spec in specs {
            match self.respawn_spec(spec, region, host, out) {
                Ok(_) => spawned += 1,
                Err(SpawnError::EncounterPhaseLocked) => {}
                Err(err) => log::debug!("spec {spec} of group {id} not respawned: {err}"),
            }
        }
        if let Some(spawner) = spawner {
            out.push(Event::SpawnerRespawned { spawner, group: id });
        }
        Ok(spawned)
    }

    /// Respawns every group an event owns. Returns the number of entities
    /// created.
    pub fn respawn_spawn_event(
        &mut self,
        id: SpawnEventId,
        region: &dyn RegionView,
        host: &mut dyn EntityHost,
        out: &mut Vec<Event>,
    ) -> usize {
        let groups: Vec<SpawnGroupId> = self
            .events
            .get(&id)
            .map(|event| event.groups().iter().copied().collect())
            .unwrap_or_default();
        groups
            .into_iter()
            .filter_map(|group| self.respawn_spawn_group(group, region, host, out).ok())
            .sum()
    }

    /// Removes an event: drops its queued requests, destroys its groups and
    /// cancels polls no other event needs.
    pub fn destroy_spawn_event(
        &mut self,
        id: SpawnEventId,
        host: &mut dyn EntityHost,
        out: &mut Vec<Event>,
    ) -> bool {
        let Some(mut event) = self.events.remove(&id) else {
            return false;
        };
        let drained = event.drain();
        log::debug!("spawn event {id} destroyed with {} queued requests", drained.len());
        for group in event.groups().clone() {
            let _ = self.destroy_spawn_group(group, host, out);
        }

        for marker in event.marker_types() {
            let key = SchedulerKey::Marker(marker);
            if !self.events.values().any(|other| other.scheduler(&key).is_some()) {
                self.cancel(TimerKind::MarkerPoll(marker));
            }
        }
        let had_locations = event.locations().next().is_some();
        if had_locations && !self.events.values().any(|other| other.locations().next().is_some()) {
            self.cancel(TimerKind::LocationPoll);
        }
        true
    }

    /// Destroys every group tagged with `mission`. Returns how many were
    /// destroyed.
    pub fn despawn_spawn_groups(
        &mut self,
        mission: PrototypeId,
        host: &mut dyn EntityHost,
        out: &mut Vec<Event>,
    ) -> usize {
        let groups: Vec<SpawnGroupId> = self
            .groups
            .values()
            .filter(|group| group.mission == Some(mission))
            .map(|group| group.id)
            .collect();
        groups
            .into_iter()
            .filter(|group| self.destroy_spawn_group(*group, host, out))
            .count()
    }

    /// Arms `phase` of an encounter and spawns the pending specs it gates.
    ///
    /// A phase arms once; later calls for the same encounter and mission
    /// spawn nothing. Returns the number of entities created.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn_encounter_phase(
        &mut self,
        phase: u32,
        encounter: PrototypeId,
        mission: Option<PrototypeId>,
        region: &dyn RegionView,
        host: &mut dyn EntityHost,
        out: &mut Vec<Event>,
    ) -> usize {
        let bit = phase_bit(phase);
        if phase == 0 || bit == 0 {
            return 0;
        }
        let mask = self.encounter_phases.entry((encounter, mission)).or_insert(0);
        if *mask & bit != 0 {
            log::debug!("phase {phase} of encounter {encounter} is already armed");
            return 0;
        }
        *mask |= bit;

        let gated: Vec<SpawnSpecId> = self
            .specs
            .values()
            .filter(|spec| spec.state == SpawnState::Pending && spec.encounter_phase == phase)
            .filter(|spec| {
                self.groups.get(&spec.group).is_some_and(|group| {
                    group.encounter == Some(encounter) && group.mission == mission
                })
            })
            .map(|spec| spec.id)
            .collect();
        let spawned = gated
            .into_iter()
            .filter(|spec| self.activate_spec(*spec, region, host, out).is_ok())
            .count();
        log::info!("phase {phase} of encounter {encounter} spawned {spawned} entities");
        spawned
    }

    /// Marks a group defeated once no hostile member stands, and removes
    /// cleanup groups once nothing of them is alive.
    pub(crate) fn on_clear_cluster(
        &mut self,
        id: SpawnGroupId,
        host: &mut dyn EntityHost,
        out: &mut Vec<Event>,
    ) {
        let Some(group) = self.groups.get(&id) else {
            return;
        };
        if group.state == SpawnState::Destroyed {
            return;
        }
        let standing = |hostile_only: bool| {
            group
                .specs
                .iter()
                .filter_map(|spec| self.specs.get(spec))
                .filter(|spec| !matches!(spec.state, SpawnState::Defeated | SpawnState::Destroyed))
                .filter_map(|spec| spec.active_entity)
                .filter_map(|entity| host.entity_status(entity))
                .any(|status| !status.dead && !status.destroyed && (status.hostile || !hostile_only))
        };
        if standing(true) {
            return;
        }
        let removable = group.cleanup && !standing(false);

        if let Some(group) = self.groups.get_mut(&id) {
            if group.state == SpawnState::Live {
                group.state = SpawnState::Defeated;
                out.push(Event::ClusterCleared { group: id });
                log::info!("group {id} cleared");
            }
        }
        if removable {
            let _ = self.destroy_spawn_group(id, host, out);
        }
    }
}
