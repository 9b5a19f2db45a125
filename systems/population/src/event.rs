//! Spawn events: the owners of scheduled requests and the groups they produce.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use population_core::{
    AreaId, EntityId, PrototypeId, SpawnEventId, SpawnGroupId, SpawnLocation, SpawnProperties,
};

use crate::object::{PopulationObject, SpawnScheduler};

/// What caused a spawn event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpawnEventKind {
    /// Theme population of an area; destroyed groups are queued again.
    Area(AreaId),
    /// Population required by a mission.
    Mission(PrototypeId),
    /// Required objects added by a script.
    Scripted,
}

/// Scheduler a request was routed to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SchedulerKey {
    /// Marker-bound requests of one marker type.
    Marker(PrototypeId),
    /// Free-floor requests sharing one location.
    Location(SpawnLocation),
}

/// Requests, groups and entities caused by one trigger.
#[derive(Debug)]
pub struct SpawnEvent {
    id: SpawnEventId,
    kind: SpawnEventKind,
    groups: BTreeSet<SpawnGroupId>,
    entities: BTreeSet<EntityId>,
    marker_schedulers: BTreeMap<PrototypeId, SpawnScheduler>,
    location_schedulers: BTreeMap<SpawnLocation, SpawnScheduler>,
    respawn_object: bool,
    respawn_delay: Duration,
    reported: bool,
}

impl SpawnEvent {
    pub(crate) fn new(id: SpawnEventId, kind: SpawnEventKind, respawn_delay: Duration) -> Self {
        Self {
            id,
            kind,
            groups: BTreeSet::new(),
            entities: BTreeSet::new(),
            marker_schedulers: BTreeMap::new(),
            location_schedulers: BTreeMap::new(),
            respawn_object: matches!(kind, SpawnEventKind::Area(_)),
            respawn_delay,
            reported: false,
        }
    }

    /// Identifier of the event.
    #[must_use]
    pub const fn id(&self) -> SpawnEventId {
        self.id
    }

    /// Trigger of the event.
    #[must_use]
    pub const fn kind(&self) -> SpawnEventKind {
        self.kind
    }

    /// Mission of a mission event.
    #[must_use]
    pub const fn mission(&self) -> Option<PrototypeId> {
        match self.kind {
            SpawnEventKind::Mission(mission) => Some(mission),
            SpawnEventKind::Area(_) | SpawnEventKind::Scripted => None,
        }
    }

    /// Groups the event currently owns.
    #[must_use]
    pub const fn groups(&self) -> &BTreeSet<SpawnGroupId> {
        &self.groups
    }

    /// Entities spawned by the event's groups.
    #[must_use]
    pub const fn entities(&self) -> &BTreeSet<EntityId> {
        &self.entities
    }

    /// Whether destroyed groups are queued again.
    #[must_use]
    pub const fn respawn_object(&self) -> bool {
        self.respawn_object
    }

    /// Delay a released marker slot rests before this event reuses it.
    #[must_use]
    pub const fn respawn_delay(&self) -> Duration {
        self.respawn_delay
    }

    /// Marker types the event has schedulers for.
    pub fn marker_types(&self) -> impl Iterator<Item = PrototypeId> + '_ {
        self.marker_schedulers.keys().copied()
    }

    /// Locations the event has schedulers for.
    pub fn locations(&self) -> impl Iterator<Item = &SpawnLocation> {
        self.location_schedulers.keys()
    }

    /// Looks up a scheduler.
    #[must_use]
    pub fn scheduler(&self, key: &SchedulerKey) -> Option<&SpawnScheduler> {
        match key {
            SchedulerKey::Marker(marker) => self.marker_schedulers.get(marker),
            SchedulerKey::Location(location) => self.location_schedulers.get(location),
        }
    }

    pub(crate) fn scheduler_mut(&mut self, key: &SchedulerKey) -> Option<&mut SpawnScheduler> {
        match key {
            SchedulerKey::Marker(marker) => self.marker_schedulers.get_mut(marker),
            SchedulerKey::Location(location) => self.location_schedulers.get_mut(location),
        }
    }

    /// Queues a new request. Marker requests go to the scheduler of their
    /// marker type, the others to the scheduler of their location.
    #[allow(clippy::too_many_arguments)]
    pub fn add_population_object(
        &mut self,
        marker: Option<PrototypeId>,
        object: PrototypeId,
        critical: bool,
        location: SpawnLocation,
        mission: Option<PrototypeId>,
        time: Duration,
    ) -> SchedulerKey {
        let mut request = PopulationObject::new(object, Some(self.id));
        request.marker = marker;
        request.critical = critical;
        request.location = location;
        request.time = time;
        request.properties = SpawnProperties::for_mission(mission);
        self.push_object(request)
    }

    pub(crate) fn push_object(&mut self, object: PopulationObject) -> SchedulerKey {
        let key = match object.marker {
            Some(marker) => SchedulerKey::Marker(marker),
            None => SchedulerKey::Location(object.location.clone()),
        };
        let scheduler = match &key {
            SchedulerKey::Marker(marker) => self.marker_schedulers.entry(*marker).or_default(),
            SchedulerKey::Location(location) => {
                self.location_schedulers.entry(location.clone()).or_default()
            }
        };
        scheduler.push(object);
        key
    }

    /// Records a spawned group and its entities.
    pub fn set_spawn_data(&mut self, group: SpawnGroupId, entities: impl IntoIterator<Item = EntityId>) {
        let _ = self.groups.insert(group);
        self.entities.extend(entities);
    }

    pub(crate) fn remove_group(&mut self, group: SpawnGroupId, entities: &[EntityId]) {
        let _ = self.groups.remove(&group);
        for entity in entities {
            let _ = self.entities.remove(entity);
        }
        for scheduler in self
            .marker_schedulers
            .values_mut()
            .chain(self.location_schedulers.values_mut())
        {
            scheduler.forget_group(group);
        }
    }

    /// Reports whether every owned scheduler is empty.
    #[must_use]
    pub fn is_spawned(&self) -> bool {
        self.marker_schedulers
            .values()
            .chain(self.location_schedulers.values())
            .all(SpawnScheduler::is_empty)
    }

    /// Number of requests still queued or parked.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.marker_schedulers
            .values()
            .chain(self.location_schedulers.values())
            .map(SpawnScheduler::count)
            .sum()
    }

    pub(crate) fn drain(&mut self) -> Vec<PopulationObject> {
        self.marker_schedulers
            .values_mut()
            .chain(self.location_schedulers.values_mut())
            .flat_map(SpawnScheduler::drain)
            .collect()
    }

    /// Marks the completion of a mission or scripted event as reported.
    /// Returns `true` only the first time the event is found spawned.
    pub(crate) fn take_completion(&mut self) -> bool {
        if self.reported || self.respawn_object || !self.is_spawned() {
            return false;
        }
        self.reported = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use population_core::SpawnFlags;

    #[test]
    fn requests_route_by_marker_or_location() {
        let mut event = SpawnEvent::new(SpawnEventId::new(1), SpawnEventKind::Scripted, Duration::ZERO);
        let marker = event.add_population_object(
            Some(PrototypeId::new(10)),
            PrototypeId::new(1),
            true,
            SpawnLocation::default(),
            Some(PrototypeId::new(50)),
            Duration::ZERO,
        );
        let location = SpawnLocation::area(AreaId::new(2));
        let floor = event.add_population_object(
            None,
            PrototypeId::new(1),
            false,
            location.clone(),
            None,
            Duration::ZERO,
        );
        assert_eq!(marker, SchedulerKey::Marker(PrototypeId::new(10)));
        assert_eq!(floor, SchedulerKey::Location(location));
        assert_eq!(event.pending_count(), 2);

        let scheduler = event.scheduler_mut(&marker).expect("marker scheduler");
        let request = scheduler.pop(true).expect("critical request");
        assert_eq!(request.mission(), Some(PrototypeId::new(50)));
        assert_eq!(request.flags, SpawnFlags::IGNORE_SIMULATED);
        assert_eq!(request.event, Some(SpawnEventId::new(1)));
    }

    #[test]
    fn completion_is_reported_once_and_never_for_areas() {
        let mut scripted =
            SpawnEvent::new(SpawnEventId::new(1), SpawnEventKind::Scripted, Duration::ZERO);
        let _ = scripted.add_population_object(
            None,
            PrototypeId::new(1),
            false,
            SpawnLocation::default(),
            None,
            Duration::ZERO,
        );
        assert!(!scripted.take_completion());
        assert_eq!(scripted.drain().len(), 1);
        assert!(scripted.take_completion());
        assert!(!scripted.take_completion());

        let mut area = SpawnEvent::new(
            SpawnEventId::new(2),
            SpawnEventKind::Area(AreaId::new(1)),
            Duration::ZERO,
        );
        assert!(area.respawn_object());
        assert!(!area.take_completion());
    }
}
