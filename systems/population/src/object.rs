//! Scheduling units and the priority queues that hold them.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeSet, BinaryHeap};
use std::time::Duration;

use population_core::{
    EntityId, PrototypeId, SpawnEventId, SpawnFlags, SpawnGroupId, SpawnLocation,
    SpawnProperties,
};

/// One request to spawn a population object.
#[derive(Clone, Debug, PartialEq)]
pub struct PopulationObject {
    /// Population object prototype.
    pub object: PrototypeId,
    /// Marker type to spawn on; `None` spreads the object over free floor.
    pub marker: Option<PrototypeId>,
    /// Areas and cells the object may use.
    pub location: SpawnLocation,
    /// Earliest time the object may spawn; zero means immediately.
    pub time: Duration,
    /// Whether the object goes to the critical queue.
    pub critical: bool,
    /// Properties handed to the cluster; carries the mission.
    pub properties: SpawnProperties,
    /// Placement switches.
    pub flags: SpawnFlags,
    /// Whether the group is removed once its cluster is cleared.
    pub cleanup: bool,
    /// Spawner the entities report to.
    pub spawner: Option<EntityId>,
    /// Event that owns the request; `None` for direct spawns.
    pub event: Option<SpawnEventId>,
    /// Group the request produced, once spawned.
    pub group: Option<SpawnGroupId>,
}

impl PopulationObject {
    /// Creates a request with the default flags.
    #[must_use]
    pub fn new(object: PrototypeId, event: Option<SpawnEventId>) -> Self {
        Self {
            object,
            marker: None,
            location: SpawnLocation::default(),
            time: Duration::ZERO,
            critical: false,
            properties: SpawnProperties::default(),
            flags: SpawnFlags::IGNORE_SIMULATED,
            cleanup: false,
            spawner: None,
            event,
            group: None,
        }
    }

    /// Mission the request belongs to.
    #[must_use]
    pub const fn mission(&self) -> Option<PrototypeId> {
        self.properties.mission
    }

    /// Queue priority: the due time in milliseconds, or the number of allowed
    /// areas for requests due immediately.
    #[must_use]
    pub fn priority(&self) -> u64 {
        let millis = u64::try_from(self.time.as_millis()).unwrap_or(u64::MAX);
        if millis > 0 {
            millis
        } else {
            self.location.areas.len() as u64
        }
    }
}

#[derive(Debug)]
struct Queued {
    priority: u64,
    sequence: u64,
    object: PopulationObject,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.sequence).cmp(&(other.priority, other.sequence))
    }
}

/// Critical and regular queues of one marker type or location.
#[derive(Debug, Default)]
pub struct SpawnScheduler {
    critical: BinaryHeap<Reverse<Queued>>,
    regular: BinaryHeap<Reverse<Queued>>,
    failed: Vec<PopulationObject>,
    spawned_groups: BTreeSet<SpawnGroupId>,
    sequence: u64,
}

impl SpawnScheduler {
    /// Creates empty queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `object` on the queue its criticality selects.
    pub fn push(&mut self, object: PopulationObject) {
        let queued = Queued {
            priority: object.priority(),
            sequence: self.sequence,
            object,
        };
        self.sequence += 1;
        let queue = if queued.object.critical {
            &mut self.critical
        } else {
            &mut self.regular
        };
        queue.push(Reverse(queued));
    }

    fn queue(&self, critical: bool) -> &BinaryHeap<Reverse<Queued>> {
        if critical {
            &self.critical
        } else {
            &self.regular
        }
    }

    /// Removes the head of one queue.
    pub fn pop(&mut self, critical: bool) -> Option<PopulationObject> {
        let queue = if critical {
            &mut self.critical
        } else {
            &mut self.regular
        };
        queue.pop().map(|Reverse(queued)| queued.object)
    }

    /// Removes the head of the critical queue, else of the regular one.
    pub fn pop_any(&mut self) -> Option<PopulationObject> {
        self.pop(true).or_else(|| self.pop(false))
    }

    /// Reports whether the head of one queue is due at `now`.
    #[must_use]
    pub fn can_spawn(&self, now: Duration, critical: bool) -> bool {
        self.queue(critical)
            .peek()
            .is_some_and(|Reverse(queued)| queued.object.time <= now)
    }

    /// Reports whether either queue has a due head.
    #[must_use]
    pub fn can_any_spawn(&self, now: Duration) -> bool {
        self.can_spawn(now, true) || self.can_spawn(now, false)
    }

    /// Earliest due time over every queued request.
    #[must_use]
    pub fn min_event_time(&self) -> Option<Duration> {
        self.critical
            .iter()
            .chain(self.regular.iter())
            .map(|Reverse(queued)| queued.object.time)
            .min()
    }

    /// Parks a request that failed this pass.
    pub fn add_failed_object(&mut self, object: PopulationObject) {
        self.failed.push(object);
    }

    /// Queues every parked request again.
    pub fn push_failed_objects(&mut self) {
        for object in std::mem::take(&mut self.failed) {
            self.push(object);
        }
    }

    /// Number of queued and parked requests.
    #[must_use]
    pub fn count(&self) -> usize {
        self.critical.len() + self.regular.len() + self.failed.len()
    }

    /// Reports whether nothing is queued or parked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Removes every queued and parked request.
    pub fn drain(&mut self) -> Vec<PopulationObject> {
        let mut drained: Vec<PopulationObject> = std::mem::take(&mut self.critical)
            .into_sorted_vec()
            .into_iter()
            .rev()
            .map(|Reverse(queued)| queued.object)
            .collect();
        drained.extend(
            std::mem::take(&mut self.regular)
                .into_sorted_vec()
                .into_iter()
                .rev()
                .map(|Reverse(queued)| queued.object),
        );
        drained.append(&mut self.failed);
        drained
    }

    /// Groups produced by this scheduler that still exist.
    #[must_use]
    pub const fn spawned_groups(&self) -> &BTreeSet<SpawnGroupId> {
        &self.spawned_groups
    }

    pub(crate) fn record_spawned(&mut self, group: SpawnGroupId) {
        let _ = self.spawned_groups.insert(group);
    }

    pub(crate) fn forget_group(&mut self, group: SpawnGroupId) {
        let _ = self.spawned_groups.remove(&group);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use population_core::AreaId;

    fn request(object: u64, time_ms: u64, critical: bool) -> PopulationObject {
        let mut request = PopulationObject::new(PrototypeId::new(object), Some(SpawnEventId::new(1)));
        request.time = Duration::from_millis(time_ms);
        request.critical = critical;
        request
    }

    #[test]
    fn priority_prefers_time_then_area_count() {
        let mut request = request(1, 0, false);
        request.location = SpawnLocation::restricted([AreaId::new(1), AreaId::new(2)], []);
        assert_eq!(request.priority(), 2);
        request.time = Duration::from_millis(1500);
        assert_eq!(request.priority(), 1500);
    }

    #[test]
    fn queues_pop_in_priority_then_insertion_order() {
        let mut scheduler = SpawnScheduler::new();
        scheduler.push(request(1, 300, false));
        scheduler.push(request(2, 100, false));
        scheduler.push(request(3, 100, false));
        scheduler.push(request(4, 500, true));

        assert_eq!(scheduler.pop_any().map(|o| o.object), Some(PrototypeId::new(4)));
        let order: Vec<u64> = std::iter::from_fn(|| scheduler.pop(false))
            .map(|o| o.object.get())
            .collect();
        assert_eq!(order, vec![2, 3, 1]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn heads_become_spawnable_when_due() {
        let mut scheduler = SpawnScheduler::new();
        scheduler.push(request(1, 2000, false));
        assert!(!scheduler.can_any_spawn(Duration::from_secs(1)));
        assert!(scheduler.can_spawn(Duration::from_secs(2), false));
        assert!(!scheduler.can_spawn(Duration::from_secs(2), true));
        assert_eq!(scheduler.min_event_time(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn failed_objects_are_counted_until_requeued() {
        let mut scheduler = SpawnScheduler::new();
        scheduler.push(request(1, 0, true));
        let popped = scheduler.pop(true).expect("queued request");
        scheduler.add_failed_object(popped);
        assert_eq!(scheduler.count(), 1);
        assert!(!scheduler.can_any_spawn(Duration::ZERO));
        scheduler.push_failed_objects();
        assert!(scheduler.can_spawn(Duration::ZERO, true));
        assert_eq!(scheduler.drain().len(), 1);
        assert!(scheduler.is_empty());
    }
}
