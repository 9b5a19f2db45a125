//! Runtime bookkeeping of spawned clusters.

use std::time::Duration;

use population_core::{
    AreaId, BlackOutId, CellId, EntityId, PrototypeId, ReservationId, SpawnError, SpawnEventId,
    SpawnGroupId, SpawnProperties, SpawnSpecId, SpawnState, Transform,
};

use crate::object::PopulationObject;

/// One concrete spawn slot of a group.
#[derive(Clone, Debug, PartialEq)]
pub struct SpawnSpec {
    pub(crate) id: SpawnSpecId,
    pub(crate) group: SpawnGroupId,
    pub(crate) entity: PrototypeId,
    pub(crate) transform: Transform,
    pub(crate) properties: SpawnProperties,
    pub(crate) state: SpawnState,
    pub(crate) encounter_phase: u32,
    pub(crate) snap_to_floor: Option<bool>,
    pub(crate) half_height: f32,
    pub(crate) active_entity: Option<EntityId>,
    pub(crate) spawned_at: Option<Duration>,
}

impl SpawnSpec {
    /// Identifier of the spec.
    #[must_use]
    pub const fn id(&self) -> SpawnSpecId {
        self.id
    }

    /// Owning group.
    #[must_use]
    pub const fn group(&self) -> SpawnGroupId {
        self.group
    }

    /// Entity prototype the spec creates.
    #[must_use]
    pub const fn entity(&self) -> PrototypeId {
        self.entity
    }

    /// Transform relative to the group.
    #[must_use]
    pub const fn transform(&self) -> Transform {
        self.transform
    }

    /// Properties merged into the created entity.
    #[must_use]
    pub const fn properties(&self) -> &SpawnProperties {
        &self.properties
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SpawnState {
        self.state
    }

    /// Encounter phase gating the spawn; zero when ungated.
    #[must_use]
    pub const fn encounter_phase(&self) -> u32 {
        self.encounter_phase
    }

    /// Entity currently standing for the spec.
    #[must_use]
    pub const fn active_entity(&self) -> Option<EntityId> {
        self.active_entity
    }

    /// Time the active entity was created.
    #[must_use]
    pub const fn spawned_at(&self) -> Option<Duration> {
        self.spawned_at
    }

    pub(crate) fn transition(&mut self, next: SpawnState) -> Result<(), SpawnError> {
        if !self.state.can_transition_to(next) {
            return Err(SpawnError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        log::trace!("spec {} moves from {:?} to {next:?}", self.id, self.state);
        self.state = next;
        Ok(())
    }
}

/// Batch of specs placed together from one cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct SpawnGroup {
    pub(crate) id: SpawnGroupId,
    pub(crate) transform: Transform,
    pub(crate) state: SpawnState,
    pub(crate) specs: Vec<SpawnSpecId>,
    pub(crate) object: PrototypeId,
    pub(crate) population_object: Option<PopulationObject>,
    pub(crate) event: Option<SpawnEventId>,
    pub(crate) encounter: Option<PrototypeId>,
    pub(crate) mission: Option<PrototypeId>,
    pub(crate) spawner: Option<EntityId>,
    pub(crate) reservation: Option<ReservationId>,
    pub(crate) blackouts: Vec<BlackOutId>,
    pub(crate) cleanup: bool,
    pub(crate) placed_cell: Option<(AreaId, CellId)>,
    pub(crate) hostile_count: f32,
}

impl SpawnGroup {
    /// Identifier of the group.
    #[must_use]
    pub const fn id(&self) -> SpawnGroupId {
        self.id
    }

    /// Region-space transform shared by the specs.
    #[must_use]
    pub const fn transform(&self) -> Transform {
        self.transform
    }

    /// Lifecycle state; a group starts [`SpawnState::Live`].
    #[must_use]
    pub const fn state(&self) -> SpawnState {
        self.state
    }

    /// Specs in placement order.
    #[must_use]
    pub fn specs(&self) -> &[SpawnSpecId] {
        &self.specs
    }

    /// Population object the group was built from.
    #[must_use]
    pub const fn object(&self) -> PrototypeId {
        self.object
    }

    /// Event that owns the group.
    #[must_use]
    pub const fn event(&self) -> Option<SpawnEventId> {
        self.event
    }

    /// Encounter the group belongs to.
    #[must_use]
    pub const fn encounter(&self) -> Option<PrototypeId> {
        self.encounter
    }

    /// Mission the group belongs to.
    #[must_use]
    pub const fn mission(&self) -> Option<PrototypeId> {
        self.mission
    }

    /// Spawner the entities report to.
    #[must_use]
    pub const fn spawner(&self) -> Option<EntityId> {
        self.spawner
    }

    /// Marker slot the group holds.
    #[must_use]
    pub const fn reservation(&self) -> Option<ReservationId> {
        self.reservation
    }

    /// Blackout zones spawned with the group.
    #[must_use]
    pub fn blackouts(&self) -> &[BlackOutId] {
        &self.blackouts
    }

    /// Whether the group is removed once cleared.
    #[must_use]
    pub const fn cleanup(&self) -> bool {
        self.cleanup
    }
}
