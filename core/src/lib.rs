#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the population engine.
//!
//! This crate defines the vocabulary that connects the region, the spawn
//! systems and the adapters. Systems read region geometry through
//! [`RegionView`], create entities through [`EntityHost`], look prototypes up in
//! the [`Catalog`] and report what happened through [`Event`] values. Every
//! fallible engine operation fails with a [`SpawnError`].

use std::collections::BTreeSet;
use std::fmt;

use bitflags::bitflags;
use glam::Vec3;
use serde::{Deserialize, Serialize};

pub mod content;
pub mod geometry;
mod picker;

pub use content::Catalog;
pub use geometry::{Aabb, Sphere, Transform};
pub use picker::Picker;

/// Bit offset of the cell identifier inside a packed reservation id.
pub const RESERVATION_PID_SHIFT: u32 = 32;

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident($repr:ty)) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name($repr);

        impl $name {
            /// Creates a new identifier with the provided numeric value.
            #[must_use]
            pub const fn new(value: $repr) -> Self {
                Self(value)
            }

            /// Retrieves the numeric representation of the identifier.
            #[must_use]
            pub const fn get(&self) -> $repr {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

identifier! {
    /// Reference to a read-only prototype held by the [`Catalog`].
    PrototypeId(u64)
}

identifier! {
    /// Identifier of a region cell.
    CellId(u32)
}

identifier! {
    /// Identifier of a region area.
    AreaId(u32)
}

identifier! {
    /// Identifier of an entity created by the [`EntityHost`].
    EntityId(u64)
}

identifier! {
    /// Identifier of a spawn group, unique within one population manager.
    SpawnGroupId(u64)
}

identifier! {
    /// Identifier of a spawn spec, unique within one population manager.
    SpawnSpecId(u64)
}

identifier! {
    /// Identifier of a blackout zone, unique within one blackout index.
    BlackOutId(u64)
}

identifier! {
    /// Identifier of a spawn event, unique within one population manager.
    SpawnEventId(u64)
}

/// Identifier of a marker slot: the owning cell plus a per-cell index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReservationId {
    cell: CellId,
    index: u32,
}

impl ReservationId {
    /// Creates a reservation identifier.
    #[must_use]
    pub const fn new(cell: CellId, index: u32) -> Self {
        Self { cell, index }
    }

    /// Cell that owns the reservation.
    #[must_use]
    pub const fn cell(&self) -> CellId {
        self.cell
    }

    /// Index of the reservation inside its cell. Indices start at one and are
    /// never reused when a cell is harvested again.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Packed numeric form: the cell in the high 32 bits, the index in the low.
    #[must_use]
    pub const fn pid(&self) -> u64 {
        ((self.cell.get() as u64) << RESERVATION_PID_SHIFT) | self.index as u64
    }

    /// Unpacks an identifier produced by [`ReservationId::pid`].
    #[must_use]
    pub fn from_pid(pid: u64) -> Option<Self> {
        let cell = u32::try_from(pid >> RESERVATION_PID_SHIFT).ok()?;
        let index = u32::try_from(pid & u64::from(u32::MAX)).ok()?;
        Some(Self::new(CellId::new(cell), index))
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pid())
    }
}

bitflags! {
    /// Role and behaviour flags carried by every node of a cluster tree.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ClusterObjectFlags: u8 {
        /// Entity leads its cluster.
        const LEADER = 1 << 0;
        /// Object belongs to a leader's henchmen.
        const HENCHMEN = 1 << 1;
        /// Entity spawns with modifiers.
        const HAS_MODIFIERS = 1 << 2;
        /// Object is, or contains, a hostile entity.
        const HOSTILE = 1 << 3;
        /// Absolute position already sits on the floor.
        const PROJECT_TO_FLOOR = 1 << 4;
        /// Object keeps its authored offset and never takes part in a formation.
        const SKIP_FORMATION = 1 << 5;
    }
}

bitflags! {
    /// Behaviour switches applied while placing and spawning a cluster.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SpawnFlags: u8 {
        /// Marker slots in simulated cells are skipped.
        const IGNORE_SIMULATED = 1 << 0;
        /// A failed placement retries once with blackout zones ignored.
        const RETRY_IGNORING_BLACKOUT = 1 << 1;
        /// A failed spawner placement falls back to the spawner location.
        const RETRY_FORCE = 1 << 2;
        /// Blackout zones do not block placement.
        const IGNORE_BLACKOUT = 1 << 3;
        /// Overlap with spawned entities does not block placement.
        const IGNORE_SPAWNED = 1 << 4;
        /// The group is removed once its cluster is cleared.
        const CLEANUP = 1 << 5;
    }
}

bitflags! {
    /// Locomotion capabilities checked against the navigation mesh.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PathFlags: u8 {
        /// Walks on the floor.
        const WALK = 1 << 0;
        /// Flies over obstacles.
        const FLY = 1 << 1;
        /// Moves through power-only passages.
        const POWER = 1 << 2;
        /// Blocks line of sight.
        const SIGHT = 1 << 3;
    }
}

impl Default for PathFlags {
    fn default() -> Self {
        Self::WALK
    }
}

/// Lifecycle state shared by spawn groups and spawn specs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpawnState {
    /// Waiting for its entity to be created.
    Pending,
    /// Entity exists in the world.
    Live,
    /// Entity was defeated but not yet reclaimed.
    Defeated,
    /// Slot is retired.
    Destroyed,
    /// Slot is being reset towards [`SpawnState::Pending`].
    Respawning,
}

impl SpawnState {
    /// Reports whether moving from `self` to `next` is an allowed transition.
    #[must_use]
    pub const fn can_transition_to(self, next: SpawnState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Live)
                | (Self::Pending, Self::Destroyed)
                | (Self::Live, Self::Defeated)
                | (Self::Live, Self::Destroyed)
                | (Self::Defeated, Self::Destroyed)
                | (
                    Self::Live | Self::Defeated | Self::Destroyed,
                    Self::Respawning
                )
                | (Self::Respawning, Self::Pending)
        )
    }
}

/// Claim state of a marker slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkerState {
    /// Slot can be claimed.
    #[default]
    Free,
    /// Slot is held by a spawn group.
    Reserved,
}

/// Category of a designer-placed marker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkerKind {
    /// Spawn point for a single entity.
    #[default]
    Entity,
    /// Spawn point for a whole encounter.
    Encounter,
    /// Decorative placement; never harvested.
    Prop,
}

/// Orientation policy applied to objects placed by a formation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormationFacing {
    /// Objects keep the parent orientation.
    #[default]
    None,
    /// Objects face the same way as the parent.
    FaceParent,
    /// Objects face away from the parent.
    FaceParentInverse,
    /// Objects face the formation origin.
    FaceOrigin,
    /// Objects face away from the formation origin.
    FaceOriginInverse,
}

/// Areas and cells a location-scoped spawn may use; empty means region-wide.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpawnLocation {
    /// Allowed areas.
    pub areas: BTreeSet<AreaId>,
    /// Allowed cells.
    pub cells: BTreeSet<CellId>,
}

impl SpawnLocation {
    /// Location limited to a single area.
    #[must_use]
    pub fn area(area: AreaId) -> Self {
        let mut location = Self::default();
        let _ = location.areas.insert(area);
        location
    }

    /// Location built from explicit area and cell restrictions.
    #[must_use]
    pub fn restricted(
        areas: impl IntoIterator<Item = AreaId>,
        cells: impl IntoIterator<Item = CellId>,
    ) -> Self {
        Self {
            areas: areas.into_iter().collect(),
            cells: cells.into_iter().collect(),
        }
    }

    /// Reports whether the location covers the whole region.
    #[must_use]
    pub fn is_region_wide(&self) -> bool {
        self.areas.is_empty() && self.cells.is_empty()
    }

    /// Reports whether `cell` in `area` may host a spawn.
    #[must_use]
    pub fn spawnable_cell(&self, cell: CellId, area: AreaId) -> bool {
        if !self.cells.is_empty() && !self.cells.contains(&cell) {
            return false;
        }
        self.areas.is_empty() || self.areas.contains(&area)
    }
}

/// Properties merged into every entity a cluster spawns.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpawnProperties {
    /// Mission the entity belongs to.
    pub mission: Option<PrototypeId>,
    /// Encounter the entity belongs to.
    pub encounter: Option<PrototypeId>,
    /// Rank prototype.
    pub rank: Option<PrototypeId>,
    /// Modifier prototypes.
    pub modifiers: BTreeSet<PrototypeId>,
    /// Character level.
    pub level: Option<u32>,
    /// Owning spawn group.
    pub group: Option<SpawnGroupId>,
    /// Population object that produced the cluster.
    pub cluster: Option<PrototypeId>,
}

impl SpawnProperties {
    /// Properties tagged with a mission.
    #[must_use]
    pub fn for_mission(mission: Option<PrototypeId>) -> Self {
        Self {
            mission,
            ..Self::default()
        }
    }

    /// Fills unset fields from `other` and unions the modifier sets.
    pub fn merge_from(&mut self, other: &SpawnProperties) {
        self.mission = self.mission.or(other.mission);
        self.encounter = self.encounter.or(other.encounter);
        self.rank = self.rank.or(other.rank);
        self.level = self.level.or(other.level);
        self.group = self.group.or(other.group);
        self.cluster = self.cluster.or(other.cluster);
        self.modifiers.extend(other.modifiers.iter().copied());
    }
}

/// Notifications produced by the population engine.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Event {
    /// A spawn group was created for a placed cluster.
    SpawnGroupCreated {
        /// Identifier of the new group.
        group: SpawnGroupId,
        /// Population object the group was built from.
        object: Option<PrototypeId>,
        /// Event that scheduled the group.
        event: Option<SpawnEventId>,
    },
    /// A spec created its entity.
    EntitySpawned {
        /// Owning group.
        group: SpawnGroupId,
        /// Spawned spec.
        spec: SpawnSpecId,
        /// Created entity.
        entity: EntityId,
    },
    /// A spawn group was destroyed and detached from its event.
    SpawnGroupDestroyed {
        /// Identifier of the destroyed group.
        group: SpawnGroupId,
    },
    /// Every hostile member of a group was defeated.
    ClusterCleared {
        /// Identifier of the cleared group.
        group: SpawnGroupId,
    },
    /// A spawner lost one of the entities it spawned.
    SpawnerDefeated {
        /// Spawner entity.
        spawner: EntityId,
        /// Group the defeated entity belonged to.
        group: SpawnGroupId,
        /// Defeated entity.
        entity: EntityId,
    },
    /// A spawner's group was respawned.
    SpawnerRespawned {
        /// Spawner entity.
        spawner: EntityId,
        /// Respawned group.
        group: SpawnGroupId,
    },
    /// Every request of a mission or scripted event has spawned.
    PopulationSpawned {
        /// Completed event.
        event: SpawnEventId,
        /// Mission the event belongs to.
        mission: Option<PrototypeId>,
    },
}

/// Errors reported by the population engine.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum SpawnError {
    /// A referenced prototype is absent from the catalog.
    #[error("prototype {0} is missing from the catalog")]
    MissingPrototype(PrototypeId),
    /// A cluster group expanded into no children.
    #[error("cluster of {0:?} has no objects")]
    EmptyCluster(Option<PrototypeId>),
    /// A fixed formation has fewer slots than formation objects.
    #[error("fixed formation of {object:?} has {slots} slots for {objects} objects")]
    InsufficientSlots {
        /// Population object owning the formation.
        object: Option<PrototypeId>,
        /// Authored slot count.
        slots: usize,
        /// Formation object count.
        objects: usize,
    },
    /// A cluster object has no bounding radius.
    #[error("cluster object has a zero radius")]
    ZeroRadius,
    /// A formation template reference could not be resolved.
    #[error("formation template {0} is missing")]
    MissingFormation(PrototypeId),
    /// No cell contains the spawn position.
    #[error("no cell at position {0}")]
    NoCell(Vec3),
    /// The spec is gated on an encounter phase that has not been armed.
    #[error("encounter phase is not armed")]
    EncounterPhaseLocked,
    /// The entity host refused to create the entity.
    #[error("entity creation failed: {0}")]
    EntityCreation(String),
    /// No valid placement was found.
    #[error("no valid placement found")]
    PlacementFailed,
    /// No free marker slot was available.
    #[error("no free reservation available")]
    NoReservation,
    /// A spawn group identifier is unknown.
    #[error("spawn group {0} does not exist")]
    MissingSpawnGroup(SpawnGroupId),
    /// A spawn spec identifier is unknown.
    #[error("spawn spec {0} does not exist")]
    MissingSpawnSpec(SpawnSpecId),
    /// A lifecycle transition outside the allowed set was requested.
    #[error("spawn state cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current state.
        from: SpawnState,
        /// Requested state.
        to: SpawnState,
    },
    /// Sector search arguments are out of range.
    #[error("invalid sector: min {min}, max {max}")]
    InvalidSector {
        /// Inner distance of the annulus.
        min: f32,
        /// Outer distance of the annulus.
        max: f32,
    },
}

/// Navigation mesh queried while validating placements.
pub trait NaviMesh {
    /// Reports whether a disc of `radius` at `position` is navigable for `flags`.
    fn contains(&self, position: Vec3, radius: f32, flags: PathFlags) -> bool;

    /// Projects `position` onto the floor below it.
    fn project_to_floor(&self, position: Vec3) -> Option<Vec3>;
}

/// Marker authored inside a cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerPlacement {
    /// Marker prototype.
    pub marker: PrototypeId,
    /// Offset from the cell centre.
    pub position: Vec3,
    /// Yaw in radians.
    #[serde(default)]
    pub yaw: f32,
    /// Optional filter the region must accept for the marker to be harvested.
    #[serde(default)]
    pub filter: Option<PrototypeId>,
}

/// Geometry and markers of a single cell.
#[derive(Clone, Debug, PartialEq)]
pub struct CellDescriptor {
    /// Identifier of the cell.
    pub id: CellId,
    /// Area the cell belongs to.
    pub area: AreaId,
    /// Region-space bounds.
    pub bounds: Aabb,
    /// Navigable floor area.
    pub spawnable_area: f32,
    /// Authored markers.
    pub markers: Vec<MarkerPlacement>,
}

/// Area-level population settings.
#[derive(Clone, Debug, PartialEq)]
pub struct AreaDescriptor {
    /// Identifier of the area.
    pub id: AreaId,
    /// Character level of entities spawned in the area.
    pub level: u32,
    /// Population prototype driving the area.
    pub population: Option<PrototypeId>,
    /// Cells of the area.
    pub cells: Vec<CellId>,
    /// Navigable floor area summed over the cells.
    pub spawnable_area: f32,
}

/// Read access to region geometry.
pub trait RegionView {
    /// Bounds of the whole region.
    fn bounds(&self) -> Aabb;

    /// Looks up a cell.
    fn cell(&self, id: CellId) -> Option<&CellDescriptor>;

    /// Looks up an area.
    fn area(&self, id: AreaId) -> Option<&AreaDescriptor>;

    /// Identifiers of every cell in ascending order.
    fn cell_ids(&self) -> Vec<CellId>;

    /// Identifiers of every area in ascending order.
    fn area_ids(&self) -> Vec<AreaId>;

    /// Cell whose footprint contains `position`.
    fn cell_at(&self, position: Vec3) -> Option<CellId>;

    /// Navigation mesh of the region.
    fn navi(&self) -> &dyn NaviMesh;

    /// Reports whether markers tagged with `filter` are harvested.
    fn check_marker_filter(&self, filter: Option<PrototypeId>) -> bool;
}

/// Everything the host needs to create one entity.
#[derive(Clone, Debug, PartialEq)]
pub struct EntitySettings {
    /// Entity prototype.
    pub prototype: PrototypeId,
    /// Region-space position.
    pub position: Vec3,
    /// Yaw in radians.
    pub yaw: f32,
    /// Cell the entity spawns in.
    pub cell: CellId,
    /// Area the entity spawns in.
    pub area: AreaId,
    /// Character level.
    pub level: u32,
    /// Merged spawn properties.
    pub properties: SpawnProperties,
    /// Owning spawn group.
    pub group: SpawnGroupId,
    /// Owning spawn spec.
    pub spec: SpawnSpecId,
    /// Whether the host should drop the entity to the floor.
    pub snap_to_floor: bool,
    /// Spawner the entity reports to.
    pub spawner: Option<EntityId>,
}

/// Runtime state of an entity as reported by the host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityStatus {
    /// Entity has been killed.
    pub dead: bool,
    /// Entity has been removed from the world.
    pub destroyed: bool,
    /// Entity is hostile to players.
    pub hostile: bool,
}

/// Entity simulation the engine delegates creation to.
pub trait EntityHost {
    /// Creates an entity.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError::EntityCreation`] when the host refuses the request.
    fn create_entity(&mut self, settings: &EntitySettings) -> Result<EntityId, SpawnError>;

    /// Reports the state of an entity; `None` when it is unknown.
    fn entity_status(&self, entity: EntityId) -> Option<EntityStatus>;

    /// Removes an entity from the world.
    fn destroy_entity(&mut self, entity: EntityId);

    /// Reports whether a sphere overlaps the blocking bounds of a live entity.
    fn is_bounds_blocked(&self, center: Vec3, radius: f32) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::DeserializeOwned;

    fn assert_round_trip<T>(value: &T)
    where
        T: Serialize + DeserializeOwned + PartialEq + std::fmt::Debug,
    {
        let bytes = bincode::serialize(value).expect("serialize");
        let restored: T = bincode::deserialize(&bytes).expect("deserialize");
        assert_eq!(&restored, value);
    }

    #[test]
    fn reservation_pid_packs_cell_and_index() {
        let id = ReservationId::new(CellId::new(12), 7);
        assert_eq!(id.pid(), (12 << 32) | 7);
        assert_eq!(ReservationId::from_pid(id.pid()), Some(id));
    }

    #[test]
    fn large_reservation_indices_keep_distinct_pids() {
        let late = ReservationId::new(CellId::new(1), 1000);
        let next_cell = ReservationId::new(CellId::new(2), 0);
        assert_ne!(late.pid(), next_cell.pid());
        assert_eq!(ReservationId::from_pid(late.pid()), Some(late));
    }

    #[test]
    fn spawn_state_transitions_follow_lifecycle() {
        use SpawnState::*;
        assert!(Pending.can_transition_to(Live));
        assert!(Live.can_transition_to(Defeated));
        assert!(Defeated.can_transition_to(Destroyed));
        assert!(Live.can_transition_to(Destroyed));
        assert!(Defeated.can_transition_to(Respawning));
        assert!(Respawning.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Respawning));
        assert!(!Destroyed.can_transition_to(Live));
        assert!(!Defeated.can_transition_to(Live));
        assert!(!Respawning.can_transition_to(Live));
    }

    #[test]
    fn spawn_location_honours_cells_before_areas() {
        let location = SpawnLocation::restricted([AreaId::new(1)], [CellId::new(4)]);
        assert!(location.spawnable_cell(CellId::new(4), AreaId::new(1)));
        assert!(!location.spawnable_cell(CellId::new(5), AreaId::new(1)));
        assert!(!location.spawnable_cell(CellId::new(4), AreaId::new(2)));
        assert!(SpawnLocation::default().spawnable_cell(CellId::new(9), AreaId::new(9)));
    }

    #[test]
    fn merge_keeps_own_values_and_unions_modifiers() {
        let mut own = SpawnProperties {
            mission: Some(PrototypeId::new(1)),
            modifiers: [PrototypeId::new(10)].into_iter().collect(),
            ..SpawnProperties::default()
        };
        let other = SpawnProperties {
            mission: Some(PrototypeId::new(2)),
            level: Some(12),
            modifiers: [PrototypeId::new(11)].into_iter().collect(),
            ..SpawnProperties::default()
        };
        own.merge_from(&other);
        assert_eq!(own.mission, Some(PrototypeId::new(1)));
        assert_eq!(own.level, Some(12));
        assert_eq!(own.modifiers.len(), 2);
    }

    #[test]
    fn reservation_id_round_trips_through_bincode() {
        assert_round_trip(&ReservationId::new(CellId::new(3), 2));
    }

    #[test]
    fn spawn_flags_round_trip_through_bincode() {
        assert_round_trip(&(SpawnFlags::IGNORE_BLACKOUT | SpawnFlags::RETRY_FORCE));
    }

    #[test]
    fn spawn_location_round_trips_through_bincode() {
        assert_round_trip(&SpawnLocation::restricted(
            [AreaId::new(1), AreaId::new(2)],
            [CellId::new(8)],
        ));
    }

    #[test]
    fn event_round_trips_through_bincode() {
        assert_round_trip(&Event::EntitySpawned {
            group: SpawnGroupId::new(1),
            spec: SpawnSpecId::new(2),
            entity: EntityId::new(3),
        });
    }
}
