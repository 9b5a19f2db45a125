//! Read-only prototype catalog consumed by the population engine.
//!
//! Content is authored elsewhere; the engine only looks prototypes up by
//! [`PrototypeId`]. The catalog deserialises from flat definition lists so that
//! scenario files can be written by hand.

use std::collections::BTreeMap;

use glam::Vec3;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{AreaId, CellId, FormationFacing, MarkerKind, PathFlags, Picker, PrototypeId};

const MIN_AVERAGE_SIZE: f32 = 1.0;

fn default_weight() -> u32 {
    1
}

fn default_count() -> u32 {
    1
}

fn default_path_flags() -> PathFlags {
    PathFlags::WALK
}

fn default_density_pct() -> f32 {
    100.0
}

/// Collision volume authored on an entity prototype.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundsPrototype {
    /// Planar radius of the entity.
    pub radius: f32,
    /// Half of the entity height.
    pub half_height: f32,
    /// Whether the bounds block other entities.
    #[serde(default)]
    pub blocking: bool,
    /// Whether the bounds block spawns even when not blocking movement.
    #[serde(default)]
    pub blocks_spawns: bool,
}

/// Spawnable world entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityPrototype {
    /// Identifier of the prototype.
    pub id: PrototypeId,
    /// Collision volume; spawners and markers have none.
    #[serde(default)]
    pub bounds: Option<BoundsPrototype>,
    /// Whether the entity is hostile to players.
    #[serde(default)]
    pub hostile: bool,
    /// Locomotion the entity needs from the navigation mesh.
    #[serde(default = "default_path_flags")]
    pub path_flags: PathFlags,
    /// Rank prototype applied when the entity spawns.
    #[serde(default)]
    pub rank: Option<PrototypeId>,
    /// Modifiers every spawned instance receives.
    #[serde(default)]
    pub modifiers: Vec<PrototypeId>,
}

/// Prototype reference paired with a pick weight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedPrototype {
    /// Referenced prototype.
    pub prototype: PrototypeId,
    /// Relative pick weight.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

/// Weighted list of interchangeable entities.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntitySelectorPrototype {
    /// Identifier of the selector.
    pub id: PrototypeId,
    /// Candidate entities.
    pub entities: Vec<WeightedPrototype>,
}

/// Single authored slot of a fixed formation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormationSlot {
    /// Offset along the forward axis.
    pub x: f32,
    /// Offset along the right axis.
    pub y: f32,
    /// Yaw in degrees, used when the formation has no facing policy.
    #[serde(default)]
    pub yaw: f32,
}

/// Layout algorithm applied to the formation objects of a cluster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FormationPrototype {
    /// Concentric square rings around a central object.
    Box {
        /// Facing policy.
        #[serde(default)]
        facing: FormationFacing,
    },
    /// Rows of objects ordered centre-outward.
    Line {
        /// Facing policy.
        #[serde(default)]
        facing: FormationFacing,
        /// Gap between neighbouring objects.
        #[serde(default)]
        spacing: f32,
        /// Object count per row; empty means a single row.
        #[serde(default)]
        rows: Vec<u32>,
    },
    /// Objects spread along a circular arc in front of the origin.
    Arc {
        /// Facing policy.
        #[serde(default)]
        facing: FormationFacing,
        /// Gap between neighbouring objects.
        #[serde(default)]
        spacing: f32,
        /// Opening angle of the arc in degrees.
        arc_degrees: f32,
    },
    /// One authored slot per object.
    Fixed {
        /// Facing policy.
        #[serde(default)]
        facing: FormationFacing,
        /// Authored slots.
        slots: Vec<FormationSlot>,
    },
}

impl FormationPrototype {
    /// Facing policy configured for the formation.
    #[must_use]
    pub const fn facing(&self) -> FormationFacing {
        match self {
            Self::Box { facing }
            | Self::Line { facing, .. }
            | Self::Arc { facing, .. }
            | Self::Fixed { facing, .. } => *facing,
        }
    }
}

/// Named formation shared between population objects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormationTemplate {
    /// Identifier of the template.
    pub id: PrototypeId,
    /// Formation parameters.
    pub formation: FormationPrototype,
}

/// Extra entity or blackout volume attached to a population object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PopulationRider {
    /// Entity that accompanies the cluster without taking part in the formation.
    Entity {
        /// Ridden entity prototype.
        entity: PrototypeId,
    },
    /// Blackout zone spawned around the group once it is placed.
    BlackOut {
        /// Blackout zone prototype.
        zone: PrototypeId,
    },
}

/// Entity repeated a number of times.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCount {
    /// Entity or selector prototype.
    pub entity: PrototypeId,
    /// Number of copies.
    #[serde(default = "default_count")]
    pub count: u32,
}

/// Population object required by a formation or a scripted event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequiredObject {
    /// Population object prototype.
    pub object: PrototypeId,
    /// Number of copies.
    #[serde(default = "default_count")]
    pub count: u32,
    /// Whether the copies go to the critical queue.
    #[serde(default)]
    pub critical: bool,
    /// Clusters per reference cluster area; overrides `count` when positive.
    #[serde(default)]
    pub density: f32,
    /// Areas the copies may spawn in.
    #[serde(default)]
    pub restrict_areas: Vec<AreaId>,
    /// Cells the copies may spawn in.
    #[serde(default)]
    pub restrict_cells: Vec<CellId>,
}

/// Authored member of an encounter.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncounterMember {
    /// Entity or selector prototype.
    pub entity: PrototypeId,
    /// Offset from the encounter origin.
    #[serde(default)]
    pub position: Vec3,
    /// Yaw in radians relative to the encounter.
    #[serde(default)]
    pub yaw: f32,
    /// Encounter phase gating the spawn; zero spawns immediately.
    #[serde(default)]
    pub phase: u32,
    /// Optional override of the entity's snap-to-floor behaviour.
    #[serde(default)]
    pub snap_to_floor: Option<bool>,
}

/// Blackout marker authored inside an encounter.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncounterBlackOut {
    /// Blackout zone prototype.
    pub zone: PrototypeId,
    /// Offset from the encounter origin.
    #[serde(default)]
    pub position: Vec3,
}

/// Shape of the cluster a population object expands into.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PopulationObjectKind {
    /// A single entity.
    Entity {
        /// Entity or selector prototype.
        entity: PrototypeId,
    },
    /// A fixed list of entities.
    ClusterFixed {
        /// Entities spawned once each.
        #[serde(default)]
        entities: Vec<PrototypeId>,
        /// Entities spawned a number of times each.
        #[serde(default)]
        entries: Vec<EntityCount>,
    },
    /// A random number of copies of one entity.
    Cluster {
        /// Minimum number of copies.
        min: u32,
        /// Maximum number of copies.
        max: u32,
        /// Entity or selector prototype.
        entity: PrototypeId,
    },
    /// A random number of entities picked from single-entity objects.
    ClusterMixed {
        /// Minimum number of picks.
        min: u32,
        /// Maximum number of picks.
        max: u32,
        /// Weighted single-entity population objects.
        choices: Vec<WeightedPrototype>,
    },
    /// A leader accompanied by one weighted henchmen object.
    Leader {
        /// Entity or selector prototype of the leader.
        leader: PrototypeId,
        /// Weighted henchmen population objects.
        #[serde(default)]
        henchmen: Vec<WeightedPrototype>,
    },
    /// An authored encounter with fixed member offsets.
    Encounter {
        /// Encounter resource reference.
        encounter: PrototypeId,
        /// Authored members.
        members: Vec<EncounterMember>,
        /// Optional blackout marker.
        #[serde(default)]
        blackout: Option<EncounterBlackOut>,
    },
    /// Nested population objects laid out as a formation of groups.
    Formation {
        /// Required nested objects.
        objects: Vec<RequiredObject>,
    },
}

/// Schedulable population object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PopulationObjectPrototype {
    /// Identifier of the object.
    pub id: PrototypeId,
    /// Inline formation; takes precedence over `formation_template`.
    #[serde(default)]
    pub formation: Option<FormationPrototype>,
    /// Shared formation template.
    #[serde(default)]
    pub formation_template: Option<PrototypeId>,
    /// Riders attached to the cluster.
    #[serde(default)]
    pub riders: Vec<PopulationRider>,
    /// Whether marker spawns adopt the marker yaw.
    #[serde(default)]
    pub use_marker_orientation: bool,
    /// Marker type this object spawns on when used as an encounter.
    #[serde(default)]
    pub use_population_marker: Option<PrototypeId>,
    /// Whether hostile clusters of this object ignore blackout zones.
    #[serde(default)]
    pub ignore_blackout: bool,
    /// Cluster shape.
    pub kind: PopulationObjectKind,
}

/// Sphere suppressing spawns.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlackOutZonePrototype {
    /// Identifier of the zone prototype.
    pub id: PrototypeId,
    /// Radius of the suppression sphere.
    pub radius: f32,
}

/// Designer-placed spawn point type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnMarkerPrototype {
    /// Identifier of the marker type.
    pub id: PrototypeId,
    /// Marker category.
    #[serde(default)]
    pub kind: MarkerKind,
}

/// Weighted enemy and encounter lists for an area theme.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PopulationThemePrototype {
    /// Identifier of the theme.
    pub id: PrototypeId,
    /// Weighted population objects spread over free floor.
    #[serde(default)]
    pub enemies: Vec<WeightedPrototype>,
    /// Weighted population objects spawned on markers.
    #[serde(default)]
    pub encounters: Vec<WeightedPrototype>,
}

/// Share of free markers of one type used for encounters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerDensity {
    /// Marker type.
    pub marker: PrototypeId,
    /// Percentage of free slots to fill.
    pub density_pct: f32,
}

/// Area population settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PopulationPrototype {
    /// Identifier of the population.
    pub id: PrototypeId,
    /// Themes; the first one drives the area.
    #[serde(default)]
    pub themes: Vec<PrototypeId>,
    /// Cluster density as a percentage of the reference cluster area.
    #[serde(default = "default_density_pct")]
    pub cluster_density_pct: f32,
    /// Peak cluster density a single cell may reach.
    #[serde(default = "default_density_pct")]
    pub cluster_density_peak_pct: f32,
    /// Encounters added regardless of theme.
    #[serde(default)]
    pub global_encounters: Vec<WeightedPrototype>,
    /// Per-marker encounter densities.
    #[serde(default)]
    pub encounter_densities: Vec<MarkerDensity>,
}

impl PopulationPrototype {
    /// Encounter density percentage configured for `marker`, zero when absent.
    #[must_use]
    pub fn encounter_density(&self, marker: PrototypeId) -> f32 {
        self.encounter_densities
            .iter()
            .find(|entry| entry.marker == marker)
            .map_or(0.0, |entry| entry.density_pct)
    }
}

/// Population spawned on behalf of a mission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MissionPopulationEntry {
    /// Population object prototype.
    pub object: PrototypeId,
    /// Number of copies.
    #[serde(default = "default_count")]
    pub count: u32,
    /// Areas the copies may spawn in.
    #[serde(default)]
    pub restrict_areas: Vec<AreaId>,
    /// Cells the copies may spawn in.
    #[serde(default)]
    pub restrict_cells: Vec<CellId>,
}

/// Mission with population requirements.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MissionPrototype {
    /// Identifier of the mission.
    pub id: PrototypeId,
    /// Open missions spawn through the regular queue.
    #[serde(default)]
    pub open: bool,
    /// Forces the critical queue for open missions.
    #[serde(default)]
    pub population_required: bool,
    /// Population entries.
    #[serde(default)]
    pub population: Vec<MissionPopulationEntry>,
}

impl MissionPrototype {
    /// Whether the mission's population goes to the critical queue.
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        !self.open || self.population_required
    }
}

/// Flat, serialisable prototype lists.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogDefinitions {
    /// Entity prototypes.
    #[serde(default)]
    pub entities: Vec<EntityPrototype>,
    /// Entity selectors.
    #[serde(default)]
    pub selectors: Vec<EntitySelectorPrototype>,
    /// Formation templates.
    #[serde(default)]
    pub formations: Vec<FormationTemplate>,
    /// Population objects.
    #[serde(default)]
    pub objects: Vec<PopulationObjectPrototype>,
    /// Blackout zone prototypes.
    #[serde(default)]
    pub blackouts: Vec<BlackOutZonePrototype>,
    /// Spawn marker prototypes.
    #[serde(default)]
    pub markers: Vec<SpawnMarkerPrototype>,
    /// Population themes.
    #[serde(default)]
    pub themes: Vec<PopulationThemePrototype>,
    /// Area populations.
    #[serde(default)]
    pub populations: Vec<PopulationPrototype>,
    /// Missions.
    #[serde(default)]
    pub missions: Vec<MissionPrototype>,
}

/// Indexed, read-only prototype lookup.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(from = "CatalogDefinitions")]
pub struct Catalog {
    entities: BTreeMap<PrototypeId, EntityPrototype>,
    selectors: BTreeMap<PrototypeId, EntitySelectorPrototype>,
    formations: BTreeMap<PrototypeId, FormationPrototype>,
    objects: BTreeMap<PrototypeId, PopulationObjectPrototype>,
    blackouts: BTreeMap<PrototypeId, BlackOutZonePrototype>,
    markers: BTreeMap<PrototypeId, SpawnMarkerPrototype>,
    themes: BTreeMap<PrototypeId, PopulationThemePrototype>,
    populations: BTreeMap<PrototypeId, PopulationPrototype>,
    missions: BTreeMap<PrototypeId, MissionPrototype>,
}

impl From<CatalogDefinitions> for Catalog {
    fn from(definitions: CatalogDefinitions) -> Self {
        Self {
            entities: definitions
                .entities
                .into_iter()
                .map(|proto| (proto.id, proto))
                .collect(),
            selectors: definitions
                .selectors
                .into_iter()
                .map(|proto| (proto.id, proto))
                .collect(),
            formations: definitions
                .formations
                .into_iter()
                .map(|template| (template.id, template.formation))
                .collect(),
            objects: definitions
                .objects
                .into_iter()
                .map(|proto| (proto.id, proto))
                .collect(),
            blackouts: definitions
                .blackouts
                .into_iter()
                .map(|proto| (proto.id, proto))
                .collect(),
            markers: definitions
                .markers
                .into_iter()
                .map(|proto| (proto.id, proto))
                .collect(),
            themes: definitions
                .themes
                .into_iter()
                .map(|proto| (proto.id, proto))
                .collect(),
            populations: definitions
                .populations
                .into_iter()
                .map(|proto| (proto.id, proto))
                .collect(),
            missions: definitions
                .missions
                .into_iter()
                .map(|proto| (proto.id, proto))
                .collect(),
        }
    }
}

impl Catalog {
    /// Looks up an entity prototype.
    #[must_use]
    pub fn entity(&self, id: PrototypeId) -> Option<&EntityPrototype> {
        self.entities.get(&id)
    }

    /// Looks up an entity selector.
    #[must_use]
    pub fn selector(&self, id: PrototypeId) -> Option<&EntitySelectorPrototype> {
        self.selectors.get(&id)
    }

    /// Looks up a formation template.
    #[must_use]
    pub fn formation_template(&self, id: PrototypeId) -> Option<&FormationPrototype> {
        self.formations.get(&id)
    }

    /// Looks up a population object.
    #[must_use]
    pub fn object(&self, id: PrototypeId) -> Option<&PopulationObjectPrototype> {
        self.objects.get(&id)
    }

    /// Looks up a blackout zone prototype.
    #[must_use]
    pub fn blackout(&self, id: PrototypeId) -> Option<&BlackOutZonePrototype> {
        self.blackouts.get(&id)
    }

    /// Looks up a spawn marker prototype.
    #[must_use]
    pub fn marker(&self, id: PrototypeId) -> Option<&SpawnMarkerPrototype> {
        self.markers.get(&id)
    }

    /// Looks up a population theme.
    #[must_use]
    pub fn theme(&self, id: PrototypeId) -> Option<&PopulationThemePrototype> {
        self.themes.get(&id)
    }

    /// Looks up an area population.
    #[must_use]
    pub fn population(&self, id: PrototypeId) -> Option<&PopulationPrototype> {
        self.populations.get(&id)
    }

    /// Looks up a mission.
    #[must_use]
    pub fn mission(&self, id: PrototypeId) -> Option<&MissionPrototype> {
        self.missions.get(&id)
    }

    /// Resolves `id` to a concrete entity, picking through a selector when needed.
    pub fn select_entity<R: Rng + ?Sized>(
        &self,
        id: PrototypeId,
        rng: &mut R,
    ) -> Option<PrototypeId> {
        if let Some(selector) = self.selectors.get(&id) {
            let mut picker = Picker::new();
            for entry in &selector.entities {
                picker.add(entry.prototype, entry.weight);
            }
            return picker.pick(rng).copied();
        }
        self.entities.contains_key(&id).then_some(id)
    }

    /// Formation used by `object`: the inline one, else its template.
    #[must_use]
    pub fn formation_of<'a>(
        &'a self,
        object: &'a PopulationObjectPrototype,
    ) -> Option<&'a FormationPrototype> {
        object.formation.as_ref().or_else(|| {
            object
                .formation_template
                .and_then(|template| self.formations.get(&template))
        })
    }

    /// Expected number of entities a population object expands into.
    ///
    /// Never below one so density budgets always make progress.
    #[must_use]
    pub fn average_size(&self, id: PrototypeId) -> f32 {
        self.average_size_at_depth(id, 0).max(MIN_AVERAGE_SIZE)
    }

    fn average_size_at_depth(&self, id: PrototypeId, depth: u32) -> f32 {
        const MAX_DEPTH: u32 = 8;
        if depth > MAX_DEPTH {
            return 0.0;
        }
        let Some(object) = self.objects.get(&id) else {
            return 0.0;
        };
        match &object.kind {
            PopulationObjectKind::Entity { .. } | PopulationObjectKind::Encounter { .. } => 1.0,
            PopulationObjectKind::ClusterFixed { entities, entries } => {
                let repeated: u32 = entries.iter().map(|entry| entry.count).sum();
                (entities.len() as u32 + repeated) as f32
            }
            PopulationObjectKind::Cluster { min, max, .. }
            | PopulationObjectKind::ClusterMixed { min, max, .. } => (*min + *max) as f32 / 2.0,
            PopulationObjectKind::Leader { henchmen, .. } => {
                if henchmen.is_empty() {
                    return 1.0;
                }
                let total: f32 = henchmen
                    .iter()
                    .map(|entry| self.average_size_at_depth(entry.prototype, depth + 1))
                    .sum();
                total / henchmen.len() as f32 + 1.0
            }
            PopulationObjectKind::Formation { objects } => objects
                .iter()
                .map(|required| {
                    required.count as f32 * self.average_size_at_depth(required.object, depth + 1)
                })
                .sum(),
        }
    }
}
