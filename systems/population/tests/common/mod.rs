#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;
use population_core::content::{
    BlackOutZonePrototype, BoundsPrototype, CatalogDefinitions, EncounterBlackOut,
    EncounterMember, EntityCount, EntityPrototype, FormationPrototype, FormationSlot,
    MarkerDensity, MissionPopulationEntry, MissionPrototype, PopulationObjectKind,
    PopulationObjectPrototype, PopulationPrototype, PopulationRider, PopulationThemePrototype,
    SpawnMarkerPrototype, WeightedPrototype,
};
use population_core::{
    AreaId, Catalog, CellId, Event, FormationFacing, MarkerKind, MarkerPlacement, PathFlags,
    PrototypeId,
};
use population_system_population::{PopulationConfig, PopulationManager};
use population_world::{AreaLayout, CellLayout, EntityLedger, Region, RegionLayout};

pub const GOBLIN: PrototypeId = PrototypeId::new(1);
pub const PEDDLER: PrototypeId = PrototypeId::new(2);

pub const GUARD: PrototypeId = PrototypeId::new(10);
pub const CAMP: PrototypeId = PrototypeId::new(11);

pub const LONE_GOBLIN: PrototypeId = PrototypeId::new(100);
pub const PACK: PrototypeId = PrototypeId::new(101);
pub const AMBUSH: PrototypeId = PrototypeId::new(102);
pub const FIXED_SHORT: PrototypeId = PrototypeId::new(103);
pub const WARDED: PrototypeId = PrototypeId::new(104);
pub const CARAVAN: PrototypeId = PrototypeId::new(105);

pub const ZONE: PrototypeId = PrototypeId::new(200);
pub const THEME: PrototypeId = PrototypeId::new(300);
pub const WILDS: PrototypeId = PrototypeId::new(400);
pub const RESCUE: PrototypeId = PrototypeId::new(500);
pub const ENCOUNTER: PrototypeId = PrototypeId::new(900);

pub const WILD_AREA: AreaId = AreaId::new(1);
pub const TOWN_AREA: AreaId = AreaId::new(2);
pub const WILD_CELL: CellId = CellId::new(1);
pub const TOWN_CELL: CellId = CellId::new(2);

fn entity(id: PrototypeId, hostile: bool) -> EntityPrototype {
    EntityPrototype {
        id,
        bounds: Some(BoundsPrototype {
            radius: 20.0,
            half_height: 40.0,
            blocking: true,
            blocks_spawns: false,
        }),
        hostile,
        path_flags: PathFlags::WALK,
        rank: None,
        modifiers: Vec::new(),
    }
}

fn object(id: PrototypeId, kind: PopulationObjectKind) -> PopulationObjectPrototype {
    PopulationObjectPrototype {
        id,
        formation: None,
        formation_template: None,
        riders: Vec::new(),
        use_marker_orientation: false,
        use_population_marker: None,
        ignore_blackout: false,
        kind,
    }
}

fn goblins(id: PrototypeId, count: u32) -> PopulationObjectPrototype {
    object(
        id,
        PopulationObjectKind::ClusterFixed {
            entities: Vec::new(),
            entries: vec![EntityCount {
                entity: GOBLIN,
                count,
            }],
        },
    )
}

pub fn catalog() -> Arc<Catalog> {
    let mut lone = object(LONE_GOBLIN, PopulationObjectKind::Entity { entity: GOBLIN });
    lone.use_population_marker = Some(GUARD);

    let mut ambush = object(
        AMBUSH,
        PopulationObjectKind::Encounter {
            encounter: ENCOUNTER,
            members: vec![
                EncounterMember {
                    entity: GOBLIN,
                    position: Vec3::new(100.0, 0.0, 0.0),
                    yaw: 0.0,
                    phase: 0,
                    snap_to_floor: None,
                },
                EncounterMember {
                    entity: GOBLIN,
                    position: Vec3::new(0.0, -50.0, 0.0),
                    yaw: 0.0,
                    phase: 2,
                    snap_to_floor: Some(false),
                },
            ],
            blackout: Some(EncounterBlackOut {
                zone: ZONE,
                position: Vec3::ZERO,
            }),
        },
    );
    ambush.use_population_marker = Some(CAMP);

    let mut fixed_short = goblins(FIXED_SHORT, 3);
    fixed_short.formation = Some(FormationPrototype::Fixed {
        facing: FormationFacing::None,
        slots: vec![
            FormationSlot {
                x: 60.0,
                y: 0.0,
                yaw: 0.0,
            },
            FormationSlot {
                x: -60.0,
                y: 0.0,
                yaw: 0.0,
            },
        ],
    });

    let mut warded = object(WARDED, PopulationObjectKind::Entity { entity: GOBLIN });
    warded.riders = vec![PopulationRider::BlackOut { zone: ZONE }];

    Arc::new(Catalog::from(CatalogDefinitions {
        entities: vec![entity(GOBLIN, true), entity(PEDDLER, false)],
        objects: vec![
            lone,
            goblins(PACK, 3),
            ambush,
            fixed_short,
            warded,
            object(CARAVAN, PopulationObjectKind::Entity { entity: PEDDLER }),
        ],
        blackouts: vec![BlackOutZonePrototype {
            id: ZONE,
            radius: 150.0,
        }],
        markers: vec![
            SpawnMarkerPrototype {
                id: GUARD,
                kind: MarkerKind::Entity,
            },
            SpawnMarkerPrototype {
                id: CAMP,
                kind: MarkerKind::Encounter,
            },
        ],
        themes: vec![PopulationThemePrototype {
            id: THEME,
            enemies: vec![WeightedPrototype {
                prototype: PACK,
                weight: 1,
            }],
            encounters: vec![WeightedPrototype {
                prototype: LONE_GOBLIN,
                weight: 1,
            }],
        }],
        populations: vec![PopulationPrototype {
            id: WILDS,
            themes: vec![THEME],
            cluster_density_pct: 100.0,
            cluster_density_peak_pct: 100.0,
            global_encounters: Vec::new(),
            encounter_densities: vec![MarkerDensity {
                marker: GUARD,
                density_pct: 100.0,
            }],
        }],
        missions: vec![MissionPrototype {
            id: RESCUE,
            open: false,
            population_required: false,
            population: vec![MissionPopulationEntry {
                object: LONE_GOBLIN,
                count: 2,
                restrict_areas: Vec::new(),
                restrict_cells: vec![TOWN_CELL],
            }],
        }],
        ..CatalogDefinitions::default()
    }))
}

fn marker(marker: PrototypeId, x: f32, y: f32) -> MarkerPlacement {
    MarkerPlacement {
        marker,
        position: Vec3::new(x, y, 0.0),
        yaw: 0.0,
        filter: None,
    }
}

/// Wild area with three guard posts and a camp, and a town with one guard post.
pub fn region() -> Region {
    Region::from_layout(&RegionLayout {
        min: Vec3::ZERO,
        max: Vec3::new(2000.0, 1000.0, 100.0),
        marker_filters: Vec::new(),
        areas: vec![
            AreaLayout {
                id: WILD_AREA,
                level: 7,
                population: Some(WILDS),
            },
            AreaLayout {
                id: TOWN_AREA,
                level: 3,
                population: None,
            },
        ],
        cells: vec![
            CellLayout {
                id: WILD_CELL,
                area: WILD_AREA,
                min: Vec3::ZERO,
                max: Vec3::new(1000.0, 1000.0, 100.0),
                floor: None,
                has_floor: true,
                spawnable_area: None,
                markers: vec![
                    marker(GUARD, -300.0, -300.0),
                    marker(GUARD, 0.0, -300.0),
                    marker(GUARD, 300.0, -300.0),
                    marker(CAMP, 0.0, 300.0),
                ],
                obstacles: Vec::new(),
            },
            CellLayout {
                id: TOWN_CELL,
                area: TOWN_AREA,
                min: Vec3::new(1000.0, 0.0, 0.0),
                max: Vec3::new(2000.0, 1000.0, 100.0),
                floor: None,
                has_floor: true,
                spawnable_area: None,
                markers: vec![marker(GUARD, 0.0, 0.0)],
                obstacles: Vec::new(),
            },
        ],
    })
    .expect("valid layout")
}

/// Region, host and manager wired together.
pub struct Sim {
    pub region: Region,
    pub ledger: EntityLedger,
    pub manager: PopulationManager,
    pub events: Vec<Event>,
}

impl Sim {
    pub fn new(seed: u64) -> Self {
        let catalog = catalog();
        let region = region();
        let config = PopulationConfig {
            rng_seed: seed,
            ..PopulationConfig::default()
        };
        let mut manager = PopulationManager::new(config, Arc::clone(&catalog), &region);
        manager.initialize(&region);
        Self {
            region,
            ledger: EntityLedger::new(catalog),
            manager,
            events: Vec::new(),
        }
    }

    pub fn advance(&mut self, dt: Duration) {
        self.manager
            .advance(dt, &self.region, &mut self.ledger, &mut self.events);
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|event| matches(event)).count()
    }

    pub fn marker_groups(&self) -> usize {
        self.manager
            .spawn_groups()
            .filter(|group| group.reservation().is_some())
            .count()
    }
}
