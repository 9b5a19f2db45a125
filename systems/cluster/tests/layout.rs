use std::sync::Arc;

use glam::Vec3;
use population_core::content::{
    BoundsPrototype, CatalogDefinitions, EncounterMember, EntityCount, EntityPrototype,
    FormationPrototype, FormationSlot, PopulationObjectKind, PopulationObjectPrototype,
    PopulationRider, WeightedPrototype,
};
use population_core::{
    geometry, Aabb, AreaId, Catalog, CellId, ClusterObjectFlags, EntityHost, EntitySettings,
    FormationFacing, PathFlags, PrototypeId, RegionView, SpawnError, SpawnFlags, SpawnGroupId,
    SpawnProperties, SpawnSpecId,
};
use population_system_cluster::{ClusterTree, PlacementScene, SpawnTarget};
use population_system_spatial::{BlackOutZones, QuadtreeConfig};
use population_world::{AreaLayout, CellLayout, EntityLedger, Region, RegionLayout};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const GOBLIN: PrototypeId = PrototypeId::new(1);
const ORC: PrototypeId = PrototypeId::new(2);
const WISP: PrototypeId = PrototypeId::new(3);
const BOULDER: PrototypeId = PrototypeId::new(4);

const PACK: PrototypeId = PrototypeId::new(100);
const LINE: PrototypeId = PrototypeId::new(101);
const ARC: PrototypeId = PrototypeId::new(102);
const FIXED_SHORT: PrototypeId = PrototypeId::new(103);
const FIXED: PrototypeId = PrototypeId::new(104);
const WARBAND: PrototypeId = PrototypeId::new(105);
const GOBLINS: PrototypeId = PrototypeId::new(106);
const AMBUSH: PrototypeId = PrototypeId::new(107);
const WISPS: PrototypeId = PrototypeId::new(108);
const EMPTY: PrototypeId = PrototypeId::new(109);
const RANDOM_PACK: PrototypeId = PrototypeId::new(110);

fn entity(id: PrototypeId, radius: Option<f32>) -> EntityPrototype {
    EntityPrototype {
        id,
        bounds: radius.map(|radius| BoundsPrototype {
            radius,
            half_height: 40.0,
            blocking: true,
            blocks_spawns: false,
        }),
        hostile: true,
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

fn fixed(id: PrototypeId, count: u32) -> PopulationObjectPrototype {
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

fn with_formation(
    mut object: PopulationObjectPrototype,
    formation: FormationPrototype,
) -> PopulationObjectPrototype {
    object.formation = Some(formation);
    object
}

fn catalog() -> Arc<Catalog> {
    let mut warband = object(
        WARBAND,
        PopulationObjectKind::Leader {
            leader: ORC,
            henchmen: vec![WeightedPrototype {
                prototype: GOBLINS,
                weight: 1,
            }],
        },
    );
    warband.riders = vec![PopulationRider::Entity { entity: WISP }];
    let mut goblins = fixed(GOBLINS, 2);
    goblins.riders = vec![PopulationRider::Entity { entity: WISP }];

    Arc::new(Catalog::from(CatalogDefinitions {
        entities: vec![
            entity(GOBLIN, Some(20.0)),
            entity(ORC, Some(30.0)),
            entity(WISP, None),
            entity(BOULDER, Some(5000.0)),
        ],
        objects: vec![
            fixed(PACK, 6),
            with_formation(
                fixed(LINE, 3),
                FormationPrototype::Line {
                    facing: FormationFacing::None,
                    spacing: 10.0,
                    rows: Vec::new(),
                },
            ),
            with_formation(
                fixed(ARC, 3),
                FormationPrototype::Arc {
                    facing: FormationFacing::FaceOrigin,
                    spacing: 10.0,
                    arc_degrees: 90.0,
                },
            ),
            with_formation(
                fixed(FIXED_SHORT, 3),
                FormationPrototype::Fixed {
                    facing: FormationFacing::None,
                    slots: vec![
                        FormationSlot {
                            x: 100.0,
                            y: 0.0,
                            yaw: 90.0,
                        },
                        FormationSlot {
                            x: -100.0,
                            y: 0.0,
                            yaw: 0.0,
                        },
                    ],
                },
            ),
            with_formation(
                fixed(FIXED, 2),
                FormationPrototype::Fixed {
                    facing: FormationFacing::None,
                    slots: vec![
                        FormationSlot {
                            x: 100.0,
                            y: 0.0,
                            yaw: 90.0,
                        },
                        FormationSlot {
                            x: -100.0,
                            y: 0.0,
                            yaw: 0.0,
                        },
                    ],
                },
            ),
            warband,
            goblins,
            object(
                AMBUSH,
                PopulationObjectKind::Encounter {
                    encounter: PrototypeId::new(900),
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
                    blackout: None,
                },
            ),
            object(WISPS, PopulationObjectKind::Entity { entity: WISP }),
            object(
                EMPTY,
                PopulationObjectKind::Cluster {
                    min: 0,
                    max: 0,
                    entity: GOBLIN,
                },
            ),
            object(
                RANDOM_PACK,
                PopulationObjectKind::Cluster {
                    min: 2,
                    max: 5,
                    entity: GOBLIN,
                },
            ),
        ],
        ..CatalogDefinitions::default()
    }))
}

fn region() -> Region {
    Region::from_layout(&RegionLayout {
        min: Vec3::ZERO,
        max: Vec3::new(2000.0, 2000.0, 200.0),
        marker_filters: Vec::new(),
        areas: vec![AreaLayout {
            id: AreaId::new(1),
            level: 1,
            population: None,
        }],
        cells: vec![CellLayout {
            id: CellId::new(1),
            area: AreaId::new(1),
            min: Vec3::ZERO,
            max: Vec3::new(2000.0, 2000.0, 200.0),
            floor: Some(0.0),
            has_floor: true,
            spawnable_area: None,
            markers: Vec::new(),
            obstacles: Vec::new(),
        }],
    })
    .expect("valid layout")
}

fn built(catalog: &Catalog, object: PrototypeId, flags: SpawnFlags, seed: u64) -> ClusterTree {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut tree = ClusterTree::build(catalog, object, &SpawnProperties::default(), flags, &mut rng)
        .expect("object exists");
    tree.initialize(catalog).expect("cluster initialises");
    tree
}

fn place_boulder(ledger: &mut EntityLedger, position: Vec3) {
    let _ = ledger
        .create_entity(&EntitySettings {
            prototype: BOULDER,
            position,
            yaw: 0.0,
            cell: CellId::new(1),
            area: AreaId::new(1),
            level: 1,
            properties: SpawnProperties::default(),
            group: SpawnGroupId::new(1),
            spec: SpawnSpecId::new(1),
            snap_to_floor: false,
            spawner: None,
        })
        .expect("boulder created");
}

#[test]
fn root_radius_bounds_every_member() {
    let catalog = catalog();
    let tree = built(&catalog, PACK, SpawnFlags::empty(), 1);
    let mut widest: f32 = 0.0;
    for leaf in tree.leaves() {
        let node = tree.node(leaf).expect("leaf exists");
        let reach = geometry::distance_2d(Vec3::ZERO, node.position()) + node.radius();
        assert!(reach <= tree.radius() + 1e-3);
        widest = widest.max(reach);
    }
    assert!((widest - tree.radius()).abs() < 1e-3);
    let second_ring = Vec3::new(-80.0, -40.0, 0.0).length() + 20.0;
    assert!((tree.radius() - second_ring).abs() < 1e-3);
}

#[test]
fn line_formation_fills_the_row_from_the_centre() {
    let catalog = catalog();
    let tree = built(&catalog, LINE, SpawnFlags::empty(), 1);
    let ys: Vec<f32> = tree
        .leaves()
        .into_iter()
        .map(|leaf| tree.node(leaf).expect("leaf").position().y)
        .collect();
    assert_eq!(ys.len(), 3);
    assert!(ys[0].abs() < 1e-3);
    assert!((ys[1] + 50.0).abs() < 1e-3);
    assert!((ys[2] - 50.0).abs() < 1e-3);
}

#[test]
fn arc_formation_is_symmetric_around_forward() {
    let catalog = catalog();
    let tree = built(&catalog, ARC, SpawnFlags::empty(), 1);
    let leaves = tree.leaves();
    let middle = tree.node(leaves[0]).expect("leaf");
    let sector = 150.0 / std::f32::consts::FRAC_PI_2;
    assert!(middle.position().distance(Vec3::new(sector, 0.0, 0.0)) < 1e-2);
    assert!((middle.yaw().abs() - std::f32::consts::PI).abs() < 1e-4);
    let left = tree.node(leaves[1]).expect("leaf").position();
    let right = tree.node(leaves[2]).expect("leaf").position();
    assert!((left.y + right.y).abs() < 1e-2);
    assert!((left.x - right.x).abs() < 1e-2);
}

#[test]
fn fixed_formation_without_enough_slots_fails() {
    let catalog = catalog();
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let mut tree = ClusterTree::build(
        &catalog,
        FIXED_SHORT,
        &SpawnProperties::default(),
        SpawnFlags::empty(),
        &mut rng,
    )
    .expect("object exists");
    assert_eq!(
        tree.initialize(&catalog),
        Err(SpawnError::InsufficientSlots {
            object: Some(FIXED_SHORT),
            slots: 2,
            objects: 3,
        })
    );
}

#[test]
fn fixed_formation_uses_slot_offsets_and_yaw() {
    let catalog = catalog();
    let tree = built(&catalog, FIXED, SpawnFlags::empty(), 1);
    let first = tree.node(tree.leaves()[0]).expect("leaf");
    assert!(first.position().distance(Vec3::new(100.0, 0.0, 0.0)) < 1e-3);
    assert!((first.yaw() - std::f32::consts::FRAC_PI_2).abs() < 1e-5);
}

#[test]
fn leader_brings_henchmen_and_riders() {
    let catalog = catalog();
    let tree = built(&catalog, WARBAND, SpawnFlags::empty(), 3);
    let leaves = tree.leaves();
    assert_eq!(leaves.len(), 4, "leader, two henchmen and one rider");
    let flags: Vec<ClusterObjectFlags> = leaves
        .iter()
        .map(|leaf| tree.node(*leaf).expect("leaf").flags())
        .collect();
    assert!(flags[0].contains(ClusterObjectFlags::LEADER));
    assert!(flags[1].contains(ClusterObjectFlags::HENCHMEN));
    assert!(flags[2].contains(ClusterObjectFlags::HENCHMEN));
    assert!(flags[3].contains(ClusterObjectFlags::SKIP_FORMATION));
    assert_eq!(
        tree.node(leaves[3]).and_then(|node| node.as_entity()).map(|e| e.entity()),
        Some(WISP)
    );
    assert!(tree.flags().contains(ClusterObjectFlags::HOSTILE));
}

#[test]
fn encounter_members_keep_authored_offsets() {
    let catalog = catalog();
    let tree = built(&catalog, AMBUSH, SpawnFlags::empty(), 1);
    assert_eq!(tree.root_group().expect("root group").encounter(), Some(PrototypeId::new(900)));
    let leaves = tree.leaves();
    let second = tree.node(leaves[1]).expect("leaf");
    assert_eq!(second.position(), Vec3::new(0.0, -50.0, 0.0));
    let data = second.as_entity().expect("entity");
    assert_eq!(data.encounter_phase(), 2);
    assert_eq!(data.snap_to_floor(), Some(false));
    assert!((tree.radius() - 120.0).abs() < 1e-3);
}

#[test]
fn degenerate_clusters_are_rejected() {
    let catalog = catalog();
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let mut empty = ClusterTree::build(
        &catalog,
        EMPTY,
        &SpawnProperties::default(),
        SpawnFlags::empty(),
        &mut rng,
    )
    .expect("object exists");
    assert_eq!(
        empty.initialize(&catalog),
        Err(SpawnError::EmptyCluster(Some(EMPTY)))
    );

    let mut shapeless = ClusterTree::build(
        &catalog,
        WISPS,
        &SpawnProperties::default(),
        SpawnFlags::empty(),
        &mut rng,
    )
    .expect("object exists");
    assert_eq!(shapeless.initialize(&catalog), Err(SpawnError::ZeroRadius));

    assert!(matches!(
        ClusterTree::build(
            &catalog,
            PrototypeId::new(4242),
            &SpawnProperties::default(),
            SpawnFlags::empty(),
            &mut rng,
        ),
        Err(SpawnError::MissingPrototype(_))
    ));
}

#[test]
fn placement_is_deterministic_for_a_seed() {
    let catalog = catalog();
    let region = region();
    let blackouts = BlackOutZones::new(region.bounds(), QuadtreeConfig::default());
    let ledger = EntityLedger::new(Arc::clone(&catalog));
    let scene = PlacementScene {
        region: &region,
        blackouts: &blackouts,
        host: &ledger,
    };

    let layout = |seed: u64| {
        let mut tree = built(&catalog, RANDOM_PACK, SpawnFlags::empty(), seed);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        tree.try_place(&SpawnTarget::Position(Vec3::new(1000.0, 1000.0, 50.0)), &scene, &mut rng)
            .expect("open floor");
        tree.leaves()
            .into_iter()
            .map(|leaf| tree.absolute_position(leaf))
            .collect::<Vec<_>>()
    };
    let first = layout(11);
    assert_eq!(first, layout(11));
    assert!(first.iter().all(|position| position.z.abs() < 1e-4), "projected to the floor");
}

fn placed_layout(catalog: &Arc<Catalog>, object: PrototypeId, seed: u64) -> Vec<(Vec3, f32)> {
    let region = region();
    let blackouts = BlackOutZones::new(region.bounds(), QuadtreeConfig::default());
    let ledger = EntityLedger::new(Arc::clone(catalog));
    let scene = PlacementScene {
        region: &region,
        blackouts: &blackouts,
        host: &ledger,
    };
    let mut tree = built(catalog, object, SpawnFlags::empty(), seed);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let bounds = Aabb::new(Vec3::ZERO, Vec3::new(2000.0, 2000.0, 100.0));
    tree.try_place(&SpawnTarget::Bounds(bounds), &scene, &mut rng)
        .expect("open floor");
    tree.leaves()
        .into_iter()
        .map(|leaf| {
            let yaw = tree.node(leaf).expect("leaf").yaw();
            (tree.absolute_position(leaf), yaw)
        })
        .collect()
}

#[test]
fn every_formation_repeats_for_the_same_seed() {
    let catalog = catalog();
    for object in [LINE, ARC, PACK, RANDOM_PACK] {
        for seed in [3, 17, 901] {
            let first = placed_layout(&catalog, object, seed);
            assert!(!first.is_empty());
            assert_eq!(first, placed_layout(&catalog, object, seed), "{object:?} seed {seed}");
        }
    }
}

#[test]
fn box_layouts_vary_with_the_seed() {
    let catalog = catalog();
    for object in [PACK, RANDOM_PACK] {
        let layouts: Vec<_> = (0..16)
            .map(|seed| placed_layout(&catalog, object, seed))
            .collect();
        assert!(
            layouts.iter().any(|layout| *layout != layouts[0]),
            "{object:?} ignores the seed"
        );
    }
    let sizes: std::collections::BTreeSet<usize> = (0..32)
        .map(|seed| built(&catalog, RANDOM_PACK, SpawnFlags::empty(), seed).leaves().len())
        .collect();
    assert!(sizes.len() > 1, "member count is rolled per seed");
    assert!(sizes.iter().all(|size| (2..=5).contains(size)));
}

#[test]
fn blackout_retry_relaxes_the_zone_check() {
    let catalog = catalog();
    let region = region();
    let mut blackouts = BlackOutZones::new(region.bounds(), QuadtreeConfig::default());
    let _ = blackouts
        .add(Vec3::new(1000.0, 1000.0, 0.0), 3000.0, None)
        .expect("zone inside the region");
    let ledger = EntityLedger::new(Arc::clone(&catalog));
    let scene = PlacementScene {
        region: &region,
        blackouts: &blackouts,
        host: &ledger,
    };
    let target = SpawnTarget::Position(Vec3::new(1000.0, 1000.0, 0.0));
    let mut rng = ChaCha8Rng::seed_from_u64(5);

    let mut strict = built(&catalog, PACK, SpawnFlags::empty(), 5);
    assert_eq!(
        strict.try_place(&target, &scene, &mut rng),
        Err(SpawnError::PlacementFailed)
    );

    let mut relaxed = built(&catalog, PACK, SpawnFlags::RETRY_IGNORING_BLACKOUT, 5);
    assert_eq!(relaxed.try_place(&target, &scene, &mut rng), Ok(()));
    assert!(relaxed.spawn_flags().contains(SpawnFlags::IGNORE_BLACKOUT));
}

#[test]
fn forced_spawner_placement_reports_overlap() {
    let catalog = catalog();
    let region = region();
    let blackouts = BlackOutZones::new(region.bounds(), QuadtreeConfig::default());
    let mut ledger = EntityLedger::new(Arc::clone(&catalog));
    place_boulder(&mut ledger, Vec3::new(1000.0, 1000.0, 0.0));
    let scene = PlacementScene {
        region: &region,
        blackouts: &blackouts,
        host: &ledger,
    };
    let spawner = Vec3::new(1000.0, 1000.0, 0.0);
    let target = SpawnTarget::Spawner {
        position: spawner,
        yaw: 0.5,
        min_distance: 0.0,
        max_distance: 300.0,
        facing: FormationFacing::FaceParent,
    };
    let mut rng = ChaCha8Rng::seed_from_u64(8);

    let mut polite = built(&catalog, PACK, SpawnFlags::empty(), 8);
    assert_eq!(
        polite.try_place(&target, &scene, &mut rng),
        Err(SpawnError::PlacementFailed)
    );

    let mut forced = built(&catalog, PACK, SpawnFlags::RETRY_FORCE, 8);
    assert_eq!(forced.try_place(&target, &scene, &mut rng), Ok(()));
    assert_eq!(forced.absolute_position(forced.root()), spawner);
    assert!(forced.overlaps_blocking(&ledger));
}

#[test]
fn invalid_sectors_are_refused() {
    let catalog = catalog();
    let region = region();
    let blackouts = BlackOutZones::new(region.bounds(), QuadtreeConfig::default());
    let ledger = EntityLedger::new(Arc::clone(&catalog));
    let scene = PlacementScene {
        region: &region,
        blackouts: &blackouts,
        host: &ledger,
    };
    let mut tree = built(&catalog, PACK, SpawnFlags::empty(), 1);
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    assert_eq!(
        tree.pick_position_in_sector(
            Vec3::ZERO,
            0.0,
            200.0,
            100.0,
            FormationFacing::None,
            &scene,
            &mut rng,
        ),
        Err(SpawnError::InvalidSector {
            min: 200.0,
            max: 100.0,
        })
    );
}

#[test]
fn marker_target_places_without_validation() {
    let catalog = catalog();
    let region = region();
    let mut blackouts = BlackOutZones::new(region.bounds(), QuadtreeConfig::default());
    let _ = blackouts
        .add(Vec3::new(1000.0, 1000.0, 0.0), 3000.0, None)
        .expect("zone inside the region");
    let ledger = EntityLedger::new(Arc::clone(&catalog));
    let scene = PlacementScene {
        region: &region,
        blackouts: &blackouts,
        host: &ledger,
    };
    let mut tree = built(&catalog, PACK, SpawnFlags::empty(), 1);
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let marker = Vec3::new(500.0, 500.0, 0.0);
    assert_eq!(
        tree.try_place(
            &SpawnTarget::Marker {
                position: marker,
                yaw: 1.0,
            },
            &scene,
            &mut rng,
        ),
        Ok(())
    );
    let root = tree.node(tree.root()).expect("root");
    assert_eq!(root.position(), marker);
    assert_eq!(root.yaw(), 0.0, "object does not keep marker orientation");
}
