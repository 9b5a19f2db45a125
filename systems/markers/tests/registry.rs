use std::time::Duration;

use glam::Vec3;
use population_core::content::{CatalogDefinitions, SpawnMarkerPrototype};
use population_core::{
    AreaId, BlackOutId, Catalog, CellId, MarkerKind, MarkerPlacement, MarkerState, PrototypeId,
    RegionView, ReservationId, SpawnFlags, SpawnLocation, Sphere,
};
use population_system_markers::{RegistryConfig, SpawnMarkerRegistry};
use population_system_spatial::BlackOutZone;
use population_world::{AreaLayout, CellLayout, Region, RegionLayout};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const GUARD: PrototypeId = PrototypeId::new(10);
const CAMP: PrototypeId = PrototypeId::new(11);
const PROP: PrototypeId = PrototypeId::new(12);
const FILTERED: PrototypeId = PrototypeId::new(500);

fn catalog() -> Catalog {
    Catalog::from(CatalogDefinitions {
        markers: vec![
            SpawnMarkerPrototype {
                id: GUARD,
                kind: MarkerKind::Entity,
            },
            SpawnMarkerPrototype {
                id: CAMP,
                kind: MarkerKind::Encounter,
            },
            SpawnMarkerPrototype {
                id: PROP,
                kind: MarkerKind::Prop,
            },
        ],
        ..CatalogDefinitions::default()
    })
}

fn marker(marker: PrototypeId, x: f32, y: f32) -> MarkerPlacement {
    MarkerPlacement {
        marker,
        position: Vec3::new(x, y, 0.0),
        yaw: 0.0,
        filter: None,
    }
}

fn cell(id: u32, area: u32, x: f32, markers: Vec<MarkerPlacement>) -> CellLayout {
    CellLayout {
        id: CellId::new(id),
        area: AreaId::new(area),
        min: Vec3::new(x, 0.0, 0.0),
        max: Vec3::new(x + 1000.0, 1000.0, 100.0),
        floor: None,
        has_floor: true,
        spawnable_area: None,
        markers,
        obstacles: Vec::new(),
    }
}

fn region() -> Region {
    let mut filtered = marker(GUARD, 300.0, 300.0);
    filtered.filter = Some(FILTERED);
    let layout = RegionLayout {
        min: Vec3::ZERO,
        max: Vec3::new(3000.0, 1000.0, 100.0),
        marker_filters: Vec::new(),
        areas: vec![
            AreaLayout {
                id: AreaId::new(1),
                level: 1,
                population: None,
            },
            AreaLayout {
                id: AreaId::new(2),
                level: 1,
                population: None,
            },
        ],
        cells: vec![
            cell(
                1,
                1,
                0.0,
                vec![
                    marker(GUARD, -200.0, 0.0),
                    marker(GUARD, 0.0, 0.0),
                    marker(GUARD, 200.0, 0.0),
                    marker(PROP, 0.0, 200.0),
                    filtered,
                ],
            ),
            cell(2, 2, 1000.0, vec![marker(GUARD, 0.0, 0.0), marker(CAMP, 100.0, 100.0)]),
            cell(3, 2, 2000.0, vec![marker(CAMP, 900.0, 0.0)]),
        ],
    };
    Region::from_layout(&layout).expect("valid layout")
}

fn registry() -> SpawnMarkerRegistry {
    let region = region();
    let mut registry = SpawnMarkerRegistry::new(region.bounds(), RegistryConfig::default());
    registry.initialize(&region, &catalog());
    registry
}

#[test]
fn harvest_skips_props_and_filtered_markers() {
    let registry = registry();
    assert_eq!(registry.len(), 6);
    assert_eq!(registry.calc_free_reservation(GUARD, Some(AreaId::new(1))), 3);
    assert_eq!(registry.calc_free_reservation(GUARD, None), 4);
    assert_eq!(registry.calc_free_reservation(PROP, None), 0);
    assert_eq!(registry.positions_by_marker(CAMP).len(), 2);
}

#[test]
fn marker_outside_cell_is_still_registered() {
    let registry = registry();
    let outside = registry
        .reservation(ReservationId::new(CellId::new(3), 1))
        .expect("marker registered despite lying outside its cell");
    // Offsets are taken from the full cell centre, height included.
    assert_eq!(outside.position(), Vec3::new(3400.0, 500.0, 50.0));
    assert!(registry.is_indexed(outside.id()));
}

#[test]
fn reserving_in_area_with_three_free_slots_leaves_two() {
    let mut registry = registry();
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let location = SpawnLocation::area(AreaId::new(1));
    let id = registry
        .reserve_free_reservation(
            GUARD,
            &mut rng,
            Duration::ZERO,
            &location,
            SpawnFlags::IGNORE_SIMULATED,
            Duration::ZERO,
        )
        .expect("a slot is available");
    assert_eq!(id.cell(), CellId::new(1));
    assert_eq!(
        registry.reservation(id).map(|r| r.state()),
        Some(MarkerState::Reserved)
    );
    assert_eq!(registry.calc_free_reservation(GUARD, Some(AreaId::new(1))), 2);
}

#[test]
fn claims_never_exceed_free_slots() {
    let mut registry = registry();
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let location = SpawnLocation::area(AreaId::new(1));
    let claims: Vec<ReservationId> = (0..5)
        .filter_map(|_| {
            registry.reserve_free_reservation(
                GUARD,
                &mut rng,
                Duration::ZERO,
                &location,
                SpawnFlags::empty(),
                Duration::ZERO,
            )
        })
        .collect();
    assert_eq!(claims.len(), 3);
    let mut unique = claims.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 3);
}

#[test]
fn released_slot_rests_for_the_respawn_delay() {
    let mut registry = registry();
    let mut rng = ChaCha8Rng::seed_from_u64(2);
    let location = SpawnLocation {
        cells: [CellId::new(2)].into_iter().collect(),
        ..SpawnLocation::default()
    };
    let delay = Duration::from_secs(30);
    let id = registry
        .reserve_free_reservation(
            GUARD,
            &mut rng,
            Duration::ZERO,
            &location,
            SpawnFlags::empty(),
            delay,
        )
        .expect("cell 2 has one guard slot");
    assert!(registry.free_reservation(id, Duration::from_secs(100)));

    let early = registry.reserve_free_reservation(
        GUARD,
        &mut rng,
        Duration::from_secs(110),
        &location,
        SpawnFlags::empty(),
        delay,
    );
    assert_eq!(early, None);
    let late = registry.reserve_free_reservation(
        GUARD,
        &mut rng,
        Duration::from_secs(130),
        &location,
        SpawnFlags::empty(),
        delay,
    );
    assert_eq!(late, Some(id));
}

#[test]
fn simulated_slots_are_used_only_as_a_fallback() {
    let mut registry = registry();
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    registry.on_simulation(CellId::new(1), 1);
    let id = registry
        .reserve_free_reservation(
            GUARD,
            &mut rng,
            Duration::ZERO,
            &SpawnLocation::default(),
            SpawnFlags::IGNORE_SIMULATED,
            Duration::ZERO,
        )
        .expect("free slot");
    assert_eq!(id.cell(), CellId::new(2));

    let fallback = registry
        .reserve_free_reservation(
            GUARD,
            &mut rng,
            Duration::ZERO,
            &SpawnLocation::default(),
            SpawnFlags::IGNORE_SIMULATED,
            Duration::ZERO,
        )
        .expect("simulated slot used once nothing else is left");
    assert_eq!(fallback.cell(), CellId::new(1));
}

#[test]
fn blackout_zones_suppress_slots_until_nothing_else_is_left() {
    let mut registry = registry();
    let zone = BlackOutZone {
        id: BlackOutId::new(1),
        sphere: Sphere::new(Vec3::new(500.0, 500.0, 0.0), 400.0),
        mission: None,
    };
    registry.add_blackout_zone(&zone);
    let covered = registry
        .reservation(ReservationId::new(CellId::new(1), 2))
        .expect("center guard");
    assert_eq!(covered.blackout_count(), 1);
    assert_eq!(
        registry.count_reservations(GUARD, Some(AreaId::new(1)), SpawnFlags::empty()),
        0
    );

    let mut rng = ChaCha8Rng::seed_from_u64(4);
    let id = registry.reserve_free_reservation(
        GUARD,
        &mut rng,
        Duration::ZERO,
        &SpawnLocation::area(AreaId::new(1)),
        SpawnFlags::empty(),
        Duration::ZERO,
    );
    assert!(id.is_some(), "blackout is ignored on the last retry");

    registry.remove_blackout_zone(&zone);
    assert_eq!(
        registry.count_reservations(GUARD, Some(AreaId::new(1)), SpawnFlags::empty()),
        2
    );
}

#[test]
fn removing_a_cell_clears_every_lookup() {
    let mut registry = registry();
    registry.remove_cell(CellId::new(2));
    assert_eq!(registry.len(), 4);
    assert_eq!(registry.calc_free_reservation(GUARD, Some(AreaId::new(2))), 0);
    assert_eq!(registry.positions_by_marker(CAMP).len(), 1);
    assert!(registry
        .reservation_by_pid(ReservationId::new(CellId::new(2), 1).pid())
        .is_none());
    assert!(registry
        .reservation_by_pid(ReservationId::new(CellId::new(3), 1).pid())
        .is_some());
    assert!(registry
        .reservations_in_volume(&population_core::Aabb::new(
            Vec3::new(1000.0, 0.0, -10.0),
            Vec3::new(2000.0, 1000.0, 10.0),
        ))
        .is_empty());
}

#[test]
fn harvesting_a_cell_again_keeps_claims_and_fresh_ids() {
    let region = region();
    let catalog = catalog();
    let mut registry = SpawnMarkerRegistry::new(region.bounds(), RegistryConfig::default());
    registry.initialize(&region, &catalog);
    let mut rng = ChaCha8Rng::seed_from_u64(4);
    let location = SpawnLocation::area(AreaId::new(1));
    let held = registry
        .reserve_free_reservation(
            GUARD,
            &mut rng,
            Duration::ZERO,
            &location,
            SpawnFlags::empty(),
            Duration::ZERO,
        )
        .expect("a slot is available");

    registry.add_cell(&region, &catalog, CellId::new(1));
    assert_eq!(registry.len(), 6);
    assert_eq!(
        registry.reservation(held).map(|r| r.state()),
        Some(MarkerState::Reserved)
    );
    assert_eq!(registry.calc_free_reservation(GUARD, Some(AreaId::new(1))), 2);

    registry.remove_cell(CellId::new(1));
    registry.add_cell(&region, &catalog, CellId::new(1));
    assert_eq!(registry.calc_free_reservation(GUARD, Some(AreaId::new(1))), 3);
    assert!(registry.reservation(held).is_none());
    assert!(registry
        .iter()
        .filter(|reservation| reservation.id().cell() == CellId::new(1))
        .all(|reservation| reservation.id().index() > held.index()));
    assert!(!registry.free_reservation(held, Duration::ZERO));
}
