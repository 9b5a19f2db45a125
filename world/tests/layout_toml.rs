use glam::Vec3;
use population_core::{AreaId, CellId, NaviMesh, PathFlags, PrototypeId, RegionView};
use population_world::{query, Region, RegionLayout};

const LAYOUT: &str = r#"
min = [0.0, 0.0, 0.0]
max = [512.0, 256.0, 64.0]
marker_filters = [900]

[[areas]]
id = 1
level = 12
population = 40

[[cells]]
id = 1
area = 1
min = [0.0, 0.0, 0.0]
max = [256.0, 256.0, 64.0]
floor = 4.0

[[cells.markers]]
marker = 10
position = [0.0, 0.0, 0.0]
yaw = 1.5

[[cells.obstacles]]
position = [64.0, 0.0, 0.0]
radius = 16.0

[[cells]]
id = 2
area = 1
min = [256.0, 0.0, 0.0]
max = [512.0, 256.0, 64.0]
has_floor = false
"#;

fn region() -> Region {
    let layout: RegionLayout = toml::from_str(LAYOUT).expect("layout parses");
    Region::from_layout(&layout).expect("layout is valid")
}

#[test]
fn layout_parses_into_region_view() {
    let region = region();
    assert_eq!(query::cell_count(&region), 2);
    assert_eq!(query::area_count(&region), 1);
    assert_eq!(query::cells_in_area(&region, AreaId::new(1)).len(), 2);
    assert_eq!(
        query::authored_marker_count(&region, PrototypeId::new(10)),
        1
    );

    let area = region.area(AreaId::new(1)).expect("area declared");
    assert_eq!(area.level, 12);
    assert_eq!(area.population, Some(PrototypeId::new(40)));
    assert!((area.spawnable_area - 65_536.0).abs() < 1.0);
    assert!(region.check_marker_filter(Some(PrototypeId::new(900))));
}

#[test]
fn navigation_follows_floors_and_obstacles() {
    let region = region();
    let navi = region.navi();
    assert!(navi.contains(Vec3::new(64.0, 64.0, 0.0), 10.0, PathFlags::WALK));
    assert!(!navi.contains(Vec3::new(192.0, 128.0, 0.0), 10.0, PathFlags::WALK));
    assert!(navi.contains(Vec3::new(192.0, 128.0, 0.0), 10.0, PathFlags::FLY));
    assert!(!navi.contains(Vec3::new(300.0, 128.0, 0.0), 10.0, PathFlags::FLY));
    assert_eq!(
        navi.project_to_floor(Vec3::new(10.0, 10.0, 50.0)),
        Some(Vec3::new(10.0, 10.0, 4.0))
    );
    assert_eq!(region.cell_at(Vec3::new(400.0, 10.0, 0.0)), Some(CellId::new(2)));
}
