//! Scenario files and the simulation loop driving them.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use population_core::content::CatalogDefinitions;
use population_core::{Catalog, Event, PrototypeId, RegionView};
use population_system_population::{PopulationConfig, PopulationManager};
use population_world::{EntityLedger, Region, RegionLayout};
use serde::Deserialize;

const DEFAULT_SECONDS: u64 = 120;

/// Everything needed to run one simulation.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Scenario {
    /// Manager tuning; omitted keys keep their defaults.
    #[serde(default)]
    pub(crate) population: PopulationConfig,
    /// Prototype lists.
    #[serde(default)]
    pub(crate) catalog: CatalogDefinitions,
    /// Region geometry and markers.
    pub(crate) region: RegionLayout,
    /// Missions whose population is queued at start.
    #[serde(default)]
    pub(crate) missions: Vec<PrototypeId>,
    /// Simulated time when the command line does not override it.
    #[serde(default)]
    pub(crate) seconds: Option<u64>,
}

impl Scenario {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read scenario {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parse scenario {}", path.display()))
    }

    pub(crate) fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub(crate) fn seconds(&self) -> u64 {
        self.seconds.unwrap_or(DEFAULT_SECONDS)
    }
}

/// Counts printed once the simulation ends.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Summary {
    pub(crate) groups: usize,
    pub(crate) live_entities: usize,
    pub(crate) events: usize,
    pub(crate) free_reservations: Vec<(PrototypeId, usize)>,
}

/// Builds the region and manager, queues every population and advances
/// the clock in `step` increments for `seconds`.
pub(crate) fn run(scenario: Scenario, seconds: u64, step: Duration) -> Result<Summary> {
    let catalog = Arc::new(Catalog::from(scenario.catalog));
    let region = Region::from_layout(&scenario.region).context("build region")?;
    let mut ledger = EntityLedger::new(Arc::clone(&catalog));
    let mut manager = PopulationManager::new(scenario.population, catalog, &region);
    manager.initialize(&region);

    for area in region.area_ids() {
        if let Some(event) = manager.generate_area_population(&region, area) {
            log::info!("area {area} populated by spawn event {event}");
        }
    }
    for mission in &scenario.missions {
        match manager.add_mission_population(&region, *mission) {
            Some(event) => log::info!("mission {mission} populated by spawn event {event}"),
            None => log::warn!("mission {mission} has no population in this region"),
        }
    }

    let step = step.max(Duration::from_millis(1));
    let end = Duration::from_secs(seconds);
    let mut events = Vec::new();
    let mut produced = 0;
    while manager.now() < end {
        let dt = step.min(end - manager.now());
        manager.advance(dt, &region, &mut ledger, &mut events);
        for event in events.drain(..) {
            log_event(manager.now(), &event);
            produced += 1;
        }
    }

    let free_reservations = manager
        .registry()
        .marker_types()
        .map(|marker| (marker, manager.registry().calc_free_reservation(marker, None)))
        .collect();
    Ok(Summary {
        groups: manager.spawn_groups().count(),
        live_entities: manager.live_entities().len(),
        events: produced,
        free_reservations,
    })
}

fn log_event(now: Duration, event: &Event) {
    let at = now.as_secs_f64();
    match event {
        Event::SpawnGroupCreated { group, object, event } => {
            log::info!("[{at:>7.1}s] group {group} created from {object:?} by event {event:?}");
        }
        Event::EntitySpawned {
            group,
            spec,
            entity,
        } => log::info!("[{at:>7.1}s] entity {entity} spawned for spec {spec} of group {group}"),
        Event::SpawnGroupDestroyed { group } => log::info!("[{at:>7.1}s] group {group} destroyed"),
        Event::ClusterCleared { group } => log::info!("[{at:>7.1}s] group {group} cleared"),
        Event::SpawnerDefeated {
            spawner,
            group,
            entity,
        } => log::info!("[{at:>7.1}s] spawner {spawner} lost entity {entity} of group {group}"),
        Event::SpawnerRespawned { spawner, group } => {
            log::info!("[{at:>7.1}s] spawner {spawner} respawned group {group}");
        }
        Event::PopulationSpawned { event, mission } => {
            log::info!("[{at:>7.1}s] spawn event {event} complete (mission {mission:?})");
        }
    }
}
