#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Population scheduling, spawning and lifecycle for one region.
//!
//! The [`PopulationManager`] owns every [`SpawnEvent`], [`SpawnGroup`] and
//! [`SpawnSpec`] of a region. Events queue [`PopulationObject`] requests in
//! per-marker and per-location [`SpawnScheduler`]s; timer-driven polls drain
//! those queues whenever marker slots or floor density allow, expand each
//! request into a cluster, place it and create its entities through the host.
//! Groups are destroyed, respawned and re-queued from the same manager so the
//! region's population refills itself after the respawn delay.
//!
//! The manager is driven by [`PopulationManager::advance`], which moves the
//! simulation clock and fires due timers in time order. Everything it does is
//! reported as [`population_core::Event`] values appended to the caller's buffer.

mod config;
mod density;
mod event;
mod group;
mod lifecycle;
mod manager;
mod object;
mod polling;
mod registration;

pub use config::PopulationConfig;
pub use density::{PopulationArea, SpawnCell};
pub use event::{SchedulerKey, SpawnEvent, SpawnEventKind};
pub use group::{SpawnGroup, SpawnSpec};
pub use manager::{PopulationManager, RequestTarget, SpawnRequest};
pub use object::{PopulationObject, SpawnScheduler};
