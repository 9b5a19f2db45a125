use std::time::Duration;

use glam::Vec3;
use population_core::{
    AreaId, CellId, MarkerKind, MarkerState, PrototypeId, ReservationId, SpawnFlags, Sphere,
};

/// Claim state of one designer-placed marker slot.
///
/// The binding to marker, cell, area and region transform is fixed when the
/// registry harvests the cell. Only the registry mutates the claim state.
#[derive(Clone, Debug, PartialEq)]
pub struct SpawnReservation {
    id: ReservationId,
    marker: PrototypeId,
    kind: MarkerKind,
    area: AreaId,
    position: Vec3,
    yaw: f32,
    pub(crate) state: MarkerState,
    pub(crate) last_free_time: Option<Duration>,
    pub(crate) simulated: bool,
    pub(crate) blackout_count: u32,
}

impl SpawnReservation {
    pub(crate) fn new(
        id: ReservationId,
        marker: PrototypeId,
        kind: MarkerKind,
        area: AreaId,
        position: Vec3,
        yaw: f32,
    ) -> Self {
        Self {
            id,
            marker,
            kind,
            area,
            position,
            yaw,
            state: MarkerState::Free,
            last_free_time: None,
            simulated: false,
            blackout_count: 0,
        }
    }

    /// Identifier of the slot.
    #[must_use]
    pub const fn id(&self) -> ReservationId {
        self.id
    }

    /// Marker prototype of the slot.
    #[must_use]
    pub const fn marker(&self) -> PrototypeId {
        self.marker
    }

    /// Category of the marker.
    #[must_use]
    pub const fn kind(&self) -> MarkerKind {
        self.kind
    }

    /// Cell owning the slot.
    #[must_use]
    pub const fn cell(&self) -> CellId {
        self.id.cell()
    }

    /// Area owning the slot.
    #[must_use]
    pub const fn area(&self) -> AreaId {
        self.area
    }

    /// Region-space position of the marker.
    #[must_use]
    pub const fn position(&self) -> Vec3 {
        self.position
    }

    /// Yaw of the marker in radians.
    #[must_use]
    pub const fn yaw(&self) -> f32 {
        self.yaw
    }

    /// Current claim state.
    #[must_use]
    pub const fn state(&self) -> MarkerState {
        self.state
    }

    /// Time the slot was last released.
    #[must_use]
    pub const fn last_free_time(&self) -> Option<Duration> {
        self.last_free_time
    }

    /// Whether players currently simulate the owning cell.
    #[must_use]
    pub const fn is_simulated(&self) -> bool {
        self.simulated
    }

    /// Number of blackout zones covering the slot.
    #[must_use]
    pub const fn blackout_count(&self) -> u32 {
        self.blackout_count
    }

    pub(crate) fn sphere(&self, radius: f32) -> Sphere {
        Sphere::new(self.position, radius)
    }

    /// Reports whether the slot may be claimed under `flags`.
    ///
    /// `respawn` carries the current time and the delay a released slot must
    /// rest before it is handed out again.
    #[must_use]
    pub fn test(
        &self,
        flags: SpawnFlags,
        respawn: Option<(Duration, Duration)>,
        check_free: bool,
    ) -> bool {
        if check_free && self.state != MarkerState::Free {
            return false;
        }
        if flags.contains(SpawnFlags::IGNORE_SIMULATED) && self.simulated {
            return false;
        }
        if !flags.contains(SpawnFlags::IGNORE_BLACKOUT) && self.blackout_count > 0 {
            return false;
        }
        if let (Some((now, delay)), Some(freed)) = (respawn, self.last_free_time) {
            if !delay.is_zero() && now.saturating_sub(freed) < delay {
                return false;
            }
        }
        true
    }
}
