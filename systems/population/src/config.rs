//! Tuning of the population manager and its random streams.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const RNG_STREAM_SPAWN: &str = "population/spawn";
const RNG_STREAM_RESPAWN: &str = "population/respawn";

/// Tuning of a [`crate::PopulationManager`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Base seed every random stream is derived from.
    pub rng_seed: u64,
    /// Upper bound between two polls of one marker type.
    #[serde(with = "seconds")]
    pub marker_poll_interval: Duration,
    /// Upper bound between two location polls.
    #[serde(with = "seconds")]
    pub location_poll_interval: Duration,
    /// Delay before a destroyed area group is queued again.
    #[serde(with = "seconds")]
    pub respawn_delay: Duration,
    /// Random extra delay added on top of `respawn_delay`.
    #[serde(with = "seconds")]
    pub respawn_jitter: Duration,
    /// Time a dead entity stays in the world after its spec is destroyed.
    #[serde(with = "seconds")]
    pub dead_entity_linger: Duration,
    /// Reference floor area of one cluster.
    pub cluster_area: f32,
    /// Radius of the sphere a marker slot occupies.
    pub reservation_radius: f32,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            rng_seed: 0,
            marker_poll_interval: Duration::from_secs(20),
            location_poll_interval: Duration::from_secs(500),
            respawn_delay: Duration::from_secs(30),
            respawn_jitter: Duration::from_secs(1),
            dead_entity_linger: Duration::from_secs(5),
            cluster_area: 250_000.0,
            reservation_radius: 64.0,
        }
    }
}

impl PopulationConfig {
    pub(crate) fn spawn_seed(&self) -> u64 {
        derive_labeled_seed(self.rng_seed, RNG_STREAM_SPAWN)
    }

    pub(crate) fn respawn_seed(&self) -> u64 {
        derive_labeled_seed(self.rng_seed, RNG_STREAM_RESPAWN)
    }
}

fn derive_labeled_seed(base: u64, label: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(base.to_le_bytes());
    hasher.update(label.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

mod seconds {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streams_are_distinct_and_stable() {
        let config = PopulationConfig {
            rng_seed: 7,
            ..PopulationConfig::default()
        };
        assert_ne!(config.spawn_seed(), config.respawn_seed());
        assert_eq!(config.spawn_seed(), derive_labeled_seed(7, RNG_STREAM_SPAWN));
        assert_ne!(config.spawn_seed(), PopulationConfig::default().spawn_seed());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: PopulationConfig = toml::from_str(
            "rng_seed = 42\nrespawn_delay = 2.5\ncluster_area = 1000.0\n",
        )
        .expect("config parses");
        assert_eq!(config.rng_seed, 42);
        assert_eq!(config.respawn_delay, Duration::from_millis(2500));
        assert_eq!(config.cluster_area, 1000.0);
        assert_eq!(config.marker_poll_interval, Duration::from_secs(20));
    }

    #[test]
    fn negative_durations_are_rejected() {
        assert!(toml::from_str::<PopulationConfig>("respawn_delay = -1.0\n").is_err());
    }
}
