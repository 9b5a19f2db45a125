//! In-memory entity host.

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::Vec3;
use population_core::{
    geometry, Catalog, EntityHost, EntityId, EntitySettings, EntityStatus, PrototypeId,
    SpawnError, SpawnGroupId, SpawnSpecId,
};

/// Entity recorded by the [`EntityLedger`].
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerEntity {
    /// Identifier assigned on creation.
    pub id: EntityId,
    /// Entity prototype.
    pub prototype: PrototypeId,
    /// Region-space position.
    pub position: Vec3,
    /// Yaw in radians.
    pub yaw: f32,
    /// Planar radius taken from the prototype bounds.
    pub radius: f32,
    /// Whether the bounds block spawns.
    pub blocking: bool,
    /// Whether the entity is hostile.
    pub hostile: bool,
    /// Whether the entity has been killed.
    pub dead: bool,
    /// Whether the entity has been removed.
    pub destroyed: bool,
    /// Owning spawn group.
    pub group: SpawnGroupId,
    /// Owning spawn spec.
    pub spec: SpawnSpecId,
    /// Spawner the entity reports to.
    pub spawner: Option<EntityId>,
}

/// Entity host that records created entities in memory.
#[derive(Debug)]
pub struct EntityLedger {
    catalog: Arc<Catalog>,
    entities: BTreeMap<EntityId, LedgerEntity>,
    next_id: u64,
    failures_remaining: u32,
}

impl EntityLedger {
    /// Creates an empty ledger resolving bounds through `catalog`.
    #[must_use]
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            entities: BTreeMap::new(),
            next_id: 1,
            failures_remaining: 0,
        }
    }

    /// Makes the next `count` creations fail.
    pub fn fail_creations(&mut self, count: u32) {
        self.failures_remaining = count;
    }

    /// Kills a live entity. Returns `false` when it was not alive.
    pub fn kill(&mut self, entity: EntityId) -> bool {
        match self.entities.get_mut(&entity) {
            Some(record) if !record.dead && !record.destroyed => {
                record.dead = true;
                true
            }
            _ => false,
        }
    }

    /// Reports whether the entity exists and is neither dead nor removed.
    #[must_use]
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities
            .get(&entity)
            .is_some_and(|record| !record.dead && !record.destroyed)
    }

    /// Looks up a recorded entity.
    #[must_use]
    pub fn entity(&self, entity: EntityId) -> Option<&LedgerEntity> {
        self.entities.get(&entity)
    }

    /// Iterates every recorded entity, removed ones included.
    pub fn iter(&self) -> impl Iterator<Item = &LedgerEntity> {
        self.entities.values()
    }

    /// Number of entities that are alive.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entities
            .values()
            .filter(|record| !record.dead && !record.destroyed)
            .count()
    }
}

impl EntityHost for EntityLedger {
    fn create_entity(&mut self, settings: &EntitySettings) -> Result<EntityId, SpawnError> {
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(SpawnError::EntityCreation(format!(
                "creation of {} refused",
                settings.prototype
            )));
        }
        let prototype = self.catalog.entity(settings.prototype).ok_or_else(|| {
            SpawnError::EntityCreation(format!("unknown entity prototype {}", settings.prototype))
        })?;

        let id = EntityId::new(self.next_id);
        self.next_id += 1;
        let (radius, blocking) = prototype.bounds.map_or((0.0, false), |bounds| {
            (bounds.radius, bounds.blocking || bounds.blocks_spawns)
        });
        let record = LedgerEntity {
            id,
            prototype: settings.prototype,
            position: settings.position,
            yaw: settings.yaw,
            radius,
            blocking,
            hostile: prototype.hostile,
            dead: false,
            destroyed: false,
            group: settings.group,
            spec: settings.spec,
            spawner: settings.spawner,
        };
        let _ = self.entities.insert(id, record);
        log::trace!("ledger created entity {id} of {}", settings.prototype);
        Ok(id)
    }

    fn entity_status(&self, entity: EntityId) -> Option<EntityStatus> {
        self.entities.get(&entity).map(|record| EntityStatus {
            dead: record.dead,
            destroyed: record.destroyed,
            hostile: record.hostile,
        })
    }

    fn destroy_entity(&mut self, entity: EntityId) {
        if let Some(record) = self.entities.get_mut(&entity) {
            record.destroyed = true;
        }
    }

    fn is_bounds_blocked(&self, center: Vec3, radius: f32) -> bool {
        self.entities.values().any(|record| {
            record.blocking
                && !record.dead
                && !record.destroyed
                && geometry::distance_2d(record.position, center) < record.radius + radius
        })
    }
}
