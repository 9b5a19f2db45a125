//! Expanding population objects into cluster trees and initialising them.

use std::collections::BTreeSet;

use population_core::content::{FormationPrototype, PopulationObjectKind, PopulationRider};
use population_core::{
    Catalog, ClusterObjectFlags, FormationFacing, PathFlags, Picker, PrototypeId, SpawnError,
    SpawnFlags, SpawnProperties,
};
use rand::Rng;

use crate::{
    ClusterEntityData, ClusterGroupData, ClusterHandle, ClusterKind, ClusterNode, ClusterTree,
};

/// Nesting limit guarding against cyclic content.
const MAX_BUILD_DEPTH: u32 = 8;

/// Formation used by objects that configure none.
const DEFAULT_FORMATION: FormationPrototype = FormationPrototype::Box {
    facing: FormationFacing::None,
};

impl ClusterTree {
    /// Expands the population object `object` into a new tree.
    ///
    /// The returned tree is not initialised yet; bounds and formation offsets
    /// are computed by [`ClusterTree::initialize`].
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError::MissingPrototype`] when `object` is not in the
    /// catalog. Unknown nested references are logged and skipped.
    pub fn build<R: Rng + ?Sized>(
        catalog: &Catalog,
        object: PrototypeId,
        properties: &SpawnProperties,
        flags: SpawnFlags,
        rng: &mut R,
    ) -> Result<Self, SpawnError> {
        let mut tree = Self {
            nodes: Vec::new(),
            root: ClusterHandle(0),
        };
        tree.root = tree.add_group(None, catalog, object, properties.clone(), flags)?;
        tree.build_group(tree.root, catalog, ClusterObjectFlags::empty(), 0, rng);
        Ok(tree)
    }

    fn push(&mut self, node: ClusterNode) -> ClusterHandle {
        let handle = ClusterHandle(self.nodes.len());
        if let Some(parent) = node.parent {
            if let Some(group) = self.group_mut(parent) {
                group.children.push(handle);
            }
        }
        self.nodes.push(node);
        handle
    }

    fn add_group(
        &mut self,
        parent: Option<ClusterHandle>,
        catalog: &Catalog,
        object: PrototypeId,
        properties: SpawnProperties,
        spawn_flags: SpawnFlags,
    ) -> Result<ClusterHandle, SpawnError> {
        let prototype = catalog
            .object(object)
            .ok_or(SpawnError::MissingPrototype(object))?;
        let (encounter, blackout) = match &prototype.kind {
            PopulationObjectKind::Encounter {
                encounter,
                blackout,
                ..
            } => (
                Some(*encounter),
                blackout.as_ref().map(|marker| (marker.zone, marker.position)),
            ),
            _ => (None, None),
        };
        let flags = if encounter.is_some() {
            ClusterObjectFlags::SKIP_FORMATION
        } else {
            ClusterObjectFlags::empty()
        };
        let group = ClusterGroupData {
            object,
            children: Vec::new(),
            sub_object_radius_max: 0.0,
            properties,
            spawn_flags,
            encounter,
            blackout,
            reservation: None,
            use_marker_orientation: prototype.use_marker_orientation,
        };
        Ok(self.push(ClusterNode::new(parent, flags, ClusterKind::Group(group))))
    }

    fn add_entity<R: Rng + ?Sized>(
        &mut self,
        parent: ClusterHandle,
        catalog: &Catalog,
        reference: PrototypeId,
        flags: ClusterObjectFlags,
        rng: &mut R,
    ) -> Option<ClusterHandle> {
        let Some(entity) = catalog.select_entity(reference, rng) else {
            log::warn!("[DESIGN] entity reference {reference} resolves to no entity prototype");
            return None;
        };
        let selector = (entity != reference).then_some(reference);
        let data = ClusterEntityData {
            entity,
            selector,
            bounds: None,
            rank: None,
            modifiers: BTreeSet::new(),
            encounter_phase: 0,
            snap_to_floor: None,
        };
        Some(self.push(ClusterNode::new(
            Some(parent),
            flags,
            ClusterKind::Entity(data),
        )))
    }

    fn add_nested_group<R: Rng + ?Sized>(
        &mut self,
        parent: ClusterHandle,
        catalog: &Catalog,
        object: PrototypeId,
        flags: ClusterObjectFlags,
        depth: u32,
        rng: &mut R,
    ) {
        let Some(parent_group) = self.nodes[parent.0].as_group() else {
            return;
        };
        let properties = parent_group.properties.clone();
        let spawn_flags = parent_group.spawn_flags;
        match self.add_group(Some(parent), catalog, object, properties, spawn_flags) {
            Ok(group) => self.build_group(group, catalog, flags, depth + 1, rng),
            Err(err) => log::warn!("[DESIGN] nested object skipped: {err}"),
        }
    }

    fn build_group<R: Rng + ?Sized>(
        &mut self,
        group: ClusterHandle,
        catalog: &Catalog,
        flags: ClusterObjectFlags,
        depth: u32,
        rng: &mut R,
    ) {
        if depth > MAX_BUILD_DEPTH {
            log::warn!("[DESIGN] cluster nesting deeper than {MAX_BUILD_DEPTH} levels, stopping");
            return;
        }
        let Some(object) = self.nodes[group.0].as_group().map(|group| group.object) else {
            return;
        };
        let Some(prototype) = catalog.object(object) else {
            return;
        };
        self.nodes[group.0].flags.insert(flags);

        match &prototype.kind {
            PopulationObjectKind::Entity { entity } => {
                let _ = self.add_entity(group, catalog, *entity, flags, rng);
            }
            PopulationObjectKind::ClusterFixed { entities, entries } => {
                for entity in entities {
                    let _ = self.add_entity(group, catalog, *entity, flags, rng);
                }
                for entry in entries {
                    for _ in 0..entry.count {
                        let _ = self.add_entity(group, catalog, entry.entity, flags, rng);
                    }
                }
            }
            PopulationObjectKind::Cluster { min, max, entity } => {
                let count = roll_count(*min, *max, rng);
                for _ in 0..count {
                    let _ = self.add_entity(group, catalog, *entity, flags, rng);
                }
            }
            PopulationObjectKind::ClusterMixed { min, max, choices } => {
                let mut picker = Picker::new();
                for choice in choices {
                    match catalog.object(choice.prototype).map(|object| &object.kind) {
                        Some(PopulationObjectKind::Entity { entity }) => {
                            picker.add(*entity, choice.weight);
                        }
                        _ => log::warn!(
                            "[DESIGN] mixed cluster {object} choice {} is not a single entity",
                            choice.prototype
                        ),
                    }
                }
                let count = roll_count(*min, *max, rng);
                for _ in 0..count {
                    if let Some(entity) = picker.pick(rng).copied() {
                        let _ = self.add_entity(group, catalog, entity, flags, rng);
                    }
                }
            }
            PopulationObjectKind::Leader { leader, henchmen } => {
                let _ = self.add_entity(
                    group,
                    catalog,
                    *leader,
                    flags | ClusterObjectFlags::LEADER,
                    rng,
                );
                let mut picker = Picker::new();
                for entry in henchmen {
                    picker.add(entry.prototype, entry.weight);
                }
                if let Some(henchmen) = picker.pick(rng).copied() {
                    self.add_nested_group(
                        group,
                        catalog,
                        henchmen,
                        ClusterObjectFlags::HENCHMEN,
                        depth,
                        rng,
                    );
                }
            }
            PopulationObjectKind::Encounter { members, .. } => {
                for member in members {
                    let member_flags = flags | ClusterObjectFlags::SKIP_FORMATION;
                    let Some(handle) =
                        self.add_entity(group, catalog, member.entity, member_flags, rng)
                    else {
                        continue;
                    };
                    if let ClusterKind::Entity(data) = &mut self.nodes[handle.0].kind {
                        data.encounter_phase = member.phase;
                        data.snap_to_floor = member.snap_to_floor;
                    }
                    let node = &mut self.nodes[handle.0];
                    node.position = member.position;
                    node.yaw = member.yaw;
                }
            }
            PopulationObjectKind::Formation { objects } => {
                for required in objects {
                    for _ in 0..required.count {
                        self.add_nested_group(
                            group,
                            catalog,
                            required.object,
                            ClusterObjectFlags::empty(),
                            depth,
                            rng,
                        );
                    }
                }
            }
        }

        if !flags.contains(ClusterObjectFlags::HENCHMEN) {
            for rider in &prototype.riders {
                if let PopulationRider::Entity { entity } = rider {
                    let _ = self.add_entity(
                        group,
                        catalog,
                        *entity,
                        flags | ClusterObjectFlags::SKIP_FORMATION,
                        rng,
                    );
                }
            }
        }
    }

    /// Resolves bounds and flags bottom-up and lays out every formation.
    ///
    /// # Errors
    ///
    /// Fails when a group has no children, when the cluster ends up without a
    /// footprint, or when a fixed formation has fewer slots than objects.
    pub fn initialize(&mut self, catalog: &Catalog) -> Result<(), SpawnError> {
        self.initialize_node(self.root, catalog)
    }

    fn initialize_node(
        &mut self,
        handle: ClusterHandle,
        catalog: &Catalog,
    ) -> Result<(), SpawnError> {
        if self.nodes[handle.0].as_entity().is_some() {
            self.initialize_entity(handle, catalog);
            return Ok(());
        }
        self.initialize_group(handle, catalog)
    }

    fn initialize_entity(&mut self, handle: ClusterHandle, catalog: &Catalog) {
        let parent_rank = self
            .parent_group(handle)
            .and_then(|group| group.properties.rank);
        let node = &mut self.nodes[handle.0];
        let ClusterKind::Entity(data) = &mut node.kind else {
            return;
        };
        let Some(prototype) = catalog.entity(data.entity) else {
            log::warn!("[DESIGN] entity prototype {} vanished from the catalog", data.entity);
            return;
        };

        if let Some(bounds) = prototype.bounds {
            node.radius = bounds.radius;
            node.height = bounds.half_height;
        }
        data.bounds = prototype.bounds;
        if prototype.hostile {
            node.flags.insert(ClusterObjectFlags::HOSTILE);
        }
        node.path_flags = prototype.path_flags;
        data.rank = parent_rank.or(prototype.rank);
        data.modifiers = prototype.modifiers.iter().copied().collect();
        if !data.modifiers.is_empty() && prototype.hostile {
            node.flags.insert(ClusterObjectFlags::HAS_MODIFIERS);
        }
        self.update_bounds(handle);
    }

    fn initialize_group(
        &mut self,
        handle: ClusterHandle,
        catalog: &Catalog,
    ) -> Result<(), SpawnError> {
        let Some(group) = self.nodes[handle.0].as_group() else {
            return Ok(());
        };
        let object = group.object;
        let children = group.children.clone();
        if children.is_empty() {
            log::warn!("[DESIGN] population object {object} produced an empty cluster");
            return Err(SpawnError::EmptyCluster(Some(object)));
        }

        let mut path_flags = PathFlags::all();
        let mut sub_object_radius_max: f32 = 0.0;
        let mut hostile = false;
        for child in &children {
            self.initialize_node(*child, catalog)?;
            if self.is_formation_object(*child) {
                sub_object_radius_max = sub_object_radius_max.max(self.nodes[child.0].radius);
            }
            let child_node = &self.nodes[child.0];
            hostile |= child_node.flags.contains(ClusterObjectFlags::HOSTILE);
            path_flags &= child_node.path_flags;
        }

        let ignore_blackout = catalog
            .object(object)
            .is_some_and(|prototype| prototype.ignore_blackout);
        let node = &mut self.nodes[handle.0];
        node.path_flags = path_flags;
        if hostile {
            node.flags.insert(ClusterObjectFlags::HOSTILE);
        }
        let skip_formation = node.flags.contains(ClusterObjectFlags::SKIP_FORMATION);
        if let ClusterKind::Group(group) = &mut node.kind {
            group.sub_object_radius_max = sub_object_radius_max;
            if hostile && ignore_blackout {
                group.spawn_flags.insert(SpawnFlags::IGNORE_BLACKOUT);
            }
        }

        if node.radius <= 0.0 {
            log::warn!("[DESIGN] population object {object} has no footprint");
            return Err(SpawnError::ZeroRadius);
        }

        if !skip_formation && sub_object_radius_max > 0.0 {
            let formation = match catalog.object(object) {
                Some(prototype) => match catalog.formation_of(prototype) {
                    Some(formation) => formation.clone(),
                    None => {
                        if let Some(template) = prototype.formation_template {
                            log::warn!("{}", SpawnError::MissingFormation(template));
                            return Ok(());
                        }
                        DEFAULT_FORMATION
                    }
                },
                None => DEFAULT_FORMATION,
            };
            self.run_formation(handle, &formation)?;
        }
        Ok(())
    }
}

fn roll_count<R: Rng + ?Sized>(min: u32, max: u32, rng: &mut R) -> u32 {
    if max <= min {
        return min;
    }
    rng.gen_range(min..=max)
}
