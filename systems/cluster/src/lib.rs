#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Cluster trees: the NPC groups a population object expands into.
//!
//! A [`ClusterTree`] is an arena of nodes addressed by [`ClusterHandle`]. Group
//! nodes own an ordered child list, entity nodes are the leaves that become
//! spawned entities. Every node stores a transform relative to its parent plus
//! bounds that are grown bottom-up whenever a child moves, so the root radius
//! always covers the whole cluster.
//!
//! The tree is built from the catalog, initialised (bounds, flags and formation
//! layout), placed against a target and finally read back by the population
//! manager to create spawn specs.

use std::collections::BTreeSet;

use glam::Vec3;
use population_core::content::BoundsPrototype;
use population_core::{
    geometry, ClusterObjectFlags, PathFlags, PrototypeId, ReservationId, SpawnFlags,
    SpawnProperties, Transform,
};

mod build;
mod formation;
mod placement;

pub use placement::{PlacementScene, SpawnTarget};

/// Index of a node inside a [`ClusterTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterHandle(usize);

impl ClusterHandle {
    /// Position of the node inside the arena.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0
    }
}

/// Payload of a group node.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterGroupData {
    object: PrototypeId,
    children: Vec<ClusterHandle>,
    sub_object_radius_max: f32,
    properties: SpawnProperties,
    spawn_flags: SpawnFlags,
    encounter: Option<PrototypeId>,
    blackout: Option<(PrototypeId, Vec3)>,
    reservation: Option<ReservationId>,
    use_marker_orientation: bool,
}

impl ClusterGroupData {
    /// Population object the group was built from.
    #[must_use]
    pub const fn object(&self) -> PrototypeId {
        self.object
    }

    /// Children in build order.
    #[must_use]
    pub fn children(&self) -> &[ClusterHandle] {
        &self.children
    }

    /// Largest radius among the formation objects.
    #[must_use]
    pub const fn sub_object_radius_max(&self) -> f32 {
        self.sub_object_radius_max
    }

    /// Properties inherited by every entity of the group.
    #[must_use]
    pub const fn properties(&self) -> &SpawnProperties {
        &self.properties
    }

    /// Placement switches of the group.
    #[must_use]
    pub const fn spawn_flags(&self) -> SpawnFlags {
        self.spawn_flags
    }

    /// Mission the group belongs to.
    #[must_use]
    pub const fn mission(&self) -> Option<PrototypeId> {
        self.properties.mission
    }

    /// Encounter resource when the group was built from an encounter.
    #[must_use]
    pub const fn encounter(&self) -> Option<PrototypeId> {
        self.encounter
    }

    /// Blackout zone prototype and offset authored on an encounter.
    #[must_use]
    pub const fn blackout(&self) -> Option<(PrototypeId, Vec3)> {
        self.blackout
    }

    /// Marker slot the group was placed on.
    #[must_use]
    pub const fn reservation(&self) -> Option<ReservationId> {
        self.reservation
    }
}

/// Payload of an entity node.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterEntityData {
    entity: PrototypeId,
    selector: Option<PrototypeId>,
    bounds: Option<BoundsPrototype>,
    rank: Option<PrototypeId>,
    modifiers: BTreeSet<PrototypeId>,
    encounter_phase: u32,
    snap_to_floor: Option<bool>,
}

impl ClusterEntityData {
    /// Resolved entity prototype.
    #[must_use]
    pub const fn entity(&self) -> PrototypeId {
        self.entity
    }

    /// Selector the entity was picked through.
    #[must_use]
    pub const fn selector(&self) -> Option<PrototypeId> {
        self.selector
    }

    /// Bounds copied from the prototype during initialisation.
    #[must_use]
    pub const fn bounds(&self) -> Option<BoundsPrototype> {
        self.bounds
    }

    /// Rank applied to the spawned entity.
    #[must_use]
    pub const fn rank(&self) -> Option<PrototypeId> {
        self.rank
    }

    /// Modifiers applied to the spawned entity.
    #[must_use]
    pub const fn modifiers(&self) -> &BTreeSet<PrototypeId> {
        &self.modifiers
    }

    /// Encounter phase gating the spawn; zero spawns immediately.
    #[must_use]
    pub const fn encounter_phase(&self) -> u32 {
        self.encounter_phase
    }

    /// Snap-to-floor override.
    #[must_use]
    pub const fn snap_to_floor(&self) -> Option<bool> {
        self.snap_to_floor
    }
}

/// Node payload.
#[derive(Clone, Debug, PartialEq)]
pub enum ClusterKind {
    /// Composite node.
    Group(ClusterGroupData),
    /// Leaf node.
    Entity(ClusterEntityData),
}

/// Node of a [`ClusterTree`].
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterNode {
    parent: Option<ClusterHandle>,
    position: Vec3,
    yaw: f32,
    radius: f32,
    height: f32,
    path_flags: PathFlags,
    flags: ClusterObjectFlags,
    kind: ClusterKind,
}

impl ClusterNode {
    fn new(parent: Option<ClusterHandle>, flags: ClusterObjectFlags, kind: ClusterKind) -> Self {
        Self {
            parent,
            position: Vec3::ZERO,
            yaw: 0.0,
            radius: 0.0,
            height: 0.0,
            path_flags: PathFlags::empty(),
            flags,
            kind,
        }
    }

    /// Parent node; `None` for the root.
    #[must_use]
    pub const fn parent(&self) -> Option<ClusterHandle> {
        self.parent
    }

    /// Position relative to the parent.
    #[must_use]
    pub const fn position(&self) -> Vec3 {
        self.position
    }

    /// Yaw relative to the parent.
    #[must_use]
    pub const fn yaw(&self) -> f32 {
        self.yaw
    }

    /// Planar bounding radius.
    #[must_use]
    pub const fn radius(&self) -> f32 {
        self.radius
    }

    /// Bounding height.
    #[must_use]
    pub const fn height(&self) -> f32 {
        self.height
    }

    /// Locomotion every member of the node supports.
    #[must_use]
    pub const fn path_flags(&self) -> PathFlags {
        self.path_flags
    }

    /// Role and behaviour flags.
    #[must_use]
    pub const fn flags(&self) -> ClusterObjectFlags {
        self.flags
    }

    /// Node payload.
    #[must_use]
    pub const fn kind(&self) -> &ClusterKind {
        &self.kind
    }

    /// Group payload, when the node is a group.
    #[must_use]
    pub const fn as_group(&self) -> Option<&ClusterGroupData> {
        match &self.kind {
            ClusterKind::Group(group) => Some(group),
            ClusterKind::Entity(_) => None,
        }
    }

    /// Entity payload, when the node is an entity.
    #[must_use]
    pub const fn as_entity(&self) -> Option<&ClusterEntityData> {
        match &self.kind {
            ClusterKind::Entity(entity) => Some(entity),
            ClusterKind::Group(_) => None,
        }
    }
}

/// Arena holding one cluster.
#[derive(Clone, Debug)]
pub struct ClusterTree {
    nodes: Vec<ClusterNode>,
    root: ClusterHandle,
}

impl ClusterTree {
    /// Root group of the cluster.
    #[must_use]
    pub const fn root(&self) -> ClusterHandle {
        self.root
    }

    /// Looks up a node.
    #[must_use]
    pub fn node(&self, handle: ClusterHandle) -> Option<&ClusterNode> {
        self.nodes.get(handle.0)
    }

    /// Number of nodes in the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Reports whether the arena is empty. A built tree always holds its root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Bounding radius of the whole cluster.
    #[must_use]
    pub fn radius(&self) -> f32 {
        self.nodes[self.root.0].radius
    }

    /// Bounding height of the whole cluster.
    #[must_use]
    pub fn height(&self) -> f32 {
        self.nodes[self.root.0].height
    }

    /// Role flags aggregated on the root.
    #[must_use]
    pub fn flags(&self) -> ClusterObjectFlags {
        self.nodes[self.root.0].flags
    }

    /// Root group payload. `None` only for a tree whose root is not a group,
    /// which [`ClusterTree::build`] never produces.
    #[must_use]
    pub fn root_group(&self) -> Option<&ClusterGroupData> {
        self.node(self.root)?.as_group()
    }

    fn group_mut(&mut self, handle: ClusterHandle) -> Option<&mut ClusterGroupData> {
        match &mut self.nodes[handle.0].kind {
            ClusterKind::Group(group) => Some(group),
            ClusterKind::Entity(_) => None,
        }
    }

    /// Placement switches of the root group.
    #[must_use]
    pub fn spawn_flags(&self) -> SpawnFlags {
        self.root_group()
            .map_or(SpawnFlags::empty(), |group| group.spawn_flags)
    }

    /// Adds `flags` to every group of the cluster.
    pub fn insert_spawn_flags(&mut self, flags: SpawnFlags) {
        for node in &mut self.nodes {
            if let ClusterKind::Group(group) = &mut node.kind {
                group.spawn_flags.insert(flags);
            }
        }
    }

    /// Records the marker slot the cluster was placed on.
    pub fn set_reservation(&mut self, reservation: Option<ReservationId>) {
        let root = self.root;
        if let Some(group) = self.group_mut(root) {
            group.reservation = reservation;
        }
    }

    /// Group that directly contains `handle`.
    #[must_use]
    pub fn parent_group(&self, handle: ClusterHandle) -> Option<&ClusterGroupData> {
        let parent = self.nodes.get(handle.0)?.parent?;
        self.nodes[parent.0].as_group()
    }

    /// Transform of `handle` in region space.
    #[must_use]
    pub fn absolute_transform(&self, handle: ClusterHandle) -> Transform {
        let node = &self.nodes[handle.0];
        let local = Transform::new(node.position, node.yaw);
        match node.parent {
            Some(parent) => self.absolute_transform(parent).compose(&local),
            None => local,
        }
    }

    /// Position of `handle` in region space.
    #[must_use]
    pub fn absolute_position(&self, handle: ClusterHandle) -> Vec3 {
        self.absolute_transform(handle).position()
    }

    /// Moves `handle` relative to its parent and grows the ancestor bounds.
    pub fn set_relative(&mut self, handle: ClusterHandle, position: Vec3, yaw: f32) {
        let node = &mut self.nodes[handle.0];
        node.position = position;
        node.yaw = yaw;
        self.update_bounds(handle);
        self.set_location_dirty(handle);
    }

    fn set_relative_position(&mut self, handle: ClusterHandle, position: Vec3) {
        self.nodes[handle.0].position = position;
        self.update_bounds(handle);
        self.set_location_dirty(handle);
    }

    fn update_bounds(&mut self, child: ClusterHandle) {
        let mut child = child;
        while let Some(parent) = self.nodes[child.0].parent {
            let node = &self.nodes[child.0];
            let reach = geometry::distance_2d(Vec3::ZERO, node.position) + node.radius;
            let height = node.height;
            let parent_node = &mut self.nodes[parent.0];
            parent_node.radius = parent_node.radius.max(reach);
            parent_node.height = parent_node.height.max(height);
            child = parent;
        }
    }

    fn set_location_dirty(&mut self, handle: ClusterHandle) {
        let mut stack = vec![handle];
        while let Some(current) = stack.pop() {
            let node = &mut self.nodes[current.0];
            match &node.kind {
                ClusterKind::Entity(_) => node.flags.remove(ClusterObjectFlags::PROJECT_TO_FLOOR),
                ClusterKind::Group(group) => stack.extend(group.children.iter().copied()),
            }
        }
    }

    /// Reports whether `handle` takes part in its parent's formation.
    #[must_use]
    pub fn is_formation_object(&self, handle: ClusterHandle) -> bool {
        let node = &self.nodes[handle.0];
        if node.flags.contains(ClusterObjectFlags::SKIP_FORMATION) {
            return false;
        }
        match &node.kind {
            ClusterKind::Entity(entity) => entity
                .bounds
                .is_some_and(|bounds| bounds.blocking || bounds.blocks_spawns),
            ClusterKind::Group(group) => group
                .children
                .iter()
                .any(|child| self.is_formation_object(*child)),
        }
    }

    /// Entity leaves in depth-first build order.
    #[must_use]
    pub fn leaves(&self) -> Vec<ClusterHandle> {
        let mut leaves = Vec::new();
        let mut stack = vec![self.root];
        while let Some(current) = stack.pop() {
            match &self.nodes[current.0].kind {
                ClusterKind::Entity(_) => leaves.push(current),
                ClusterKind::Group(group) => stack.extend(group.children.iter().rev().copied()),
            }
        }
        leaves
    }
}
