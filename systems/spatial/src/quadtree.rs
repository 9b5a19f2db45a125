//! Loose quadtree over the XY plane.

use std::collections::BTreeMap;

use glam::Vec3;
use population_core::Aabb;

/// Tuning for a [`Quadtree`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuadtreeConfig {
    loose_factor: f32,
    split_threshold: usize,
    min_node_size: f32,
}

impl QuadtreeConfig {
    /// Creates a configuration.
    ///
    /// `loose_factor` is how much larger a node's loose bounds are than its tight
    /// bounds, `split_threshold` the element count that triggers a split and
    /// `min_node_size` the smallest edge a node may have.
    #[must_use]
    pub const fn new(loose_factor: f32, split_threshold: usize, min_node_size: f32) -> Self {
        Self {
            loose_factor,
            split_threshold,
            min_node_size,
        }
    }

    /// Loose bounds multiplier.
    #[must_use]
    pub const fn loose_factor(&self) -> f32 {
        self.loose_factor
    }

    /// Element count that triggers a split.
    #[must_use]
    pub const fn split_threshold(&self) -> usize {
        self.split_threshold
    }

    /// Smallest node edge length.
    #[must_use]
    pub const fn min_node_size(&self) -> f32 {
        self.min_node_size
    }
}

impl Default for QuadtreeConfig {
    fn default() -> Self {
        Self::new(2.0, 6, 64.0)
    }
}

#[derive(Clone, Debug)]
struct Node<K> {
    min: Vec3,
    size: f32,
    elements: Vec<(K, Aabb)>,
    children: Option<[usize; 4]>,
}

impl<K> Node<K> {
    fn new(min: Vec3, size: f32) -> Self {
        Self {
            min,
            size,
            elements: Vec::new(),
            children: None,
        }
    }

    fn center(&self) -> Vec3 {
        self.min + Vec3::new(self.size, self.size, 0.0) * 0.5
    }

    fn loose_overlaps(&self, loose_factor: f32, volume: &Aabb) -> bool {
        let slack = self.size * (loose_factor - 1.0) * 0.5;
        let min_x = self.min.x - slack;
        let min_y = self.min.y - slack;
        let max_x = self.min.x + self.size + slack;
        let max_y = self.min.y + self.size + slack;
        volume.min().x <= max_x
            && volume.max().x >= min_x
            && volume.min().y <= max_y
            && volume.max().y >= min_y
    }
}

/// Loose quadtree indexing keyed bounding boxes.
///
/// An element lives in the deepest node that contains its centre and whose loose
/// bounds still enclose its extent. Keys must be unique; inserting an existing key
/// moves the element.
#[derive(Clone, Debug)]
pub struct Quadtree<K> {
    config: QuadtreeConfig,
    bounds: Aabb,
    nodes: Vec<Node<K>>,
    locations: BTreeMap<K, usize>,
}

impl<K> Quadtree<K>
where
    K: Copy + Ord + std::fmt::Debug,
{
    /// Creates an empty tree covering `bounds`.
    #[must_use]
    pub fn new(bounds: Aabb, config: QuadtreeConfig) -> Self {
        let size = bounds.width().max(bounds.length()).max(config.min_node_size);
        Self {
            config,
            bounds,
            nodes: vec![Node::new(bounds.min(), size)],
            locations: BTreeMap::new(),
        }
    }

    /// Region covered by the tree.
    #[must_use]
    pub const fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Number of stored elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// Reports whether the tree holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Stores `key` with `volume`. Returns `false` when the volume's centre lies
    /// outside the tree bounds.
    pub fn insert(&mut self, key: K, volume: Aabb) -> bool {
        if !self.bounds.contains_xy(volume.center()) {
            log::warn!(
                "quadtree element {key:?} at {} lies outside {:?}",
                volume.center(),
                self.bounds
            );
            return false;
        }
        let _ = self.remove(key);

        let mut index = 0;
        loop {
            if let Some(children) = self.nodes[index].children {
                let child = children[self.child_slot(index, volume.center())];
                if self.fits(child, &volume) {
                    index = child;
                    continue;
                }
            }
            break;
        }

        self.nodes[index].elements.push((key, volume));
        let _ = self.locations.insert(key, index);
        self.split_if_needed(index);
        true
    }

    /// Removes `key`, returning its stored volume.
    pub fn remove(&mut self, key: K) -> Option<Aabb> {
        let index = self.locations.remove(&key)?;
        let elements = &mut self.nodes[index].elements;
        let position = elements.iter().position(|(stored, _)| *stored == key)?;
        Some(elements.swap_remove(position).1)
    }

    /// Volume stored for `key`.
    #[must_use]
    pub fn get(&self, key: K) -> Option<Aabb> {
        let index = *self.locations.get(&key)?;
        self.nodes[index]
            .elements
            .iter()
            .find(|(stored, _)| *stored == key)
            .map(|(_, volume)| *volume)
    }

    /// Appends to `out` every key whose volume overlaps `volume` in the XY plane.
    ///
    /// Results are sorted so callers iterate deterministically.
    pub fn query(&self, volume: &Aabb, out: &mut Vec<K>) {
        let start = out.len();
        let mut stack = vec![0usize];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if !node.loose_overlaps(self.config.loose_factor, volume) {
                continue;
            }
            for (key, element) in &node.elements {
                if overlaps_xy(element, volume) {
                    out.push(*key);
                }
            }
            if let Some(children) = node.children {
                stack.extend(children);
            }
        }
        out[start..].sort_unstable();
    }

    fn child_slot(&self, index: usize, point: Vec3) -> usize {
        let center = self.nodes[index].center();
        let x = usize::from(point.x >= center.x);
        let y = usize::from(point.y >= center.y);
        x << 1 | y
    }

    fn fits(&self, index: usize, volume: &Aabb) -> bool {
        let node = &self.nodes[index];
        let half_extent = volume.width().max(volume.length()) * 0.5;
        half_extent <= node.size * (self.config.loose_factor - 1.0) * 0.5
    }

    fn split_if_needed(&mut self, index: usize) {
        let node = &self.nodes[index];
        if node.children.is_some()
            || node.elements.len() <= self.config.split_threshold
            || node.size * 0.5 < self.config.min_node_size
        {
            return;
        }

        let half = node.size * 0.5;
        let min = node.min;
        let first = self.nodes.len();
        for slot in 0..4 {
            let offset = Vec3::new(
                if slot >> 1 == 1 { half } else { 0.0 },
                if slot & 1 == 1 { half } else { 0.0 },
                0.0,
            );
            self.nodes.push(Node::new(min + offset, half));
        }
        let children = [first, first + 1, first + 2, first + 3];
        self.nodes[index].children = Some(children);

        let elements = std::mem::take(&mut self.nodes[index].elements);
        for (key, volume) in elements {
            let child = children[self.child_slot(index, volume.center())];
            let target = if self.fits(child, &volume) {
                child
            } else {
                index
            };
            self.nodes[target].elements.push((key, volume));
            let _ = self.locations.insert(key, target);
        }
    }
}

fn overlaps_xy(a: &Aabb, b: &Aabb) -> bool {
    a.min().x <= b.max().x && a.max().x >= b.min().x && a.min().y <= b.max().y && a.max().y >= b.min().y
}
