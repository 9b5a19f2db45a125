//! Weighted random selection.

use rand::Rng;

/// Weighted bag of candidates used by every randomised choice in the engine.
///
/// Entries with a zero weight are never stored, so an empty picker means that no
/// candidate can be chosen.
#[derive(Clone, Debug)]
pub struct Picker<T> {
    entries: Vec<(T, u32)>,
    total: u64,
}

impl<T> Picker<T> {
    /// Creates an empty picker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            total: 0,
        }
    }

    /// Adds `item` with the provided weight. Zero weights are ignored.
    pub fn add(&mut self, item: T, weight: u32) {
        if weight == 0 {
            return;
        }
        self.total += u64::from(weight);
        self.entries.push((item, weight));
    }

    /// Number of candidates currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Reports whether no candidate can be picked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all candidate weights.
    #[must_use]
    pub const fn total_weight(&self) -> u64 {
        self.total
    }

    /// Picks a candidate proportionally to its weight, leaving it in the picker.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&T> {
        let index = self.pick_index(rng)?;
        self.entries.get(index).map(|(item, _)| item)
    }

    /// Picks a candidate proportionally to its weight and removes it.
    pub fn pick_remove<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<T> {
        let index = self.pick_index(rng)?;
        let (item, weight) = self.entries.remove(index);
        self.total -= u64::from(weight);
        Some(item)
    }

    fn pick_index<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        if self.total == 0 {
            return None;
        }
        let mut roll = rng.gen_range(0..self.total);
        for (index, (_, weight)) in self.entries.iter().enumerate() {
            let weight = u64::from(*weight);
            if roll < weight {
                return Some(index);
            }
            roll -= weight;
        }
        None
    }
}

impl<T> Default for Picker<T> {
    fn default() -> Self {
        Self::new()
    }
}
