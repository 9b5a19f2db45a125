//! Formation layout of the objects inside a group.

use glam::Vec3;
use population_core::content::{FormationPrototype, FormationSlot};
use population_core::geometry::{self, BACK, FORWARD, RIGHT};
use population_core::{FormationFacing, SpawnError};

use crate::{ClusterHandle, ClusterTree};

/// Number of square rings a box formation fills, the centre included.
const BOX_RINGS: i32 = 4;

/// Slot of the `index`-th object in a row of `length`, filling centre-outward.
fn alternating_index(index: usize, length: usize) -> usize {
    let half = length / 2;
    if index % 2 == 0 {
        half + index / 2
    } else {
        half - (index + 1) / 2
    }
}

/// Yaw of an object laid out at `position` relative to the formation origin.
pub(crate) fn facing_yaw(facing: FormationFacing, position: Vec3) -> f32 {
    match facing {
        FormationFacing::FaceParentInverse => geometry::yaw_from_delta(BACK),
        FormationFacing::FaceOrigin => geometry::yaw_from_delta(-position),
        FormationFacing::FaceOriginInverse => geometry::yaw_from_delta(position),
        FormationFacing::None | FormationFacing::FaceParent => 0.0,
    }
}

/// Yaw of a whole cluster tested at a candidate, `delta` pointing back to the origin.
pub(crate) fn test_facing_yaw(facing: FormationFacing, delta: Vec3, yaw: f32) -> f32 {
    match facing {
        FormationFacing::FaceParentInverse => yaw + std::f32::consts::PI,
        FormationFacing::FaceOrigin => geometry::yaw_from_delta(delta),
        FormationFacing::FaceOriginInverse => geometry::yaw_from_delta(-delta),
        FormationFacing::None | FormationFacing::FaceParent => yaw,
    }
}

impl ClusterTree {
    fn formation_objects(&self, group: ClusterHandle) -> Vec<ClusterHandle> {
        self.nodes[group.0]
            .as_group()
            .map(|group| {
                group
                    .children
                    .iter()
                    .copied()
                    .filter(|child| self.is_formation_object(*child))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn sub_object_radius_max_of(&self, group: ClusterHandle) -> f32 {
        self.nodes[group.0]
            .as_group()
            .map_or(0.0, |group| group.sub_object_radius_max)
    }

    pub(crate) fn run_formation(
        &mut self,
        group: ClusterHandle,
        formation: &FormationPrototype,
    ) -> Result<(), SpawnError> {
        let objects = self.formation_objects(group);
        if objects.is_empty() {
            return Ok(());
        }
        match formation {
            FormationPrototype::Box { facing } => self.layout_box(group, &objects, *facing),
            FormationPrototype::Line {
                facing,
                spacing,
                rows,
            } => self.layout_line(group, &objects, *facing, *spacing, rows),
            FormationPrototype::Arc {
                facing,
                spacing,
                arc_degrees,
            } => self.layout_arc(group, &objects, *facing, *spacing, *arc_degrees),
            FormationPrototype::Fixed { facing, slots } => {
                return self.layout_fixed(group, &objects, *facing, slots);
            }
        }
        Ok(())
    }

    fn layout_box(&mut self, group: ClusterHandle, objects: &[ClusterHandle], facing: FormationFacing) {
        let width = 2.0 * self.sub_object_radius_max_of(group);
        let mut remaining = objects.iter().copied();
        let Some(center) = remaining.next() else {
            return;
        };
        self.set_relative(center, Vec3::ZERO, 0.0);

        for ring in 1..BOX_RINGS {
            let inner = ring - 1;
            for offset in 0..(2 * ring - 1) {
                for side in 1..=4 {
                    let (x, y) = match side {
                        1 => (-ring, -inner + offset),
                        2 => (-inner + offset, ring),
                        3 => (ring, inner - offset),
                        _ => (inner - offset, -ring),
                    };
                    let Some(object) = remaining.next() else {
                        return;
                    };
                    let position = Vec3::new(x as f32 * width, y as f32 * width, 0.0);
                    self.set_relative(object, position, facing_yaw(facing, position));
                }
            }
        }
        if remaining.next().is_some() {
            log::warn!("[DESIGN] box formation holds at most its four rings, extra objects stay centred");
        }
    }

    fn layout_line(
        &mut self,
        group: ClusterHandle,
        objects: &[ClusterHandle],
        facing: FormationFacing,
        spacing: f32,
        rows: &[u32],
    ) {
        let num_rows = rows.len().max(1);
        let (width, center) = if num_rows > 1 {
            let length =
                (num_rows - 1) as f32 * 2.0 * (self.sub_object_radius_max_of(group) + spacing);
            (length / (num_rows - 1) as f32, length / 2.0)
        } else {
            (0.0, 0.0)
        };

        let mut row_start = 0;
        for row in 0..num_rows {
            let in_row = if num_rows == 1 {
                objects.len()
            } else {
                rows[row] as usize
            };
            if in_row == 0 {
                continue;
            }

            let mut row_width = 0.0;
            let mut current: Vec<Option<ClusterHandle>> = vec![None; in_row];
            for index in 0..in_row {
                let Some(object) = objects.get(row_start + index).copied() else {
                    log::warn!("[DESIGN] line formation row {row} cannot be filled");
                    continue;
                };
                row_width += 2.0 * self.nodes[object.0].radius;
                current[alternating_index(index, in_row)] = Some(object);
            }
            row_start += in_row;
            row_width += (in_row - 1) as f32 * spacing;

            let mut position =
                FORWARD * (center - width * row as f32) + RIGHT * (-row_width / 2.0);
            let last = current.len() - 1;
            for (index, object) in current.into_iter().enumerate() {
                let Some(object) = object else {
                    continue;
                };
                let radius = self.nodes[object.0].radius;
                let step = RIGHT * (radius + spacing / 2.0);
                position += if index != 0 { step } else { RIGHT * radius };
                self.set_relative(object, position, facing_yaw(facing, position));
                position += if index != last { step } else { RIGHT * radius };
            }
        }
    }

    fn layout_arc(
        &mut self,
        group: ClusterHandle,
        objects: &[ClusterHandle],
        facing: FormationFacing,
        spacing: f32,
        arc_degrees: f32,
    ) {
        let arc = arc_degrees.to_radians();
        if arc <= 0.0 {
            log::warn!("[DESIGN] arc formation needs a positive opening angle");
            return;
        }
        let count = objects.len();
        let length = objects
            .iter()
            .map(|object| 2.0 * self.nodes[object.0].radius)
            .sum::<f32>()
            + count as f32 * spacing;
        let sector = (length / arc).max(self.sub_object_radius_max_of(group) + spacing);
        let extra = (sector * arc - length) / count as f32;

        let mut ordered = objects.to_vec();
        if count > 2 {
            for (index, object) in objects.iter().enumerate() {
                ordered[alternating_index(index, count)] = *object;
            }
        }

        let half_gap = spacing / 2.0 + extra / 2.0;
        let mut position = geometry::rotate_z(FORWARD * sector, -arc / 2.0);
        for object in ordered {
            let angle = (self.nodes[object.0].radius + half_gap) / sector;
            position = geometry::rotate_z(position, angle);
            self.set_relative(object, position, facing_yaw(facing, position));
            position = geometry::rotate_z(position, angle);
        }
    }

    fn layout_fixed(
        &mut self,
        group: ClusterHandle,
        objects: &[ClusterHandle],
        facing: FormationFacing,
        slots: &[FormationSlot],
    ) -> Result<(), SpawnError> {
        if slots.len() < objects.len() {
            let object = self.nodes[group.0]
                .as_group()
                .map(|group| group.object);
            log::warn!(
                "[DESIGN] fixed formation of {object:?} has {} slots for {} objects",
                slots.len(),
                objects.len()
            );
            return Err(SpawnError::InsufficientSlots {
                object,
                slots: slots.len(),
                objects: objects.len(),
            });
        }

        for object in objects {
            self.set_relative_position(*object, Vec3::ZERO);
        }
        for (object, slot) in objects.iter().zip(slots) {
            let position = Vec3::new(slot.x, slot.y, 0.0);
            let yaw = match facing {
                FormationFacing::None => slot.yaw.to_radians(),
                _ => facing_yaw(facing, position),
            };
            self.set_relative(*object, position, yaw);
        }
        Ok(())
    }
}
