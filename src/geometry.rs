use glam::{DVec3, IVec3};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Block coordinate containing a world position.
pub fn block_of(pos: DVec3) -> IVec3 {
    IVec3::new(pos.x.floor() as i32, pos.y.floor() as i32, pos.z.floor() as i32)
}

/// Standing point of a block: horizontally centered, on the block floor.
pub fn standing_point(block: IVec3) -> DVec3 {
    DVec3::new(block.x as f64 + 0.5, block.y as f64, block.z as f64 + 0.5)
}

/// Drop the vertical component.
pub fn flatten(v: DVec3) -> DVec3 {
    DVec3::new(v.x, 0.0, v.z)
}

/// Horizontal distance, ignoring height.
pub fn horizontal_distance(a: DVec3, b: DVec3) -> f64 {
    flatten(b - a).length()
}

/// Unit horizontal direction from `from` toward `to`, if they are not stacked.
pub fn horizontal_direction(from: DVec3, to: DVec3) -> Option<DVec3> {
    let delta = flatten(to - from);
    if delta.length_squared() < 1e-9 {
        None
    } else {
        Some(delta.normalize())
    }
}

/// Right-hand perpendicular of a horizontal forward vector.
pub fn right_of(forward: DVec3) -> DVec3 {
    DVec3::new(-forward.z, 0.0, forward.x)
}

/// Unit horizontal vector for an angle measured around the vertical axis.
pub fn direction_at(angle: f64) -> DVec3 {
    DVec3::new(angle.cos(), 0.0, angle.sin())
}

/// Evenly spaced points on a horizontal circle, starting at `start_angle`.
pub fn ring_points(center: DVec3, radius: f64, count: usize, start_angle: f64) -> Vec<DVec3> {
    if count == 0 {
        return Vec::new();
    }

    let step = TAU / count as f64;

    (0..count)
        .map(|i| center + direction_at(start_angle + step * i as f64) * radius)
        .collect()
}

/// Average of a set of points.
pub fn centroid(points: &[DVec3]) -> Option<DVec3> {
    if points.is_empty() {
        return None;
    }

    let sum = points.iter().fold(DVec3::ZERO, |acc, p| acc + *p);

    Some(sum / points.len() as f64)
}

/// Index (0..4) of the horizontal quadrant `point` occupies around `center`.
pub fn quadrant_of(center: DVec3, point: DVec3) -> usize {
    let delta = point - center;
    let angle = delta.z.atan2(delta.x).rem_euclid(TAU);

    ((angle / (TAU / 4.0)) as usize).min(3)
}

/// Axis aligned box in world coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub fn new(a: DVec3, b: DVec3) -> Aabb {
        Aabb { min: a.min(b), max: a.max(b) }
    }

    pub fn contains(&self, pos: DVec3) -> bool {
        pos.cmpge(self.min).all() && pos.cmple(self.max).all()
    }

    /// Containment test that ignores height.
    pub fn contains_horizontal(&self, pos: DVec3) -> bool {
        pos.x >= self.min.x && pos.x <= self.max.x && pos.z >= self.min.z && pos.z <= self.max.z
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Closest point on the horizontal border of the box.
    pub fn nearest_edge_point(&self, pos: DVec3) -> DVec3 {
        let to_min_x = (pos.x - self.min.x).abs();
        let to_max_x = (self.max.x - pos.x).abs();
        let to_min_z = (pos.z - self.min.z).abs();
        let to_max_z = (self.max.z - pos.z).abs();

        let clamped = DVec3::new(pos.x.clamp(self.min.x, self.max.x), pos.y, pos.z.clamp(self.min.z, self.max.z));
        let nearest = to_min_x.min(to_max_x).min(to_min_z).min(to_max_z);

        if nearest == to_min_x {
            DVec3::new(self.min.x, clamped.y, clamped.z)
        } else if nearest == to_max_x {
            DVec3::new(self.max.x, clamped.y, clamped.z)
        } else if nearest == to_min_z {
            DVec3::new(clamped.x, clamped.y, self.min.z)
        } else {
            DVec3::new(clamped.x, clamped.y, self.max.z)
        }
    }
}
