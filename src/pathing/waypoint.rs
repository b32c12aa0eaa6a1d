use super::hazards::BlockKind;
use crate::geometry::horizontal_distance;
use glam::{DVec3, IVec3};
use serde::{Deserialize, Serialize};

/// How an agent should treat the step onto a waypoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaypointTag {
    #[default]
    Normal,
    Jump,
    /// Slippery or sticky footing.
    Careful,
    Door,
    BreakBlock,
    PlaceBlock,
}

/// Hook executed when the waypoint is reached.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum WaypointAction {
    OpenDoor(IVec3),
    Jump,
    BreakBlock(IVec3),
    PlaceBlock(IVec3, BlockKind),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    position: DVec3,
    tag: WaypointTag,
    actions: Vec<WaypointAction>,
}

impl Waypoint {
    pub fn new(position: DVec3, tag: WaypointTag) -> Waypoint {
        Waypoint {
            position,
            tag,
            actions: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: WaypointAction) -> Waypoint {
        self.actions.push(action);
        self
    }

    pub fn position(&self) -> DVec3 {
        self.position
    }

    pub fn tag(&self) -> WaypointTag {
        self.tag
    }

    pub fn actions(&self) -> &[WaypointAction] {
        &self.actions
    }

    /// Plain waypoints can be dropped during simplification without losing behavior.
    pub fn is_plain(&self) -> bool {
        self.tag == WaypointTag::Normal && self.actions.is_empty()
    }

    pub fn is_reached_from(&self, pos: DVec3, radius: f64) -> bool {
        horizontal_distance(pos, self.position) <= radius && (pos.y - self.position.y).abs() <= 1.5
    }
}

/// Ordered waypoints plus a progress cursor. The cursor only moves forward;
/// once it runs past the last waypoint the path is complete and frozen.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WaypointPath {
    waypoints: Vec<Waypoint>,
    cursor: usize,
}

impl WaypointPath {
    pub fn new(waypoints: Vec<Waypoint>) -> WaypointPath {
        WaypointPath { waypoints, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn remaining(&self) -> &[Waypoint] {
        &self.waypoints[self.cursor.min(self.waypoints.len())..]
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.waypoints.len()
    }

    pub fn current(&self) -> Option<&Waypoint> {
        self.waypoints.get(self.cursor)
    }

    pub fn destination(&self) -> Option<DVec3> {
        self.waypoints.last().map(|w| w.position)
    }

    pub fn has_reached_current(&self, pos: DVec3, radius: f64) -> bool {
        self.current().map(|w| w.is_reached_from(pos, radius)).unwrap_or(false)
    }

    /// Advance past the current waypoint if `pos` satisfies it. Moves at most
    /// one waypoint per call and returns the waypoint that was passed so its
    /// actions can run.
    pub fn update_progress(&mut self, pos: DVec3, radius: f64) -> Option<&Waypoint> {
        if !self.has_reached_current(pos, radius) {
            return None;
        }

        let reached = self.cursor;
        self.cursor += 1;

        self.waypoints.get(reached)
    }

    /// Append a waypoint. Ignored once the path is complete.
    pub fn push(&mut self, waypoint: Waypoint) -> bool {
        if self.is_complete() && !self.waypoints.is_empty() {
            return false;
        }

        self.waypoints.push(waypoint);
        true
    }

    /// Sum of straight-line distances between consecutive waypoints.
    pub fn length(&self) -> f64 {
        self.waypoints
            .windows(2)
            .map(|pair| pair[0].position.distance(pair[1].position))
            .sum()
    }

    /// Drop plain waypoints that sit on a near-straight line between their
    /// neighbours. Only untouched paths are simplified.
    pub fn simplify(&mut self, dot_threshold: f64) {
        if self.cursor > 0 || self.waypoints.len() < 3 {
            return;
        }

        let mut kept: Vec<Waypoint> = Vec::with_capacity(self.waypoints.len());

        for (index, waypoint) in self.waypoints.iter().enumerate() {
            let is_last = index + 1 == self.waypoints.len();

            if !is_last && waypoint.is_plain() && kept.len() >= 1 {
                let previous = kept[kept.len() - 1].position;
                let next = self.waypoints[index + 1].position;

                let incoming = (waypoint.position - previous).normalize_or_zero();
                let outgoing = (next - waypoint.position).normalize_or_zero();

                if incoming.dot(outgoing) > dot_threshold {
                    continue;
                }
            }

            kept.push(waypoint.clone());
        }

        self.waypoints = kept;
    }
}
