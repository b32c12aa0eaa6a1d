use super::hazards::BlockKind;
use crate::error::*;
use crate::features::{IntelligenceFeatures, ObstacleFeatures};
use crate::geometry::{block_of, flatten, horizontal_direction, horizontal_distance, standing_point};
use crate::host::{attributes, AgentId, Host};
use glam::{DVec3, IVec3};
use log::*;
use rand::rngs::StdRng;
use rand::Rng;

/// Something done about a nearby obstacle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Remediation {
    ClearedCobweb(IVec3),
    Bridged(IVec3),
    ClearedPlant(IVec3),
    Extinguished(IVec3),
    OpenedDoor(IVec3),
    /// Steered away from a hazard that could not be removed.
    Avoided(IVec3),
    Jumped,
}

/// Local hazard handling around a single agent, gated by its intelligence
/// tier and the host's placement permissions.
pub struct ObstacleHandler<'a> {
    obstacles: &'a ObstacleFeatures,
    intelligence: &'a IntelligenceFeatures,
    jump_velocity: f64,
}

impl<'a> ObstacleHandler<'a> {
    pub fn new(obstacles: &'a ObstacleFeatures, intelligence: &'a IntelligenceFeatures, jump_velocity: f64) -> ObstacleHandler<'a> {
        ObstacleHandler {
            obstacles,
            intelligence,
            jump_velocity,
        }
    }

    fn tier(&self, host: &dyn Host, agent: AgentId) -> u8 {
        attributes::intelligence(host, agent, self.intelligence.default_tier)
    }

    /// Replace a block on behalf of an agent, honoring the placement gate.
    pub fn modify(&self, host: &mut dyn Host, agent: AgentId, cell: IVec3, kind: BlockKind) -> RaidResult<()> {
        if !host.may_modify(agent, cell, kind) {
            return Err(RaidError::PermissionDenied(cell));
        }

        if !host.set_block(cell, kind) {
            return Err(RaidError::PermissionDenied(cell));
        }

        Ok(())
    }

    /// Open a closed door if the agent is clever enough and allowed to.
    pub fn open_door(&self, host: &mut dyn Host, agent: AgentId, cell: IVec3) -> bool {
        if !host.block(cell).is_closed_door() {
            return false;
        }

        if self.tier(host, agent) < self.intelligence.open_doors {
            return false;
        }

        match self.modify(host, agent, cell, BlockKind::Door { open: true }) {
            Ok(()) => {
                let upper = cell + IVec3::Y;
                if host.block(upper).is_closed_door() {
                    if let Err(err) = self.modify(host, agent, upper, BlockKind::Door { open: true }) {
                        debug!("Raider {} could not open upper door at {}: {}", agent, upper, err);
                    }
                }
                debug!("Raider {} opened door at {}", agent, cell);
                true
            }
            Err(err) => {
                debug!("Raider {} could not open door at {}: {}", agent, cell, err);
                false
            }
        }
    }

    /// Scan the cube around a stuck agent and deal with whatever is in the way.
    pub fn scan(&self, host: &mut dyn Host, agent: AgentId, next_waypoint: Option<DVec3>, rng: &mut StdRng) -> Vec<Remediation> {
        let pos = match host.position(agent) {
            Some(pos) => pos,
            None => return Vec::new(),
        };

        let tier = self.tier(host, agent);
        let base = block_of(pos);
        let radius = self.obstacles.scan_radius.max(0);

        let forward = next_waypoint
            .and_then(|waypoint| horizontal_direction(pos, waypoint))
            .or_else(|| host.velocity(agent).and_then(|v| horizontal_direction(DVec3::ZERO, v)));

        let mut results = Vec::new();
        let mut steer = DVec3::ZERO;
        let mut jump = false;

        for dy in -1..=1 {
            for dx in -radius..=radius {
                for dz in -radius..=radius {
                    let cell = base + IVec3::new(dx, dy, dz);
                    let kind = host.block(cell);

                    let avoid = |steer: &mut DVec3| {
                        *steer += flatten(pos - standing_point(cell));
                    };

                    if kind.is_cobweb() {
                        let chance = self.obstacles.cobweb_clear_chance.clamp(0.0, 1.0);

                        if tier >= self.intelligence.clear_cobweb
                            && rng.random_bool(chance)
                            && self.modify(host, agent, cell, BlockKind::Air).is_ok()
                        {
                            results.push(Remediation::ClearedCobweb(cell));
                        } else {
                            avoid(&mut steer);
                            results.push(Remediation::Avoided(cell));
                        }
                    } else if kind.is_liquid() {
                        let surface = !host.block(cell + IVec3::Y).is_liquid();

                        if tier >= self.intelligence.bridge_liquid
                            && surface
                            && self.modify(host, agent, cell, self.obstacles.bridge_block).is_ok()
                        {
                            results.push(Remediation::Bridged(cell));
                        } else {
                            jump = true;
                        }
                    } else if kind.is_harmful_plant() {
                        if tier >= self.intelligence.clear_plants && self.modify(host, agent, cell, BlockKind::Air).is_ok() {
                            results.push(Remediation::ClearedPlant(cell));
                        } else {
                            avoid(&mut steer);
                            results.push(Remediation::Avoided(cell));
                        }
                    } else if kind.is_fire() {
                        if tier >= self.intelligence.extinguish_fire && self.modify(host, agent, cell, BlockKind::Air).is_ok() {
                            results.push(Remediation::Extinguished(cell));
                        } else {
                            avoid(&mut steer);
                            results.push(Remediation::Avoided(cell));
                        }
                    } else if kind.is_closed_door() && door_is_ahead(pos, cell, next_waypoint, forward) && self.open_door(host, agent, cell) {
                        results.push(Remediation::OpenedDoor(cell));
                    }
                }
            }
        }

        if let Some(forward) = forward {
            let ahead = block_of(pos + forward);
            let gap = !host.is_solid(ahead - IVec3::Y) && !host.is_solid(ahead);

            if gap {
                jump = true;
            }
        }

        let mut velocity = host.velocity(agent).unwrap_or(DVec3::ZERO);

        if steer.length_squared() > 1e-9 {
            velocity += steer.normalize() * self.obstacles.avoid_strength;
        }

        if jump {
            velocity.y = self.jump_velocity;
            results.push(Remediation::Jumped);
        }

        host.set_velocity(agent, velocity);

        if !results.is_empty() {
            debug!("Raider {} remediated obstacles: {:?}", agent, results);
        }

        results
    }
}

/// A door counts as "in the way" when it lies in front of the agent and no
/// farther than the next waypoint.
fn door_is_ahead(pos: DVec3, door: IVec3, next_waypoint: Option<DVec3>, forward: Option<DVec3>) -> bool {
    let center = standing_point(door);
    let to_door = flatten(center - pos);

    match (next_waypoint, forward) {
        (Some(waypoint), _) => {
            to_door.dot(flatten(waypoint - pos)) > 0.0 && horizontal_distance(pos, center) <= horizontal_distance(pos, waypoint) + 0.5
        }
        (None, Some(forward)) => to_door.dot(forward) > 0.0,
        (None, None) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn door_ahead_requires_forward_and_near_side() {
        let pos = DVec3::new(0.5, 64.0, 0.5);
        let door = IVec3::new(2, 64, 0);

        assert!(door_is_ahead(pos, door, Some(DVec3::new(4.5, 64.0, 0.5)), None));
        assert!(!door_is_ahead(pos, door, Some(DVec3::new(-4.5, 64.0, 0.5)), None));
        assert!(!door_is_ahead(pos, door, Some(DVec3::new(1.5, 64.0, 0.5)), None));
        assert!(!door_is_ahead(pos, door, None, None));
    }
}
