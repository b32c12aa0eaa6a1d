use super::astar::{AStarPathfinder, SearchSettings};
use super::hazards::{BlockKind, HazardSet};
use super::obstacles::{ObstacleHandler, Remediation};
use super::waypoint::*;
use crate::features::{IntelligenceFeatures, ObstacleFeatures, PathingFeatures, RaidFeatures};
use crate::geometry::{horizontal_direction, horizontal_distance};
use crate::host::{attributes, AgentId, Host};
use glam::DVec3;
use log::*;
use rand::rngs::StdRng;
use std::collections::HashMap;

const CAREFUL_SPEED_FACTOR: f64 = 0.75;

/// Per-agent navigation record.
#[derive(Clone, Debug, Default)]
pub struct PathCache {
    pub last_target: Option<DVec3>,
    pub last_computed: Option<u64>,
    pub navigating: bool,
    /// Position seen by the previous stuck check.
    pub last_position: Option<DVec3>,
    pub stuck_counter: u32,
    pub speed: f64,
    path: Option<WaypointPath>,
}

impl PathCache {
    pub fn path(&self) -> Option<&WaypointPath> {
        self.path.as_ref()
    }

    /// Navigating without a planned path, steering straight at the goal.
    pub fn is_direct(&self) -> bool {
        self.navigating && self.path.is_none()
    }

    fn retire(&mut self) {
        self.navigating = false;
        self.path = None;
        self.stuck_counter = 0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NavigationOutcome {
    /// A fresh path with this many waypoints was planned.
    Planned(usize),
    /// The existing plan is still good.
    Continuing,
    /// No path; steering straight at the goal.
    Direct,
    /// The agent is gone or has no position.
    Unavailable,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StuckOutcome {
    Idle,
    Moving,
    Suspect(u32),
    /// Jumped and scanned surroundings; a push toward the goal should follow.
    Stuck { goal: DVec3, remediations: Vec<Remediation> },
}

pub struct PathfindingManager {
    caches: HashMap<AgentId, PathCache>,
    hazards: HazardSet,
    settings: SearchSettings,
    pathing: PathingFeatures,
    obstacles: ObstacleFeatures,
    intelligence: IntelligenceFeatures,
}

impl PathfindingManager {
    pub fn new(features: &RaidFeatures) -> PathfindingManager {
        PathfindingManager {
            caches: HashMap::new(),
            hazards: HazardSet::new(&features.pathing.hazards),
            settings: SearchSettings::from(&features.pathing),
            pathing: features.pathing.clone(),
            obstacles: features.obstacles.clone(),
            intelligence: features.intelligence.clone(),
        }
    }

    pub fn hazards(&self) -> &HazardSet {
        &self.hazards
    }

    pub fn cache(&self, agent: AgentId) -> Option<&PathCache> {
        self.caches.get(&agent)
    }

    pub fn is_navigating(&self, agent: AgentId) -> bool {
        self.caches.get(&agent).map(|c| c.navigating).unwrap_or(false)
    }

    pub fn goal_of(&self, agent: AgentId) -> Option<DVec3> {
        self.caches.get(&agent).filter(|c| c.navigating).and_then(|c| c.last_target)
    }

    /// Agents currently navigating, in id order.
    pub fn navigating_agents(&self) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self.caches.iter().filter(|(_, c)| c.navigating).map(|(id, _)| *id).collect();
        agents.sort();
        agents
    }

    fn needs_recompute(&self, cache: &PathCache, goal: DVec3, now: u64) -> bool {
        if !cache.navigating {
            return true;
        }

        let moved = cache
            .last_target
            .map(|target| target.distance_squared(goal) > self.pathing.recompute_distance_sq)
            .unwrap_or(true);

        let expired = cache
            .last_computed
            .map(|at| now.saturating_sub(at) >= self.pathing.recompute_interval)
            .unwrap_or(true);

        moved || expired
    }

    /// Ask for `agent` to move to `goal` at a speed multiplier. Replans only
    /// when the goal moved, the plan is stale or nothing is in progress.
    pub fn navigate(&mut self, host: &mut dyn Host, agent: AgentId, goal: DVec3, speed: f64, now: u64) -> NavigationOutcome {
        if !host.is_alive(agent) {
            self.caches.remove(&agent);
            return NavigationOutcome::Unavailable;
        }

        let pos = match host.position(agent) {
            Some(pos) => pos,
            None => return NavigationOutcome::Unavailable,
        };

        let recompute = {
            let cache = self.caches.entry(agent).or_default();
            cache.speed = speed;
            cache.clone()
        };

        if !self.needs_recompute(&recompute, goal, now) {
            return NavigationOutcome::Continuing;
        }

        self.plan(host, agent, pos, goal, now)
    }

    fn plan(&mut self, host: &mut dyn Host, agent: AgentId, pos: DVec3, goal: DVec3, now: u64) -> NavigationOutcome {
        let result = AStarPathfinder::new(&self.hazards, &self.settings).find_path(&*host, pos, goal);

        let cache = self.caches.entry(agent).or_default();
        cache.last_target = Some(goal);
        cache.last_computed = Some(now);
        cache.navigating = true;

        match result {
            Ok(path) => {
                let count = path.len();
                trace!("Raider {} planned {} waypoints toward {}", agent, count, goal);
                cache.path = Some(path);
                NavigationOutcome::Planned(count)
            }
            Err(err) => {
                debug!("Raider {} falling back to direct movement toward {}: {}", agent, goal, err);
                cache.path = None;

                if let Some(direction) = horizontal_direction(pos, goal) {
                    let velocity = host.velocity(agent).unwrap_or(DVec3::ZERO);
                    let speed = self.pathing.base_speed * cache.speed;
                    host.set_velocity(agent, DVec3::new(direction.x * speed, velocity.y, direction.z * speed));
                }

                NavigationOutcome::Direct
            }
        }
    }

    /// Halt navigation and horizontal motion.
    pub fn stop(&mut self, host: &mut dyn Host, agent: AgentId) {
        if let Some(cache) = self.caches.get_mut(&agent) {
            cache.retire();
        }

        if let Some(velocity) = host.velocity(agent) {
            host.set_velocity(agent, DVec3::new(0.0, velocity.y, 0.0));
        }
    }

    pub fn forget(&mut self, agent: AgentId) {
        self.caches.remove(&agent);
    }

    /// Advance one agent along its path. Returns whether it is still navigating.
    pub fn step(&mut self, host: &mut dyn Host, agent: AgentId, now: u64) -> bool {
        let (navigating, goal, expired) = match self.caches.get(&agent) {
            Some(cache) => (
                cache.navigating,
                cache.last_target,
                cache
                    .last_computed
                    .map(|at| now.saturating_sub(at) >= self.pathing.recompute_interval)
                    .unwrap_or(true),
            ),
            None => return false,
        };

        if !navigating {
            return false;
        }

        if !host.is_alive(agent) {
            self.caches.remove(&agent);
            return false;
        }

        let (pos, goal) = match (host.position(agent), goal) {
            (Some(pos), Some(goal)) => (pos, goal),
            _ => return false,
        };

        if expired {
            self.plan(host, agent, pos, goal, now);
        }

        let reached = match self.caches.get_mut(&agent).and_then(|c| c.path.as_mut()) {
            Some(path) => path.update_progress(pos, self.pathing.arrival_radius).cloned(),
            None => None,
        };

        if let Some(waypoint) = reached {
            self.run_actions(host, agent, &waypoint);
        }

        let (target, tag, speed, complete) = match self.caches.get(&agent) {
            Some(cache) => match &cache.path {
                Some(path) => match path.current() {
                    Some(waypoint) => (waypoint.position(), waypoint.tag(), cache.speed, false),
                    None => (goal, WaypointTag::Normal, cache.speed, true),
                },
                None => (goal, WaypointTag::Normal, cache.speed, horizontal_distance(pos, goal) <= self.pathing.arrival_radius),
            },
            None => return false,
        };

        if complete {
            trace!("Raider {} arrived at {}", agent, goal);
            self.stop(host, agent);
            return false;
        }

        let velocity = host.velocity(agent).unwrap_or(DVec3::ZERO);
        let factor = if tag == WaypointTag::Careful { CAREFUL_SPEED_FACTOR } else { 1.0 };
        let horizontal = horizontal_direction(pos, target).unwrap_or(DVec3::ZERO) * self.pathing.base_speed * speed * factor;

        let vertical = if tag == WaypointTag::Jump && target.y > pos.y + 0.5 && velocity.y.abs() < 1e-6 {
            self.pathing.jump_velocity
        } else {
            velocity.y
        };

        host.set_velocity(agent, DVec3::new(horizontal.x, vertical, horizontal.z));

        true
    }

    fn run_actions(&mut self, host: &mut dyn Host, agent: AgentId, waypoint: &Waypoint) {
        let handler = ObstacleHandler::new(&self.obstacles, &self.intelligence, self.pathing.jump_velocity);

        for action in waypoint.actions() {
            match *action {
                WaypointAction::OpenDoor(cell) => {
                    handler.open_door(host, agent, cell);
                }
                WaypointAction::Jump => {
                    if let Some(velocity) = host.velocity(agent) {
                        host.set_velocity(agent, DVec3::new(velocity.x, self.pathing.jump_velocity, velocity.z));
                    }
                }
                WaypointAction::BreakBlock(cell) => {
                    if let Err(err) = handler.modify(host, agent, cell, BlockKind::Air) {
                        debug!("Raider {} skipped block break: {}", agent, err);
                    }
                }
                WaypointAction::PlaceBlock(cell, kind) => {
                    if let Err(err) = handler.modify(host, agent, cell, kind) {
                        debug!("Raider {} skipped block placement: {}", agent, err);
                    }
                }
            }
        }
    }

    /// One stuck-detector sample. After enough stationary samples the agent
    /// jumps and its surroundings are scanned for obstacles.
    pub fn check_stuck(&mut self, host: &mut dyn Host, agent: AgentId, rng: &mut StdRng) -> StuckOutcome {
        let pos = match host.position(agent) {
            Some(pos) if host.is_alive(agent) => pos,
            _ => {
                self.caches.remove(&agent);
                return StuckOutcome::Idle;
            }
        };

        let (goal, next_waypoint) = {
            let cache = match self.caches.get_mut(&agent) {
                Some(cache) if cache.navigating => cache,
                _ => return StuckOutcome::Idle,
            };

            let stationary = cache
                .last_position
                .map(|last| last.distance(pos) < self.pathing.stuck_distance)
                .unwrap_or(false);

            cache.last_position = Some(pos);

            if !stationary {
                cache.stuck_counter = 0;
                return StuckOutcome::Moving;
            }

            cache.stuck_counter += 1;

            if cache.stuck_counter < self.pathing.stuck_checks {
                return StuckOutcome::Suspect(cache.stuck_counter);
            }

            cache.stuck_counter = 0;

            let next = cache.path.as_ref().and_then(|p| p.current()).map(|w| w.position());

            match cache.last_target {
                Some(goal) => (goal, next),
                None => return StuckOutcome::Idle,
            }
        };

        debug!("Raider {} is stuck at {}, jumping and scanning", agent, pos);

        if let Some(velocity) = host.velocity(agent) {
            host.set_velocity(agent, DVec3::new(velocity.x, self.pathing.jump_velocity, velocity.z));
        }

        let handler = ObstacleHandler::new(&self.obstacles, &self.intelligence, self.pathing.jump_velocity);
        let remediations = handler.scan(host, agent, next_waypoint, rng);

        StuckOutcome::Stuck { goal, remediations }
    }

    /// Horizontal shove toward the goal, applied a little after a stuck jump.
    pub fn push_toward(&mut self, host: &mut dyn Host, agent: AgentId, goal: DVec3) -> bool {
        if !self.is_navigating(agent) || !host.is_alive(agent) {
            return false;
        }

        let (pos, velocity) = match (host.position(agent), host.velocity(agent)) {
            (Some(pos), Some(velocity)) => (pos, velocity),
            _ => return false,
        };

        match horizontal_direction(pos, goal) {
            Some(direction) => {
                host.set_velocity(agent, velocity + direction * self.pathing.push_strength);
                true
            }
            None => false,
        }
    }

    /// Drop caches for agents that died or stopped being raiders.
    pub fn prune(&mut self, host: &dyn Host) -> usize {
        let before = self.caches.len();

        self.caches
            .retain(|agent, _| host.is_alive(*agent) && attributes::is_raider(host, *agent));

        before - self.caches.len()
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}
