//! Coordinated squad maneuvers. Each tactic sets up movement and targets
//! immediately and, where it plays out over time, registers a timer step with
//! the scheduler that the engine routes back through `run_step`.

use super::formation::assign_slots;
use super::squad::*;
use crate::engine::TickContext;
use crate::error::*;
use crate::geometry::{centroid, direction_at, horizontal_direction, horizontal_distance, quadrant_of, right_of, ring_points};
use crate::host::{attributes, hostiles_near, AgentId};
use crate::scheduler::{Subject, Task, TaskResult};
use glam::DVec3;
use log::*;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::f64::consts::TAU;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TacticKind {
    Surround,
    Ambush,
    Leapfrog,
    ConcentratedAssault,
    FeignedRetreat,
    HuntingPack,
    Distraction,
    Flanking,
}

/// Timer steps a running tactic can schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TacticStep {
    SurroundAcquire,
    AmbushWatch,
    LeapfrogCadence,
    FeintReacquire,
    HuntingPack,
}

#[derive(Clone, Debug)]
enum ActiveTactic {
    Surround {
        target: AgentId,
        slots: Vec<(AgentId, DVec3)>,
    },
    Ambush {
        target: AgentId,
        bait: AgentId,
        point: DVec3,
        started_at: u64,
    },
    Leapfrog {
        objective: DVec3,
        groups: [Vec<AgentId>; 2],
        moving: usize,
        started_at: u64,
    },
    Feint {
        rally: DVec3,
    },
    Hunt {
        target: AgentId,
        started_at: u64,
    },
    Engage {
        kind: TacticKind,
        target: AgentId,
    },
}

impl ActiveTactic {
    fn kind(&self) -> TacticKind {
        match self {
            ActiveTactic::Surround { .. } => TacticKind::Surround,
            ActiveTactic::Ambush { .. } => TacticKind::Ambush,
            ActiveTactic::Leapfrog { .. } => TacticKind::Leapfrog,
            ActiveTactic::Feint { .. } => TacticKind::FeignedRetreat,
            ActiveTactic::Hunt { .. } => TacticKind::HuntingPack,
            ActiveTactic::Engage { kind, .. } => *kind,
        }
    }

    /// Whether the tactic is still steering members around, so formation
    /// keeping should leave the squad alone.
    fn holds_movement(&self) -> bool {
        !matches!(self, ActiveTactic::Engage { .. })
    }
}

#[derive(Default)]
pub struct AdvancedGroupTactics {
    last_used: HashMap<SquadId, u64>,
    active: HashMap<SquadId, ActiveTactic>,
}

/// Living, non-retreating members with their positions.
fn available_members(ctx: &TickContext, squad: &Squad) -> Vec<(AgentId, SquadRole, DVec3)> {
    squad
        .members()
        .filter(|(agent, _)| ctx.host.is_alive(*agent) && !attributes::is_retreating(&*ctx.host, *agent))
        .filter_map(|(agent, role)| ctx.host.position(agent).map(|pos| (agent, role, pos)))
        .collect()
}

fn target_position(ctx: &TickContext, target: AgentId) -> RaidResult<DVec3> {
    if !ctx.host.is_alive(target) {
        return Err(RaidError::AgentGone(target));
    }

    ctx.host.position(target).ok_or(RaidError::AgentGone(target))
}

impl AdvancedGroupTactics {
    pub fn new() -> AdvancedGroupTactics {
        AdvancedGroupTactics::default()
    }

    pub fn can_execute(&self, squad: SquadId, now: u64, cooldown: u64) -> bool {
        self.last_used
            .get(&squad)
            .map(|last| now.saturating_sub(*last) >= cooldown)
            .unwrap_or(true)
    }

    pub fn active_kind(&self, squad: SquadId) -> Option<TacticKind> {
        self.active.get(&squad).map(|tactic| tactic.kind())
    }

    /// Whether a tactic currently owns the squad's movement.
    pub fn is_steering(&self, squad: SquadId) -> bool {
        self.active.get(&squad).map(|tactic| tactic.holds_movement()).unwrap_or(false)
    }

    /// Slots handed out by the squad's current surround.
    pub fn surround_slots(&self, squad: SquadId) -> Option<&[(AgentId, DVec3)]> {
        match self.active.get(&squad) {
            Some(ActiveTactic::Surround { slots, .. }) => Some(slots),
            _ => None,
        }
    }

    fn start(&mut self, ctx: &mut TickContext, squad: SquadId, tactic: ActiveTactic) {
        info!("Squad {} starting {:?}", squad, tactic.kind());

        // A new tactic replaces whatever timers the previous one left behind.
        for step in [
            TacticStep::SurroundAcquire,
            TacticStep::AmbushWatch,
            TacticStep::LeapfrogCadence,
            TacticStep::FeintReacquire,
            TacticStep::HuntingPack,
        ] {
            ctx.scheduler.cancel(&Task::Tactic { squad, step }.key());
        }

        self.last_used.insert(squad, ctx.now);
        self.active.insert(squad, tactic);
    }

    fn finish(&mut self, squad: SquadId) {
        if let Some(tactic) = self.active.remove(&squad) {
            debug!("Squad {} finished {:?}", squad, tactic.kind());
        }
    }

    /// Drop all state for a squad that no longer exists.
    pub fn forget_squad(&mut self, ctx: &mut TickContext, squad: SquadId) {
        self.active.remove(&squad);
        self.last_used.remove(&squad);
        ctx.scheduler.cancel_subject(Subject::Squad(squad));
    }

    fn on_cooldown(&self, ctx: &TickContext, squad: &Squad) -> bool {
        !self.can_execute(squad.id, ctx.now, ctx.features.tactics.cooldown)
    }

    // ─── Surround ───────────────────────────────────────────────────────────

    /// Spread the squad evenly on a ring around the target, then acquire it
    /// once everyone has had time to get into place.
    pub fn surround_and_attack(&mut self, ctx: &mut TickContext, squad: &Squad, target: AgentId) -> RaidResult<bool> {
        if self.on_cooldown(ctx, squad) {
            return Ok(false);
        }

        let target_pos = target_position(ctx, target)?;
        let members: Vec<(AgentId, DVec3)> = available_members(ctx, squad).into_iter().map(|(a, _, p)| (a, p)).collect();

        if members.is_empty() {
            return Ok(false);
        }

        let features = ctx.features.tactics.clone();

        let approach = centroid(&members.iter().map(|(_, p)| *p).collect::<Vec<_>>())
            .and_then(|center| horizontal_direction(target_pos, center))
            .map(|direction| direction.z.atan2(direction.x))
            .unwrap_or(0.0);

        let ring = ring_points(target_pos, features.surround_radius, members.len(), approach);
        let slots = assign_slots(&members, &ring);

        for (agent, slot) in &slots {
            ctx.host.set_target(*agent, None);
            ctx.navigate(*agent, *slot, features.engage_speed);
        }

        self.start(ctx, squad.id, ActiveTactic::Surround { target, slots });

        ctx.scheduler.schedule_once(
            Task::Tactic {
                squad: squad.id,
                step: TacticStep::SurroundAcquire,
            },
            ctx.now + features.surround_acquire_delay,
        );

        Ok(true)
    }

    fn surround_acquire(&mut self, ctx: &mut TickContext, squad: &Squad) -> RaidResult<TaskResult> {
        let (target, slots) = match self.active.get(&squad.id) {
            Some(ActiveTactic::Surround { target, slots }) => (*target, slots.clone()),
            _ => return Ok(TaskResult::Done),
        };

        self.finish(squad.id);

        let target_pos = target_position(ctx, target)?;

        for (agent, _) in slots {
            if squad.contains(agent) && ctx.host.is_alive(agent) {
                ctx.host.set_target(agent, Some(target));
                ctx.navigate(agent, target_pos, ctx.features.tactics.engage_speed);
            }
        }

        debug!("Squad {} closing the ring on {}", squad.id, target);

        Ok(TaskResult::Done)
    }

    // ─── Ambush ─────────────────────────────────────────────────────────────

    /// Send a bait to draw the target while everyone else hides around the
    /// ambush point.
    pub fn bait_and_ambush(&mut self, ctx: &mut TickContext, squad: &Squad, target: AgentId, ambush_point: DVec3) -> RaidResult<bool> {
        if self.on_cooldown(ctx, squad) {
            return Ok(false);
        }

        target_position(ctx, target)?;

        let members = available_members(ctx, squad);

        if members.len() < 2 {
            return Ok(false);
        }

        let bait = members
            .iter()
            .find(|(_, role, _)| *role == SquadRole::Tank)
            .or_else(|| members.iter().find(|(agent, _, _)| *agent != squad.leader))
            .map(|(agent, _, _)| *agent)
            .ok_or(RaidError::SquadGone(squad.id))?;

        let features = ctx.features.tactics.clone();

        let hiders: Vec<(AgentId, DVec3)> = members.iter().filter(|(a, _, _)| *a != bait).map(|(a, _, p)| (*a, *p)).collect();
        let spots = ring_points(ambush_point, features.ambush_hide_radius, hiders.len(), 0.0);

        for (agent, spot) in assign_slots(&hiders, &spots) {
            ctx.host.set_target(agent, None);
            ctx.navigate(agent, spot, squad.role_of(agent).unwrap_or_default().speed(&ctx.features.squads));
        }

        if let Ok(target_pos) = target_position(ctx, target) {
            ctx.host.set_target(bait, Some(target));
            ctx.navigate(bait, target_pos, features.engage_speed);
        }

        let now = ctx.now;

        self.start(
            ctx,
            squad.id,
            ActiveTactic::Ambush {
                target,
                bait,
                point: ambush_point,
                started_at: now,
            },
        );

        ctx.scheduler.schedule_repeating(
            Task::Tactic {
                squad: squad.id,
                step: TacticStep::AmbushWatch,
            },
            ctx.now + features.ambush_watch_period,
            features.ambush_watch_period,
        );

        Ok(true)
    }

    fn ambush_watch(&mut self, ctx: &mut TickContext, squad: &Squad) -> RaidResult<TaskResult> {
        let (target, bait, point, started_at) = match self.active.get(&squad.id) {
            Some(ActiveTactic::Ambush {
                target,
                bait,
                point,
                started_at,
            }) => (*target, *bait, *point, *started_at),
            _ => return Ok(TaskResult::Done),
        };

        let features = ctx.features.tactics.clone();

        let bait_pos = match ctx.host.position(bait) {
            Some(pos) if ctx.host.is_alive(bait) => pos,
            _ => {
                debug!("Squad {} ambush aborted, bait lost", squad.id);
                self.finish(squad.id);
                return Ok(TaskResult::Done);
            }
        };

        if horizontal_distance(bait_pos, point) > features.ambush_bait_stray || ctx.now.saturating_sub(started_at) >= features.ambush_timeout {
            debug!("Squad {} ambush aborted", squad.id);
            self.finish(squad.id);
            return Ok(TaskResult::Done);
        }

        let target_pos = match target_position(ctx, target) {
            Ok(pos) => pos,
            Err(_) => {
                self.finish(squad.id);
                return Ok(TaskResult::Done);
            }
        };

        if horizontal_distance(target_pos, point) <= features.ambush_trigger_radius {
            info!("Squad {} springing ambush on {}", squad.id, target);

            for agent in squad.member_ids() {
                if ctx.host.is_alive(agent) && !attributes::is_retreating(&*ctx.host, agent) {
                    ctx.host.set_target(agent, Some(target));
                    ctx.navigate(agent, target_pos, features.engage_speed);
                }
            }

            self.finish(squad.id);
            return Ok(TaskResult::Done);
        }

        // Once the bait has the target's attention it falls back to the trap.
        if horizontal_distance(bait_pos, target_pos) <= features.ambush_trigger_radius {
            ctx.navigate(bait, point, features.engage_speed);
        }

        Ok(TaskResult::Running)
    }

    // ─── Leapfrog ───────────────────────────────────────────────────────────

    /// Advance in two halves: one moves while the other holds, swapping on
    /// a fixed cadence.
    pub fn leapfrog_advance(&mut self, ctx: &mut TickContext, squad: &Squad, objective: DVec3) -> RaidResult<bool> {
        if self.on_cooldown(ctx, squad) {
            return Ok(false);
        }

        let members = available_members(ctx, squad);

        if members.len() < 2 {
            return Ok(false);
        }

        let mut groups: [Vec<AgentId>; 2] = [Vec::new(), Vec::new()];

        groups[0].push(squad.leader);
        for (index, (agent, _, _)) in members.iter().filter(|(a, _, _)| *a != squad.leader).enumerate() {
            groups[(index + 1) % 2].push(*agent);
        }

        let now = ctx.now;

        self.start(
            ctx,
            squad.id,
            ActiveTactic::Leapfrog {
                objective,
                groups,
                moving: 1,
                started_at: now,
            },
        );

        let cadence = ctx.features.tactics.leapfrog_cadence;

        ctx.scheduler.schedule_repeating(
            Task::Tactic {
                squad: squad.id,
                step: TacticStep::LeapfrogCadence,
            },
            ctx.now + cadence,
            cadence,
        );

        // First bound runs right away.
        self.leapfrog_cadence(ctx, squad).map(|_| true)
    }

    fn leapfrog_cadence(&mut self, ctx: &mut TickContext, squad: &Squad) -> RaidResult<TaskResult> {
        let (objective, groups, moving, started_at) = match self.active.get(&squad.id) {
            Some(ActiveTactic::Leapfrog {
                objective,
                groups,
                moving,
                started_at,
            }) => (*objective, groups.clone(), *moving, *started_at),
            _ => return Ok(TaskResult::Done),
        };

        let features = ctx.features.tactics.clone();

        if ctx.now.saturating_sub(started_at) >= features.leapfrog_timeout {
            self.finish(squad.id);
            return Ok(TaskResult::Done);
        }

        let positions: Vec<DVec3> = groups
            .iter()
            .flatten()
            .filter(|agent| squad.contains(**agent) && ctx.host.is_alive(**agent))
            .filter_map(|agent| ctx.host.position(*agent))
            .collect();

        let center = match centroid(&positions) {
            Some(center) => center,
            None => {
                self.finish(squad.id);
                return Err(RaidError::SquadGone(squad.id));
            }
        };

        if horizontal_distance(center, objective) <= features.leapfrog_arrival {
            for agent in groups.iter().flatten() {
                if squad.contains(*agent) {
                    ctx.navigate(*agent, objective, squad.role_of(*agent).unwrap_or_default().speed(&ctx.features.squads));
                }
            }

            self.finish(squad.id);
            return Ok(TaskResult::Done);
        }

        let moving = 1 - moving;
        let holding = 1 - moving;

        // The moving half bounds past the holding half's position.
        let anchor = centroid(
            &groups[holding]
                .iter()
                .filter(|agent| squad.contains(**agent))
                .filter_map(|agent| ctx.host.position(*agent))
                .collect::<Vec<_>>(),
        )
        .unwrap_or(center);

        let direction = horizontal_direction(anchor, objective).unwrap_or(DVec3::ZERO);
        let bound = if horizontal_distance(anchor, objective) <= features.leapfrog_step {
            objective
        } else {
            anchor + direction * features.leapfrog_step
        };

        let movers: Vec<(AgentId, DVec3)> = groups[moving]
            .iter()
            .filter(|agent| squad.contains(**agent) && ctx.host.is_alive(**agent))
            .filter_map(|agent| ctx.host.position(*agent).map(|pos| (*agent, pos)))
            .collect();

        let spacing = ctx.features.formation.spacing;
        let right = right_of(direction);
        let slots: Vec<DVec3> = (0..movers.len())
            .map(|i| bound + right * (i as f64 - (movers.len() as f64 - 1.0) / 2.0) * spacing)
            .collect();

        for (agent, slot) in assign_slots(&movers, &slots) {
            ctx.navigate(agent, slot, squad.role_of(agent).unwrap_or_default().speed(&ctx.features.squads));
        }

        for agent in &groups[holding] {
            if squad.contains(*agent) {
                ctx.stop(*agent);
            }
        }

        if let Some(ActiveTactic::Leapfrog { moving: current, .. }) = self.active.get_mut(&squad.id) {
            *current = moving;
        }

        trace!("Squad {} leapfrog: group {} moving to {}", squad.id, moving, bound);

        Ok(TaskResult::Running)
    }

    // ─── Engagements ────────────────────────────────────────────────────────

    /// Everyone piles onto one target.
    pub fn concentrated_assault(&mut self, ctx: &mut TickContext, squad: &Squad, target: AgentId) -> RaidResult<bool> {
        if self.on_cooldown(ctx, squad) {
            return Ok(false);
        }

        let target_pos = target_position(ctx, target)?;
        let speed = ctx.features.tactics.engage_speed;

        for (agent, _, _) in available_members(ctx, squad) {
            ctx.host.set_target(agent, Some(target));
            ctx.navigate(agent, target_pos, speed);
        }

        self.start(
            ctx,
            squad.id,
            ActiveTactic::Engage {
                kind: TacticKind::ConcentratedAssault,
                target,
            },
        );

        Ok(true)
    }

    /// Combat roles keep the defenders busy while looters go for the loot.
    /// Without a known loot spot the looters join the fight.
    pub fn distraction(&mut self, ctx: &mut TickContext, squad: &Squad, target: AgentId, loot: Option<DVec3>) -> RaidResult<bool> {
        if self.on_cooldown(ctx, squad) {
            return Ok(false);
        }

        let target_pos = target_position(ctx, target)?;
        let speed = ctx.features.tactics.engage_speed;

        for (agent, role, _) in available_members(ctx, squad) {
            match (role, loot) {
                (SquadRole::Looter, Some(spot)) => {
                    ctx.host.set_target(agent, None);
                    ctx.navigate(agent, spot, role.speed(&ctx.features.squads));
                }
                _ => {
                    ctx.host.set_target(agent, Some(target));
                    ctx.navigate(agent, target_pos, speed);
                }
            }
        }

        self.start(
            ctx,
            squad.id,
            ActiveTactic::Engage {
                kind: TacticKind::Distraction,
                target,
            },
        );

        Ok(true)
    }

    /// Tanks meet the target head-on, everyone else swings out to either side.
    pub fn flanking(&mut self, ctx: &mut TickContext, squad: &Squad, target: AgentId) -> RaidResult<bool> {
        if self.on_cooldown(ctx, squad) {
            return Ok(false);
        }

        let target_pos = target_position(ctx, target)?;
        let members = available_members(ctx, squad);

        let origin = centroid(&members.iter().map(|(_, _, p)| *p).collect::<Vec<_>>()).unwrap_or(target_pos);
        let forward = horizontal_direction(origin, target_pos).unwrap_or(DVec3::X);
        let right = right_of(forward);

        let features = ctx.features.tactics.clone();
        let mut side = 1.0;

        for (agent, role, _) in members {
            ctx.host.set_target(agent, Some(target));

            if role == SquadRole::Tank {
                ctx.navigate(agent, target_pos, features.engage_speed);
            } else {
                let flank = target_pos + right * side * features.flank_distance;
                side = -side;
                ctx.navigate(agent, flank, features.engage_speed);
            }
        }

        self.start(
            ctx,
            squad.id,
            ActiveTactic::Engage {
                kind: TacticKind::Flanking,
                target,
            },
        );

        Ok(true)
    }

    // ─── Feigned retreat ────────────────────────────────────────────────────

    /// Break off and fall back away from `threat`, then turn on whoever
    /// followed.
    pub fn feigned_retreat(&mut self, ctx: &mut TickContext, squad: &Squad, threat: AgentId) -> RaidResult<bool> {
        if self.on_cooldown(ctx, squad) {
            return Ok(false);
        }

        let members = available_members(ctx, squad);
        let center = centroid(&members.iter().map(|(_, _, p)| *p).collect::<Vec<_>>()).ok_or(RaidError::SquadGone(squad.id))?;

        let features = ctx.features.tactics.clone();

        let away = match ctx.host.position(threat).and_then(|pos| horizontal_direction(pos, center)) {
            Some(direction) => direction,
            None => direction_at(ctx.rng.random_range(0.0..TAU)),
        };

        let rally = center + away * features.feint_distance;
        let spots = ring_points(rally, ctx.features.formation.spacing, members.len(), 0.0);
        let movers: Vec<(AgentId, DVec3)> = members.iter().map(|(a, _, p)| (*a, *p)).collect();

        for (agent, spot) in assign_slots(&movers, &spots) {
            ctx.host.set_target(agent, None);
            ctx.navigate(agent, spot, features.engage_speed);
        }

        self.start(ctx, squad.id, ActiveTactic::Feint { rally });

        ctx.scheduler.schedule_once(
            Task::Tactic {
                squad: squad.id,
                step: TacticStep::FeintReacquire,
            },
            ctx.now + features.feint_delay,
        );

        Ok(true)
    }

    fn feint_reacquire(&mut self, ctx: &mut TickContext, squad: &Squad) -> RaidResult<TaskResult> {
        let rally = match self.active.get(&squad.id) {
            Some(ActiveTactic::Feint { rally }) => *rally,
            _ => return Ok(TaskResult::Done),
        };

        self.finish(squad.id);

        let mut pursuers = hostiles_near(&*ctx.host, rally, ctx.features.tactics.feint_reacquire_radius);
        pursuers.sort();

        if pursuers.is_empty() {
            debug!("Squad {} feint drew no pursuers", squad.id);
            return Ok(TaskResult::Done);
        }

        for (agent, _, pos) in available_members(ctx, squad) {
            let nearest = pursuers
                .iter()
                .filter_map(|hostile| ctx.host.position(*hostile).map(|p| (*hostile, p.distance(pos))))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(hostile, _)| hostile);

            if let Some(hostile) = nearest {
                ctx.host.set_target(agent, Some(hostile));
            }
        }

        info!("Squad {} turned on {} pursuers", squad.id, pursuers.len());

        Ok(TaskResult::Done)
    }

    // ─── Hunting pack ───────────────────────────────────────────────────────

    /// Chase a moving target: the leader trails it, flankers run alongside,
    /// and once the pack covers enough sides everyone rushes in.
    pub fn hunting_pack(&mut self, ctx: &mut TickContext, squad: &Squad, target: AgentId) -> RaidResult<bool> {
        if self.on_cooldown(ctx, squad) {
            return Ok(false);
        }

        target_position(ctx, target)?;

        let now = ctx.now;

        self.start(
            ctx,
            squad.id,
            ActiveTactic::Hunt {
                target,
                started_at: now,
            },
        );

        let period = ctx.features.tactics.hunt_period;

        ctx.scheduler.schedule_repeating(
            Task::Tactic {
                squad: squad.id,
                step: TacticStep::HuntingPack,
            },
            ctx.now + period,
            period,
        );

        self.hunt(ctx, squad).map(|_| true)
    }

    fn hunt(&mut self, ctx: &mut TickContext, squad: &Squad) -> RaidResult<TaskResult> {
        let (target, started_at) = match self.active.get(&squad.id) {
            Some(ActiveTactic::Hunt { target, started_at }) => (*target, *started_at),
            _ => return Ok(TaskResult::Done),
        };

        let features = ctx.features.tactics.clone();

        let target_pos = match target_position(ctx, target) {
            Ok(pos) => pos,
            Err(_) => {
                self.finish(squad.id);
                return Ok(TaskResult::Done);
            }
        };

        if ctx.now.saturating_sub(started_at) >= features.hunt_timeout {
            self.finish(squad.id);
            return Ok(TaskResult::Done);
        }

        let members = available_members(ctx, squad);

        let quadrants: HashSet<usize> = members
            .iter()
            .filter(|(_, _, pos)| horizontal_distance(*pos, target_pos) <= features.hunt_quadrant_radius)
            .map(|(_, _, pos)| quadrant_of(target_pos, *pos))
            .collect();

        if quadrants.len() >= features.hunt_surround_quadrants {
            info!("Squad {} has {} surrounded, rushing", squad.id, target);

            for (agent, _, _) in &members {
                ctx.host.set_target(*agent, Some(target));
                ctx.navigate(*agent, target_pos, features.engage_speed);
            }

            self.finish(squad.id);
            return Ok(TaskResult::Done);
        }

        let leader_pos = ctx.host.position(squad.leader).unwrap_or(target_pos);

        let heading = ctx
            .host
            .velocity(target)
            .and_then(|v| horizontal_direction(DVec3::ZERO, v))
            .or_else(|| horizontal_direction(leader_pos, target_pos))
            .unwrap_or(DVec3::X);

        let right = right_of(heading);
        let mut side = 1.0;

        for (agent, _, _) in &members {
            let goal = if *agent == squad.leader {
                target_pos - heading * features.hunt_trail_distance
            } else {
                let goal = target_pos + right * side * features.hunt_flank_distance;
                side = -side;
                goal
            };

            ctx.navigate(*agent, goal, features.engage_speed);
        }

        Ok(TaskResult::Running)
    }

    // ─── Timers ─────────────────────────────────────────────────────────────

    /// Route a scheduled step back to its tactic. A missing squad cancels the
    /// timer and drops the tactic.
    pub fn run_step(&mut self, ctx: &mut TickContext, squad_id: SquadId, squad: Option<&Squad>, step: TacticStep) -> RaidResult<TaskResult> {
        let squad = match squad {
            Some(squad) if !squad.is_disbanding() => squad,
            _ => {
                self.active.remove(&squad_id);
                return Err(RaidError::SquadGone(squad_id));
            }
        };

        let result = match step {
            TacticStep::SurroundAcquire => self.surround_acquire(ctx, squad),
            TacticStep::AmbushWatch => self.ambush_watch(ctx, squad),
            TacticStep::LeapfrogCadence => self.leapfrog_cadence(ctx, squad),
            TacticStep::FeintReacquire => self.feint_reacquire(ctx, squad),
            TacticStep::HuntingPack => self.hunt(ctx, squad),
        };

        if let Err(err) = &result {
            if err.is_terminal() {
                self.finish(squad_id);
            }
        }

        result
    }

    /// Drop finished engagements whose target is gone.
    pub fn prune(&mut self, ctx: &TickContext) {
        let host = &*ctx.host;

        self.active.retain(|_, tactic| match tactic {
            ActiveTactic::Engage { target, .. } => host.is_alive(*target),
            _ => true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_applies_per_squad() {
        let mut tactics = AdvancedGroupTactics::new();
        let a = SquadId::new_random();
        let b = SquadId::new_random();

        tactics.last_used.insert(a, 100);

        assert!(!tactics.can_execute(a, 150, 200));
        assert!(tactics.can_execute(a, 300, 200));
        assert!(tactics.can_execute(b, 150, 200));
    }

    #[test]
    fn engagements_do_not_hold_movement() {
        let target = AgentId::from_u128(9);

        assert!(ActiveTactic::Feint { rally: DVec3::ZERO }.holds_movement());
        assert!(!ActiveTactic::Engage {
            kind: TacticKind::Flanking,
            target
        }
        .holds_movement());
        assert_eq!(
            ActiveTactic::Engage {
                kind: TacticKind::Distraction,
                target
            }
            .kind(),
            TacticKind::Distraction
        );
    }
}
