use super::squad::SquadRole;
use super::threatmap::ThreatAssessor;
use crate::engine::TickContext;
use crate::error::*;
use crate::features::RetreatFeatures;
use crate::geometry::{flatten, horizontal_direction, horizontal_distance, standing_point};
use crate::host::{attributes, health_fraction, AgentId, Capability};
use crate::pathing::astar::is_walkable;
use crate::raid::{RaidId, RaidMetaKey};
use crate::scheduler::{Task, TaskResult};
use glam::{DVec3, IVec3};
use log::*;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::TAU;

/// How a raider withdraws.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetreatArchetype {
    /// Straight away from the threats.
    Simple,
    /// Into cover opposite the threats.
    Tactical,
    /// Flat out for the settlement border.
    Emergency,
    /// Loot to the shared extraction point, then gone.
    LootCarrier,
    /// Back to high ground where a ranged raider can keep shooting.
    Defensive,
}

impl RetreatArchetype {
    pub fn speed(&self, features: &RetreatFeatures) -> f64 {
        match self {
            RetreatArchetype::Simple => features.simple_speed,
            RetreatArchetype::Tactical => features.tactical_speed,
            RetreatArchetype::Emergency => features.emergency_speed,
            RetreatArchetype::LootCarrier => features.loot_carrier_speed,
            RetreatArchetype::Defensive => features.defensive_speed,
        }
    }

    pub fn timeout(&self, features: &RetreatFeatures) -> u64 {
        match self {
            RetreatArchetype::Simple => features.simple_timeout,
            RetreatArchetype::Tactical => features.tactical_timeout,
            RetreatArchetype::Emergency => features.emergency_timeout,
            RetreatArchetype::LootCarrier => features.loot_carrier_timeout,
            RetreatArchetype::Defensive => features.defensive_timeout,
        }
    }
}

/// Why a retreat started.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetreatTrigger {
    LowHealth,
    /// Carrying loot while hurt.
    LootSecured,
    QuotaReached,
    /// The squad leader is withdrawing.
    SquadOrder,
    /// The leader decided the whole squad should go.
    LeaderOrder,
    /// Escorting a loot carrier out.
    Covering(AgentId),
    /// Joining a squad-mate's tactical withdrawal.
    Sympathetic(AgentId),
}

/// State kept only while a raider is retreating.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetreatInfo {
    pub destination: DVec3,
    pub archetype: RetreatArchetype,
    pub started_at: u64,
    pub trigger: RetreatTrigger,
}

#[derive(Default)]
pub struct StrategicRetreatManager {
    retreats: HashMap<AgentId, RetreatInfo>,
    /// Tick each raider's last retreat ended, for the cooldown.
    last_ended: HashMap<AgentId, u64>,
}

impl StrategicRetreatManager {
    pub fn new() -> StrategicRetreatManager {
        StrategicRetreatManager::default()
    }

    pub fn info(&self, agent: AgentId) -> Option<&RetreatInfo> {
        self.retreats.get(&agent)
    }

    pub fn is_retreating(&self, agent: AgentId) -> bool {
        self.retreats.contains_key(&agent)
    }

    pub fn retreating_agents(&self) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self.retreats.keys().copied().collect();
        agents.sort();
        agents
    }

    pub fn off_cooldown(&self, agent: AgentId, now: u64, features: &RetreatFeatures) -> bool {
        self.last_ended
            .get(&agent)
            .map(|ended| now.saturating_sub(*ended) >= features.cooldown)
            .unwrap_or(true)
    }

    /// Not retreating and cooldown elapsed.
    fn available(&self, ctx: &TickContext, agent: AgentId) -> bool {
        ctx.host.is_alive(agent)
            && !self.is_retreating(agent)
            && !attributes::is_retreating(&*ctx.host, agent)
            && self.off_cooldown(agent, ctx.now, &ctx.features.retreat)
    }

    /// Self-initiated retreat check: health, loot and quota predicates.
    pub fn should_retreat(&self, ctx: &mut TickContext, agent: AgentId) -> Option<RetreatTrigger> {
        if !self.available(ctx, agent) {
            return None;
        }

        let features = &ctx.features.retreat;
        let health = health_fraction(&*ctx.host, agent);

        if attributes::is_loot_carrier(&*ctx.host, agent) && health <= features.loot_health {
            return Some(RetreatTrigger::LootSecured);
        }

        if health <= features.critical_health {
            return Some(RetreatTrigger::LowHealth);
        }

        let quota_met = attributes::raid_of(&*ctx.host, agent)
            .and_then(|raid| ctx.host.raid(raid))
            .map(|raid| raid.quota_met(ctx.features.leader.loot_quota))
            .unwrap_or(false);

        if quota_met && ctx.rng.random_bool(features.quota_retreat_chance.clamp(0.0, 1.0)) {
            return Some(RetreatTrigger::QuotaReached);
        }

        None
    }

    /// Archetype by priority: loot carrier, defensive, emergency, tactical, simple.
    pub fn select_archetype(&self, ctx: &TickContext, agent: AgentId) -> RetreatArchetype {
        let features = &ctx.features.retreat;

        if attributes::is_loot_carrier(&*ctx.host, agent) {
            return RetreatArchetype::LootCarrier;
        }

        if ctx.host.capability(agent).contains(Capability::RANGED) {
            return RetreatArchetype::Defensive;
        }

        if health_fraction(&*ctx.host, agent) < features.emergency_health {
            return RetreatArchetype::Emergency;
        }

        let threatened = ctx
            .host
            .position(agent)
            .map(|pos| !ThreatAssessor::new(&ctx.features.threat).threats_near(&*ctx.host, pos, features.threat_radius).is_empty())
            .unwrap_or(false);

        if !threatened {
            RetreatArchetype::Tactical
        } else {
            RetreatArchetype::Simple
        }
    }

    /// Periodic self-preservation sweep over a raid. Returns the raiders that
    /// started retreating.
    pub fn check_raid(&mut self, ctx: &mut TickContext, raid: RaidId) -> RaidResult<Vec<(AgentId, RetreatArchetype)>> {
        if !ctx.host.is_raid_active(raid) {
            return Err(RaidError::RaidInactive(raid));
        }

        let mut raiders = ctx.host.raiders(raid);
        raiders.sort();

        let mut started = Vec::new();

        for agent in raiders {
            if let Some(archetype) = self.try_retreat(ctx, agent) {
                started.push((agent, archetype));
            }
        }

        Ok(started)
    }

    /// Retreat if the raider's own state calls for it.
    pub fn try_retreat(&mut self, ctx: &mut TickContext, agent: AgentId) -> Option<RetreatArchetype> {
        let trigger = self.should_retreat(ctx, agent)?;
        let archetype = self.select_archetype(ctx, agent);

        self.begin(ctx, agent, archetype, trigger).ok()
    }

    /// Retreat on someone else's say-so. Skips the health predicates but still
    /// respects an ongoing retreat and the cooldown.
    pub fn order_retreat(&mut self, ctx: &mut TickContext, agent: AgentId, trigger: RetreatTrigger) -> Option<RetreatArchetype> {
        if !self.available(ctx, agent) {
            return None;
        }

        let archetype = self.select_archetype(ctx, agent);

        self.begin(ctx, agent, archetype, trigger).ok()
    }

    pub fn begin(&mut self, ctx: &mut TickContext, agent: AgentId, archetype: RetreatArchetype, trigger: RetreatTrigger) -> RaidResult<RetreatArchetype> {
        let destination = match self.destination(ctx, agent, archetype) {
            Ok(destination) => destination,
            Err(err) if !err.is_terminal() => {
                debug!("Raider {} has no {:?} destination ({}), falling back to simple retreat", agent, archetype, err);
                self.destination(ctx, agent, RetreatArchetype::Simple)?
            }
            Err(err) => return Err(err),
        };

        self.begin_toward(ctx, agent, archetype, trigger, destination)
    }

    fn begin_toward(
        &mut self,
        ctx: &mut TickContext,
        agent: AgentId,
        archetype: RetreatArchetype,
        trigger: RetreatTrigger,
        destination: DVec3,
    ) -> RaidResult<RetreatArchetype> {
        if !ctx.host.is_alive(agent) {
            return Err(RaidError::AgentGone(agent));
        }

        attributes::set_retreating(&mut *ctx.host, agent, true);
        ctx.host.set_target(agent, None);

        self.retreats.insert(
            agent,
            RetreatInfo {
                destination,
                archetype,
                started_at: ctx.now,
                trigger,
            },
        );

        ctx.navigate(agent, destination, archetype.speed(&ctx.features.retreat));

        let period = ctx.features.retreat.monitor_period;
        ctx.scheduler.schedule_repeating(Task::RetreatMonitor(agent), ctx.now + period, period);

        info!("Raider {} retreating ({:?}, {:?}) toward {}", agent, archetype, trigger, destination);

        Ok(archetype)
    }

    /// Squad-mates react to a raider's retreat: ranged mates may escort a loot
    /// carrier, anyone close may join a tactical withdrawal.
    pub fn sympathetic_retreat(&mut self, ctx: &mut TickContext, initiator: AgentId, mates: &[(AgentId, SquadRole)]) -> Vec<AgentId> {
        let info = match self.retreats.get(&initiator) {
            Some(info) => info.clone(),
            None => return Vec::new(),
        };

        let origin = match ctx.host.position(initiator) {
            Some(pos) => pos,
            None => return Vec::new(),
        };

        let features = ctx.features.retreat.clone();
        let mut joined = Vec::new();

        for (mate, role) in mates {
            if *mate == initiator || !self.available(ctx, *mate) {
                continue;
            }

            let close = ctx
                .host
                .position(*mate)
                .map(|pos| pos.distance(origin) <= features.sympathetic_radius)
                .unwrap_or(false);

            if !close {
                continue;
            }

            let started = match info.archetype {
                RetreatArchetype::LootCarrier if *role == SquadRole::Ranged => {
                    ctx.rng.random_bool(features.cover_chance.clamp(0.0, 1.0))
                        && self
                            .begin_toward(ctx, *mate, RetreatArchetype::Simple, RetreatTrigger::Covering(initiator), info.destination)
                            .is_ok()
                }
                RetreatArchetype::Tactical => {
                    ctx.rng.random_bool(features.join_tactical_chance.clamp(0.0, 1.0))
                        && self
                            .begin_toward(ctx, *mate, RetreatArchetype::Tactical, RetreatTrigger::Sympathetic(initiator), info.destination)
                            .is_ok()
                }
                _ => false,
            };

            if started {
                joined.push(*mate);
            }
        }

        joined
    }

    // ─── Destinations ───────────────────────────────────────────────────────

    pub fn destination(&self, ctx: &mut TickContext, agent: AgentId, archetype: RetreatArchetype) -> RaidResult<DVec3> {
        let pos = ctx.host.position(agent).ok_or(RaidError::AgentGone(agent))?;

        match archetype {
            RetreatArchetype::Simple => Ok(self.simple_destination(ctx, pos)),
            RetreatArchetype::Tactical => Ok(self.tactical_destination(ctx, agent, pos)),
            RetreatArchetype::Emergency => self.border_destination(ctx, agent, pos),
            RetreatArchetype::LootCarrier => self.extraction_destination(ctx, agent, pos),
            RetreatArchetype::Defensive => self.high_ground_destination(ctx, pos),
        }
    }

    fn away_from_threats(&self, ctx: &TickContext, pos: DVec3, radius: f64) -> Option<DVec3> {
        let assessor = ThreatAssessor::new(&ctx.features.threat);

        let sum = assessor
            .threats_near(&*ctx.host, pos, radius)
            .into_iter()
            .filter_map(|threat| ctx.host.position(threat))
            .fold(DVec3::ZERO, |acc, threat_pos| acc + flatten(threat_pos - pos).normalize_or_zero());

        if sum.length_squared() < 1e-9 {
            None
        } else {
            Some(-sum.normalize())
        }
    }

    fn random_direction(ctx: &mut TickContext) -> DVec3 {
        crate::geometry::direction_at(ctx.rng.random_range(0.0..TAU))
    }

    fn simple_destination(&self, ctx: &mut TickContext, pos: DVec3) -> DVec3 {
        let direction = match self.away_from_threats(ctx, pos, ctx.features.retreat.threat_radius) {
            Some(direction) => direction,
            None => Self::random_direction(ctx),
        };

        pos + direction * ctx.features.retreat.simple_distance
    }

    /// A spot opposite the threats, preferring cells with a wall beside them.
    fn tactical_destination(&self, ctx: &mut TickContext, agent: AgentId, pos: DVec3) -> DVec3 {
        let features = &ctx.features.retreat;

        let direction = self
            .away_from_threats(ctx, pos, features.threat_radius * 2.0)
            .or_else(|| {
                attributes::raid_of(&*ctx.host, agent)
                    .and_then(|raid| ctx.host.raid(raid))
                    .and_then(|raid| ctx.host.settlement_bounds(&raid.settlement))
                    .and_then(|bounds| horizontal_direction(bounds.center(), pos))
            });

        let direction = match direction {
            Some(direction) => direction,
            None => Self::random_direction(ctx),
        };

        let candidate = pos + direction * ctx.features.retreat.tactical_distance;

        self.find_cover(ctx, candidate).unwrap_or(candidate)
    }

    fn find_cover(&self, ctx: &TickContext, around: DVec3) -> Option<DVec3> {
        let base = crate::geometry::block_of(around);
        let hazards = ctx.pathing.hazards();

        for radius in 0..=2i32 {
            for dx in -radius..=radius {
                for dz in -radius..=radius {
                    if dx.abs() != radius && dz.abs() != radius {
                        continue;
                    }

                    for dy in [0, 1, -1] {
                        let cell = base + IVec3::new(dx, dy, dz);

                        if is_walkable(&*ctx.host, hazards, cell) && cover_count(ctx, cell) > 0 {
                            return Some(standing_point(cell));
                        }
                    }
                }
            }
        }

        None
    }

    /// Just outside the nearest stretch of settlement border.
    fn border_destination(&self, ctx: &TickContext, agent: AgentId, pos: DVec3) -> RaidResult<DVec3> {
        let settlement = attributes::raid_of(&*ctx.host, agent)
            .and_then(|raid| ctx.host.raid(raid))
            .map(|raid| raid.settlement.clone())
            .ok_or(RaidError::AgentGone(agent))?;

        let margin = ctx.features.retreat.border_margin;
        let bounds = ctx.host.settlement_bounds(&settlement);

        let border = ctx
            .host
            .settlement_border(&settlement)
            .into_iter()
            .min_by(|a, b| horizontal_distance(*a, pos).total_cmp(&horizontal_distance(*b, pos)))
            .or_else(|| bounds.map(|b| b.nearest_edge_point(pos)))
            .ok_or_else(|| RaidError::MissingGeometry(settlement.clone()))?;

        let outward = bounds
            .and_then(|b| horizontal_direction(b.center(), border))
            .or_else(|| horizontal_direction(pos, border))
            .unwrap_or(DVec3::ZERO);

        Ok(DVec3::new(border.x, pos.y, border.z) + outward * margin)
    }

    /// The raid's shared extraction point, recording one if none exists yet.
    fn extraction_destination(&self, ctx: &mut TickContext, agent: AgentId, pos: DVec3) -> RaidResult<DVec3> {
        let raid_id = attributes::raid_of(&*ctx.host, agent).ok_or(RaidError::AgentGone(agent))?;

        let (existing, settlement) = match ctx.host.raid(raid_id) {
            Some(raid) => (raid.extraction_point(), raid.settlement.clone()),
            None => return Err(RaidError::RaidInactive(raid_id)),
        };

        if let Some(point) = existing {
            return Ok(point);
        }

        let point = match ctx.memory.nearest_exit(&settlement, pos) {
            Some(exit) => exit,
            None => self.border_destination(ctx, agent, pos)?,
        };

        if let Some(raid) = ctx.host.raid_mut(raid_id) {
            raid.set_extraction_point(point);
            raid.push_location(RaidMetaKey::ExitPoints, point, ctx.features.memory.dedup_radius);
        }

        debug!("Raid {} extraction point set to {}", raid_id, point);

        Ok(point)
    }

    /// Spiral outward looking for the highest walkable cell with cover beside it.
    fn high_ground_destination(&self, ctx: &TickContext, pos: DVec3) -> RaidResult<DVec3> {
        let base = crate::geometry::block_of(pos);
        let hazards = ctx.pathing.hazards();
        let radius = ctx.features.retreat.defensive_search_radius.max(1);

        let mut best: Option<(f64, IVec3)> = None;

        for ring in 1..=radius {
            for dx in -ring..=ring {
                for dz in -ring..=ring {
                    if dx.abs() != ring && dz.abs() != ring {
                        continue;
                    }

                    for dy in (-2..=4).rev() {
                        let cell = base + IVec3::new(dx, dy, dz);

                        if !is_walkable(&*ctx.host, hazards, cell) {
                            continue;
                        }

                        let score = dy as f64 + 0.5 * cover_count(ctx, cell) as f64;

                        if best.map(|(s, _)| score > s).unwrap_or(true) {
                            best = Some((score, cell));
                        }

                        break;
                    }
                }
            }
        }

        match best {
            Some((score, cell)) if score > 0.0 => Ok(standing_point(cell)),
            _ => Err(RaidError::NoDestination),
        }
    }

    // ─── Withdrawal ─────────────────────────────────────────────────────────

    /// Periodic check on a retreating raider: arrival, timeout, and a direct
    /// velocity correction when path following has given up.
    pub fn monitor(&mut self, ctx: &mut TickContext, agent: AgentId) -> RaidResult<TaskResult> {
        let info = match self.retreats.get(&agent) {
            Some(info) => info.clone(),
            None => return Ok(TaskResult::Done),
        };

        if !ctx.host.is_alive(agent) {
            self.forget(agent);
            return Err(RaidError::AgentGone(agent));
        }

        let pos = ctx.host.position(agent).ok_or(RaidError::AgentGone(agent))?;
        let features = ctx.features.retreat.clone();

        if horizontal_distance(pos, info.destination) <= features.arrival_distance {
            if info.archetype == RetreatArchetype::LootCarrier {
                self.extract(ctx, agent, info.destination);
            } else {
                self.end_retreat(ctx, agent);
            }
            return Ok(TaskResult::Done);
        }

        if ctx.now.saturating_sub(info.started_at) >= info.archetype.timeout(&features) {
            debug!("Raider {} retreat timed out", agent);
            self.end_retreat(ctx, agent);
            return Ok(TaskResult::Done);
        }

        let speed = info.archetype.speed(&features);
        ctx.navigate(agent, info.destination, speed);

        let direct = ctx.pathing.cache(agent).map(|cache| cache.is_direct() || !cache.navigating).unwrap_or(true);

        if direct {
            if let Some(direction) = horizontal_direction(pos, info.destination) {
                let velocity = ctx.host.velocity(agent).unwrap_or(DVec3::ZERO);
                let magnitude = ctx.features.pathing.base_speed * speed;
                ctx.host.set_velocity(agent, DVec3::new(direction.x * magnitude, velocity.y, direction.z * magnitude));
            }
        }

        Ok(TaskResult::Running)
    }

    /// A loot carrier made it out: count it, remember the exit, remove it.
    fn extract(&mut self, ctx: &mut TickContext, agent: AgentId, exit: DVec3) {
        if let Some(raid_id) = attributes::raid_of(&*ctx.host, agent) {
            let settlement = ctx.host.raid_mut(raid_id).map(|raid| {
                raid.increment_counter(RaidMetaKey::Extracted);
                raid.members.remove(&agent);
                raid.settlement.clone()
            });

            if let Some(settlement) = settlement {
                ctx.memory.record_exit(&settlement, exit);
            }
        }

        info!("Raider {} extracted with loot at {}", agent, exit);

        self.forget(agent);
        ctx.pathing.forget(agent);
        attributes::clear_raid_tags(&mut *ctx.host, agent);
        ctx.host.despawn(agent);
    }

    /// Finish a retreat and start the cooldown.
    pub fn end_retreat(&mut self, ctx: &mut TickContext, agent: AgentId) {
        if self.retreats.remove(&agent).is_some() {
            self.last_ended.insert(agent, ctx.now);
            debug!("Raider {} finished retreating", agent);
        }

        attributes::set_retreating(&mut *ctx.host, agent, false);
        ctx.stop(agent);
        ctx.scheduler.cancel(&Task::RetreatMonitor(agent).key());
    }

    /// Drop all state for a raider without touching the host.
    pub fn forget(&mut self, agent: AgentId) {
        self.retreats.remove(&agent);
        self.last_ended.remove(&agent);
    }

    /// Drop cooldown records for raiders the host no longer knows.
    pub fn prune(&mut self, ctx: &TickContext) -> usize {
        let before = self.retreats.len() + self.last_ended.len();
        let host = &*ctx.host;

        self.retreats.retain(|agent, _| host.is_alive(*agent));
        self.last_ended.retain(|agent, _| host.is_alive(*agent));

        before - (self.retreats.len() + self.last_ended.len())
    }
}

/// Solid blocks at head height around a cell.
fn cover_count(ctx: &TickContext, cell: IVec3) -> usize {
    [IVec3::X, IVec3::NEG_X, IVec3::Z, IVec3::NEG_Z]
        .iter()
        .filter(|offset| ctx.host.is_solid(cell + **offset + IVec3::Y))
        .count()
}
