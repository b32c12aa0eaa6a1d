use super::formation::formation_slots;
use super::retreat::{RetreatTrigger, StrategicRetreatManager};
use super::squad::*;
use super::tactics::AdvancedGroupTactics;
use crate::engine::TickContext;
use crate::error::*;
use crate::host::{attributes, AgentId};
use crate::raid::{RaidId, RaidMetaKey};
use crate::scheduler::Subject;
use glam::DVec3;
use itertools::Itertools;
use log::*;
use rand::Rng;
use std::collections::HashMap;

/// What one coordination pass did, for the caller's bookkeeping.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PassReport {
    pub disbanded: Vec<SquadId>,
    /// New squad and the two it replaced.
    pub merged: Option<(SquadId, SquadId, SquadId)>,
    pub retreats_propagated: usize,
    pub repositioned: usize,
    pub rehomed: usize,
}

#[derive(Default)]
pub struct RaiderCoordinationManager {
    squads: HashMap<SquadId, Squad>,
    by_agent: HashMap<AgentId, SquadId>,
}

impl RaiderCoordinationManager {
    pub fn new() -> RaiderCoordinationManager {
        RaiderCoordinationManager::default()
    }

    pub fn squad(&self, id: SquadId) -> Option<&Squad> {
        self.squads.get(&id)
    }

    pub fn squad_of(&self, agent: AgentId) -> Option<&Squad> {
        self.by_agent.get(&agent).and_then(|id| self.squads.get(id))
    }

    pub fn len(&self) -> usize {
        self.squads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.squads.is_empty()
    }

    /// Squads of a raid, oldest first.
    pub fn squads_of_raid(&self, raid: RaidId) -> Vec<SquadId> {
        self.squads
            .values()
            .filter(|squad| squad.raid == raid)
            .sorted_by_key(|squad| (squad.created_at, squad.id))
            .map(|squad| squad.id)
            .collect()
    }

    /// Other members of the agent's squad with their roles.
    pub fn squad_mates(&self, agent: AgentId) -> Vec<(AgentId, SquadRole)> {
        self.squad_of(agent)
            .map(|squad| squad.members().filter(|(other, _)| *other != agent).collect())
            .unwrap_or_default()
    }

    pub fn set_formation(&mut self, squad: SquadId, formation: FormationKind) {
        if let Some(squad) = self.squads.get_mut(&squad) {
            if squad.formation != formation {
                debug!("Squad {} switching to {:?} formation", squad.id, formation);
                squad.formation = formation;
            }
        }
    }

    pub fn mark_decision(&mut self, squad: SquadId, now: u64) {
        if let Some(squad) = self.squads.get_mut(&squad) {
            squad.last_decision = Some(now);
        }
    }

    fn insert_squad(&mut self, ctx: &mut TickContext, squad: Squad) -> SquadId {
        let id = squad.id;

        for (agent, role) in squad.members() {
            self.by_agent.insert(agent, id);
            attributes::set_membership(&mut *ctx.host, agent, id, role);
        }

        self.squads.insert(id, squad);

        id
    }

    /// Put an agent in a squad, pulling it out of any squad it was in first.
    pub fn attach(&mut self, ctx: &mut TickContext, squad: SquadId, agent: AgentId, role: SquadRole) -> RaidResult<()> {
        if !self.squads.contains_key(&squad) {
            return Err(RaidError::SquadGone(squad));
        }

        if let Some(previous) = self.by_agent.get(&agent).copied() {
            if previous == squad {
                return Ok(());
            }

            if let Some(old) = self.squads.get_mut(&previous) {
                old.remove_member(agent);
            }
        }

        if let Some(target) = self.squads.get_mut(&squad) {
            target.add_member(agent, role);
        }

        self.by_agent.insert(agent, squad);
        attributes::set_membership(&mut *ctx.host, agent, squad, role);

        Ok(())
    }

    fn role_for(ctx: &TickContext, agent: AgentId) -> SquadRole {
        SquadRole::for_capability(ctx.host.capability(agent))
    }

    /// Nearest non-full squad of the raid whose leader is within the attach
    /// radius.
    fn nearest_open_squad(&self, ctx: &TickContext, raid: RaidId, pos: DVec3) -> Option<SquadId> {
        let max_size = ctx.features.squads.max_squad_size;
        let radius = ctx.features.squads.attach_radius;

        self.squads
            .values()
            .filter(|squad| squad.raid == raid && !squad.is_full(max_size) && squad.state == SquadState::Active)
            .filter(|squad| squad.role_of(squad.leader) != Some(SquadRole::LoneWolf))
            .filter_map(|squad| {
                ctx.host
                    .position(squad.leader)
                    .map(|leader_pos| (squad.id, leader_pos.distance(pos)))
            })
            .filter(|(_, distance)| *distance <= radius)
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
            .map(|(id, _)| id)
    }

    fn lone_wolf(&mut self, ctx: &mut TickContext, raid: RaidId, agent: AgentId) -> SquadId {
        let mut squad = Squad::with_role(raid, agent, SquadRole::LoneWolf, ctx.now);
        squad.state = SquadState::Active;
        squad.formation = FormationKind::Flexible;

        debug!("Raider {} going it alone", agent);

        self.insert_squad(ctx, squad)
    }

    /// Build squads for a freshly started raid.
    pub fn organize(&mut self, ctx: &mut TickContext, raid: RaidId) -> RaidResult<Vec<SquadId>> {
        if !ctx.host.is_raid_active(raid) {
            return Err(RaidError::RaidInactive(raid));
        }

        let default_tier = ctx.features.intelligence.default_tier;
        let features = ctx.features.squads.clone();

        let mut unassigned: Vec<(AgentId, u8, DVec3)> = ctx
            .host
            .raiders(raid)
            .into_iter()
            .filter(|agent| ctx.host.is_alive(*agent) && !self.by_agent.contains_key(agent))
            .filter_map(|agent| {
                ctx.host
                    .position(agent)
                    .map(|pos| (agent, attributes::intelligence(&*ctx.host, agent, default_tier), pos))
            })
            .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
            .collect();

        let leader_count = features.max_leaders.min(unassigned.len());
        let leaders: Vec<(AgentId, u8, DVec3)> = unassigned.drain(..leader_count).collect();

        let mut created = Vec::with_capacity(leaders.len());

        for (leader, _, leader_pos) in leaders {
            let mut squad = Squad::new(raid, leader, ctx.now);

            unassigned.sort_by(|a, b| a.2.distance(leader_pos).total_cmp(&b.2.distance(leader_pos)).then_with(|| a.0.cmp(&b.0)));

            let mut remaining = Vec::with_capacity(unassigned.len());

            for (agent, tier, pos) in unassigned.drain(..) {
                if !squad.is_full(features.max_squad_size) && pos.distance(leader_pos) <= features.attach_radius {
                    squad.add_member(agent, Self::role_for(ctx, agent));
                } else {
                    remaining.push((agent, tier, pos));
                }
            }

            unassigned = remaining;

            squad.state = SquadState::Active;
            created.push(self.insert_squad(ctx, squad));
        }

        for (agent, _, pos) in unassigned {
            match self.nearest_open_squad(ctx, raid, pos) {
                Some(squad) => {
                    let role = Self::role_for(ctx, agent);
                    self.attach(ctx, squad, agent, role)?;
                }
                None => created.push(self.lone_wolf(ctx, raid, agent)),
            }
        }

        info!("Raid {} organized into {} squads", raid, created.len());

        Ok(created)
    }

    /// Give squadless raiders of a raid a home.
    pub fn rehome(&mut self, ctx: &mut TickContext, raid: RaidId) -> usize {
        let mut homeless: Vec<AgentId> = ctx
            .host
            .raiders(raid)
            .into_iter()
            .filter(|agent| ctx.host.is_alive(*agent) && !self.by_agent.contains_key(agent))
            .collect();

        homeless.sort();

        let mut count = 0;

        for agent in homeless {
            let pos = match ctx.host.position(agent) {
                Some(pos) => pos,
                None => continue,
            };

            match self.nearest_open_squad(ctx, raid, pos) {
                Some(squad) => {
                    let role = Self::role_for(ctx, agent);
                    if self.attach(ctx, squad, agent, role).is_err() {
                        continue;
                    }
                }
                None => {
                    self.lone_wolf(ctx, raid, agent);
                }
            }

            count += 1;
        }

        if count > 0 {
            debug!("Re-homed {} raiders in raid {}", count, raid);
        }

        count
    }

    // ─── Periodic pass ──────────────────────────────────────────────────────

    /// Per-squad upkeep for one raid: validity, retreat propagation, formation
    /// keeping, then at most one merge and re-homing of stragglers.
    pub fn update(
        &mut self,
        ctx: &mut TickContext,
        retreat: &mut StrategicRetreatManager,
        tactics: &AdvancedGroupTactics,
        raid: RaidId,
    ) -> RaidResult<PassReport> {
        if !ctx.host.is_raid_active(raid) {
            return Err(RaidError::RaidInactive(raid));
        }

        let mut report = PassReport::default();

        for id in self.squads_of_raid(raid) {
            let mut squad = match self.squads.get(&id) {
                Some(squad) => squad.clone(),
                None => continue,
            };

            let leader_valid = ctx.host.is_alive(squad.leader) && attributes::raid_of(&*ctx.host, squad.leader) == Some(raid);

            if !leader_valid {
                self.disband(ctx, id, "leader lost");
                report.disbanded.push(id);
                continue;
            }

            let dead: Vec<AgentId> = squad.member_ids().into_iter().filter(|agent| !ctx.host.is_alive(*agent)).collect();

            for agent in dead {
                squad.remove_member(agent);
                self.by_agent.remove(&agent);
            }

            if let Some(stored) = self.squads.get_mut(&id) {
                *stored = squad.clone();
            }

            if attributes::is_retreating(&*ctx.host, squad.leader) {
                for (follower, _) in squad.followers() {
                    if !attributes::is_retreating(&*ctx.host, follower) && retreat.order_retreat(ctx, follower, RetreatTrigger::SquadOrder).is_some() {
                        report.retreats_propagated += 1;
                    }
                }
                continue;
            }

            if tactics.is_steering(id) {
                continue;
            }

            report.repositioned += self.keep_formation(ctx, &squad);
        }

        if let Some(merge) = self.merge_small_squads(ctx, raid) {
            report.merged = Some(merge);
        }

        report.rehomed = self.rehome(ctx, raid);

        Ok(report)
    }

    /// Send members that drifted from their slot back to it.
    fn keep_formation(&mut self, ctx: &mut TickContext, squad: &Squad) -> usize {
        let leader_pos = match ctx.host.position(squad.leader) {
            Some(pos) => pos,
            None => return 0,
        };

        let facing = ctx.host.facing(squad.leader);

        let followers: Vec<(AgentId, SquadRole, DVec3)> = squad
            .followers()
            .into_iter()
            .filter(|(agent, _)| !attributes::is_retreating(&*ctx.host, *agent))
            .filter(|(agent, _)| ctx.host.target(*agent).map(|t| !ctx.host.is_alive(t)).unwrap_or(true))
            .filter_map(|(agent, role)| ctx.host.position(agent).map(|pos| (agent, role, pos)))
            .collect();

        let slots = formation_slots(squad.formation, leader_pos, facing, &followers, &ctx.features.formation, &mut *ctx.rng);
        let threshold = ctx.features.squads.slot_threshold;

        let mut moved = 0;

        for (agent, slot) in slots {
            let drifted = ctx.host.position(agent).map(|pos| pos.distance(slot) > threshold).unwrap_or(false);

            if drifted {
                let speed = squad.role_of(agent).unwrap_or_default().speed(&ctx.features.squads);
                ctx.navigate(agent, slot, speed);
                moved += 1;
            }
        }

        moved
    }

    /// Members that still count toward a squad's strength.
    fn effective_size(ctx: &TickContext, squad: &Squad) -> usize {
        squad
            .member_ids()
            .into_iter()
            .filter(|agent| ctx.host.is_alive(*agent) && !attributes::is_retreating(&*ctx.host, *agent))
            .count()
    }

    /// Fold the first two undersized squads of a raid into one.
    pub fn merge_small_squads(&mut self, ctx: &mut TickContext, raid: RaidId) -> Option<(SquadId, SquadId, SquadId)> {
        let candidates: Vec<SquadId> = self
            .squads_of_raid(raid)
            .into_iter()
            .filter(|id| {
                self.squads
                    .get(id)
                    .map(|squad| squad.len() <= 1 && Self::effective_size(ctx, squad) < 2 && !squad.is_disbanding())
                    .unwrap_or(false)
            })
            .take(2)
            .collect();

        if candidates.len() < 2 {
            return None;
        }

        let (first, second) = (candidates[0], candidates[1]);
        let default_tier = ctx.features.intelligence.default_tier;

        let mut members: Vec<AgentId> = Vec::new();

        for id in [first, second] {
            if let Some(squad) = self.squads.get_mut(&id) {
                squad.state = SquadState::Merging;
                members.extend(squad.member_ids().into_iter().filter(|agent| ctx.host.is_alive(*agent)));
            }
        }

        let leader = members
            .iter()
            .copied()
            .filter(|agent| !attributes::is_retreating(&*ctx.host, *agent))
            .max_by(|a, b| {
                attributes::intelligence(&*ctx.host, *a, default_tier)
                    .cmp(&attributes::intelligence(&*ctx.host, *b, default_tier))
                    .then_with(|| b.cmp(a))
            })
            .or_else(|| members.first().copied())?;

        for id in [first, second] {
            self.squads.remove(&id);
            ctx.scheduler.cancel_subject(Subject::Squad(id));
        }

        let mut merged = Squad::new(raid, leader, ctx.now);
        merged.state = SquadState::Active;

        for agent in members.iter().copied().filter(|agent| *agent != leader) {
            merged.add_member(agent, Self::role_for(ctx, agent));
        }

        let id = self.insert_squad(ctx, merged);

        info!("Merged squads {} and {} into {} under {}", first, second, id, leader);

        Some((id, first, second))
    }

    // ─── Damage relay ───────────────────────────────────────────────────────

    /// React to a raider being hit.
    pub fn on_damage(&mut self, ctx: &mut TickContext, retreat: &mut StrategicRetreatManager, victim: AgentId, attacker: AgentId) {
        let squad = match self.squad_of(victim) {
            Some(squad) => squad.clone(),
            None => return,
        };

        if !ctx.host.is_alive(attacker) {
            return;
        }

        let attacker_pos = ctx.host.position(attacker);

        if victim == squad.leader {
            let chance = ctx.features.squads.looter_retreat_chance.clamp(0.0, 1.0);

            for (agent, role) in squad.followers() {
                if !ctx.host.is_alive(agent) || attributes::is_retreating(&*ctx.host, agent) {
                    continue;
                }

                match role {
                    SquadRole::Tank | SquadRole::Ranged => ctx.host.set_target(agent, Some(attacker)),
                    SquadRole::Looter if ctx.rng.random_bool(chance) => {
                        retreat.order_retreat(ctx, agent, RetreatTrigger::SquadOrder);
                    }
                    _ => {}
                }
            }

            debug!("Squad {} rallying to defend leader against {}", squad.id, attacker);
            return;
        }

        let leader_tier = attributes::intelligence(&*ctx.host, squad.leader, ctx.features.intelligence.default_tier);

        if leader_tier >= ctx.features.intelligence.redirect_leader
            && ctx.host.is_alive(squad.leader)
            && !attributes::is_retreating(&*ctx.host, squad.leader)
        {
            ctx.host.set_target(squad.leader, Some(attacker));

            if let Some(pos) = attacker_pos {
                let speed = SquadRole::Leader.speed(&ctx.features.squads);
                ctx.navigate(squad.leader, pos, speed);
            }
        }

        if let Some(pos) = attacker_pos {
            let dedup = ctx.features.memory.dedup_radius;

            let settlement = ctx.host.raid_mut(squad.raid).map(|raid| {
                raid.push_location(RaidMetaKey::DangerPoints, pos, dedup);
                raid.settlement.clone()
            });

            if let Some(settlement) = settlement {
                ctx.memory.record_danger(&settlement, pos);
            }
        }
    }

    // ─── Teardown ───────────────────────────────────────────────────────────

    /// Dissolve a squad and strip membership from every member. Safe to call
    /// on a squad that is already gone.
    pub fn disband(&mut self, ctx: &mut TickContext, id: SquadId, reason: &str) -> bool {
        let mut squad = match self.squads.remove(&id) {
            Some(squad) => squad,
            None => return false,
        };

        squad.state = SquadState::Disbanding;

        for agent in squad.member_ids() {
            if self.by_agent.get(&agent) == Some(&id) {
                self.by_agent.remove(&agent);
                attributes::clear_membership(&mut *ctx.host, agent);
            }
        }

        ctx.scheduler.cancel_subject(Subject::Squad(id));

        info!("Disbanded squad {} ({})", id, reason);

        true
    }

    pub fn disband_raid(&mut self, ctx: &mut TickContext, raid: RaidId) -> Vec<SquadId> {
        let squads = self.squads_of_raid(raid);

        for id in &squads {
            self.disband(ctx, *id, "raid ended");
        }

        squads
    }

    /// Take a dead raider out of its squad. A dead leader leaves the squad
    /// leaderless until the next pass disbands it.
    pub fn forget_agent(&mut self, agent: AgentId) {
        if let Some(id) = self.by_agent.remove(&agent) {
            if let Some(squad) = self.squads.get_mut(&id) {
                if squad.leader != agent {
                    squad.remove_member(agent);
                }
            }
        }
    }
}
