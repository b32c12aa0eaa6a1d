//! Rule-based controller each squad leader runs on its own cooldown. Reads
//! the threat picture around the leader and picks one squad-wide action.

use super::coordination::RaiderCoordinationManager;
use super::retreat::{RetreatTrigger, StrategicRetreatManager};
use super::squad::*;
use super::tactics::AdvancedGroupTactics;
use super::threatmap::{ThreatAssessor, ThreatInfo};
use crate::engine::TickContext;
use crate::error::*;
use crate::geometry::horizontal_distance;
use crate::host::{attributes, AgentId, Capability};
use crate::raid::RaidMetaKey;
use glam::DVec3;
use log::*;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LeaderDecision {
    /// Everyone withdraws.
    Retreat,
    /// Pull back to draw pursuers, then turn on them.
    FeignedRetreat { threat: AgentId },
    Distraction { target: AgentId, loot: Option<DVec3> },
    Flanking { target: AgentId },
    Surround { target: AgentId },
    Ambush { target: AgentId },
    HuntingPack { target: AgentId },
    /// All members on the single threat.
    FullEngage { target: AgentId },
    /// Combat roles engage, looters go for the loot.
    SplitFocus { target: AgentId, loot: Option<DVec3> },
    /// Nothing to fight: spread out and look for loot.
    SeekLoot { spot: Option<DVec3> },
    /// Bound toward a distant loot spot.
    Advance { objective: DVec3 },
    Engage { target: AgentId },
}

/// Where looters should head: remembered loot first, then the raid's shared
/// points of interest.
fn loot_spot(ctx: &TickContext, squad: &Squad, from: DVec3) -> Option<DVec3> {
    let raid = ctx.host.raid(squad.raid)?;

    ctx.memory.best_loot_spot(&raid.settlement, from).or_else(|| {
        raid.locations(RaidMetaKey::LootLocations)
            .iter()
            .filter(|spot| !ctx.memory.is_dangerous(&raid.settlement, **spot))
            .copied()
            .min_by(|a, b| a.distance(from).total_cmp(&b.distance(from)))
    })
}

/// Whether the hostile is moving away from the squad.
fn is_fleeing(ctx: &TickContext, threat: &ThreatInfo, from: DVec3) -> bool {
    ctx.host
        .velocity(threat.agent)
        .map(|velocity| {
            let away = crate::geometry::flatten(threat.position - from).normalize_or_zero();
            crate::geometry::flatten(velocity).dot(away) > 0.05
        })
        .unwrap_or(false)
}

#[derive(Default)]
pub struct LeaderDecisionSystem;

impl LeaderDecisionSystem {
    pub fn new() -> LeaderDecisionSystem {
        LeaderDecisionSystem
    }

    pub fn ready(&self, squad: &Squad, now: u64, cooldown: u64) -> bool {
        squad.last_decision.map(|last| now.saturating_sub(last) >= cooldown).unwrap_or(true)
    }

    /// Pick the squad's next action without changing anything.
    pub fn decide(&self, ctx: &TickContext, squad: &Squad) -> RaidResult<LeaderDecision> {
        let leader_pos = match ctx.host.position(squad.leader) {
            Some(pos) if ctx.host.is_alive(squad.leader) => pos,
            _ => return Err(RaidError::AgentGone(squad.leader)),
        };

        let (settlement, quota_met) = match ctx.host.raid(squad.raid) {
            Some(raid) => (raid.settlement.clone(), raid.quota_met(ctx.features.leader.loot_quota)),
            None => return Err(RaidError::RaidInactive(squad.raid)),
        };

        let tier = attributes::intelligence(&*ctx.host, squad.leader, ctx.features.intelligence.default_tier);
        let thresholds = &ctx.features.intelligence;

        let threats = ThreatAssessor::new(&ctx.features.threat).rank_threats(&*ctx.host, &*ctx.memory, &settlement, leader_pos, ctx.features.leader.threat_radius);

        let decision = match threats.first() {
            Some(top) if threats.len() > 1 && tier >= thresholds.tactical_decisions => {
                let outnumbered = threats.len() > squad.len();

                if outnumbered && quota_met {
                    LeaderDecision::Retreat
                } else if squad.has_role(SquadRole::Looter) {
                    LeaderDecision::Distraction {
                        target: top.agent,
                        loot: loot_spot(ctx, squad, leader_pos),
                    }
                } else if squad.has_role(SquadRole::Tank) && threats.len() <= 3 {
                    LeaderDecision::Flanking { target: top.agent }
                } else if outnumbered && squad.len() > 1 {
                    LeaderDecision::FeignedRetreat { threat: top.agent }
                } else {
                    LeaderDecision::Engage { target: top.agent }
                }
            }
            Some(top) if threats.len() == 1 && tier >= thresholds.single_threat_decisions => {
                if quota_met {
                    LeaderDecision::SplitFocus {
                        target: top.agent,
                        loot: loot_spot(ctx, squad, leader_pos),
                    }
                } else if squad.len() >= 3 && is_fleeing(ctx, top, leader_pos) {
                    LeaderDecision::HuntingPack { target: top.agent }
                } else if squad.len() >= 3 && squad.has_role(SquadRole::Tank) && ctx.host.capability(top.agent).contains(Capability::RANGED) {
                    LeaderDecision::Ambush { target: top.agent }
                } else if squad.len() >= 3 {
                    LeaderDecision::Surround { target: top.agent }
                } else {
                    LeaderDecision::FullEngage { target: top.agent }
                }
            }
            Some(top) => LeaderDecision::Engage { target: top.agent },
            None => {
                let spot = loot_spot(ctx, squad, leader_pos);

                match spot {
                    Some(objective)
                        if squad.len() >= 4 && horizontal_distance(leader_pos, objective) > ctx.features.tactics.leapfrog_step * 2.0 =>
                    {
                        LeaderDecision::Advance { objective }
                    }
                    _ => LeaderDecision::SeekLoot { spot },
                }
            }
        };

        Ok(decision)
    }

    /// Decide and act for one squad if its leader is off cooldown.
    pub fn run(
        &self,
        ctx: &mut TickContext,
        coordination: &mut RaiderCoordinationManager,
        tactics: &mut AdvancedGroupTactics,
        retreat: &mut StrategicRetreatManager,
        id: SquadId,
    ) -> RaidResult<Option<LeaderDecision>> {
        let squad = coordination.squad(id).cloned().ok_or(RaidError::SquadGone(id))?;

        if squad.state != SquadState::Active || !self.ready(&squad, ctx.now, ctx.features.leader.decision_cooldown) {
            return Ok(None);
        }

        if attributes::is_retreating(&*ctx.host, squad.leader) {
            return Ok(None);
        }

        let decision = self.decide(ctx, &squad)?;

        coordination.mark_decision(id, ctx.now);

        debug!("Squad {} leader {} decided {:?}", id, squad.leader, decision);

        self.execute(ctx, coordination, tactics, retreat, &squad, decision)?;

        Ok(Some(decision))
    }

    pub fn execute(
        &self,
        ctx: &mut TickContext,
        coordination: &mut RaiderCoordinationManager,
        tactics: &mut AdvancedGroupTactics,
        retreat: &mut StrategicRetreatManager,
        squad: &Squad,
        decision: LeaderDecision,
    ) -> RaidResult<()> {
        let executed = match decision {
            LeaderDecision::Retreat => {
                let mut order = squad.member_ids();
                order.sort_by_key(|agent| *agent != squad.leader);

                for agent in order {
                    retreat.order_retreat(ctx, agent, RetreatTrigger::LeaderOrder);
                }

                true
            }
            LeaderDecision::FeignedRetreat { threat } => tactics.feigned_retreat(ctx, squad, threat)?,
            LeaderDecision::Distraction { target, loot } => tactics.distraction(ctx, squad, target, loot)?,
            LeaderDecision::Flanking { target } => tactics.flanking(ctx, squad, target)?,
            LeaderDecision::Surround { target } => tactics.surround_and_attack(ctx, squad, target)?,
            LeaderDecision::Ambush { target } => {
                let point = ctx.host.position(squad.leader).ok_or(RaidError::AgentGone(squad.leader))?;
                tactics.bait_and_ambush(ctx, squad, target, point)?
            }
            LeaderDecision::HuntingPack { target } => tactics.hunting_pack(ctx, squad, target)?,
            LeaderDecision::FullEngage { target } => tactics.concentrated_assault(ctx, squad, target)?,
            LeaderDecision::SplitFocus { target, loot } => {
                self.split_focus(ctx, squad, target, loot);
                true
            }
            LeaderDecision::SeekLoot { spot } => {
                coordination.set_formation(squad.id, FormationKind::Spread);
                self.seek_loot(ctx, squad, spot);
                true
            }
            LeaderDecision::Advance { objective } => {
                coordination.set_formation(squad.id, FormationKind::Spread);
                tactics.leapfrog_advance(ctx, squad, objective)?
            }
            LeaderDecision::Engage { target } => {
                self.engage(ctx, squad, target);
                true
            }
        };

        // A tactic on cooldown falls back to a plain engagement.
        if !executed {
            match decision {
                LeaderDecision::Advance { objective } => self.seek_loot(ctx, squad, Some(objective)),
                LeaderDecision::FeignedRetreat { threat } => self.engage(ctx, squad, threat),
                LeaderDecision::Distraction { target, .. }
                | LeaderDecision::Flanking { target }
                | LeaderDecision::Surround { target }
                | LeaderDecision::Ambush { target }
                | LeaderDecision::HuntingPack { target }
                | LeaderDecision::FullEngage { target } => self.engage(ctx, squad, target),
                _ => {}
            }
        }

        Ok(())
    }

    /// Leader and combat roles go for the target.
    fn engage(&self, ctx: &mut TickContext, squad: &Squad, target: AgentId) {
        let target_pos = match ctx.host.position(target) {
            Some(pos) if ctx.host.is_alive(target) => pos,
            _ => return,
        };

        for (agent, role) in squad.members() {
            if !role.is_combat() || !ctx.host.is_alive(agent) || attributes::is_retreating(&*ctx.host, agent) {
                continue;
            }

            ctx.host.set_target(agent, Some(target));

            if agent == squad.leader {
                let speed = role.speed(&ctx.features.squads);
                ctx.navigate(agent, target_pos, speed);
            }
        }
    }

    /// Combat roles engage; looters are pointed at loot through the raid's
    /// shared points of interest.
    fn split_focus(&self, ctx: &mut TickContext, squad: &Squad, target: AgentId, loot: Option<DVec3>) {
        self.engage(ctx, squad, target);

        let spot = match loot {
            Some(spot) => spot,
            None => return,
        };

        let dedup = ctx.features.memory.dedup_radius;

        if let Some(raid) = ctx.host.raid_mut(squad.raid) {
            raid.push_location(RaidMetaKey::LootLocations, spot, dedup);
        }

        for agent in squad.with_role_of(SquadRole::Looter) {
            if ctx.host.is_alive(agent) && !attributes::is_retreating(&*ctx.host, agent) {
                ctx.host.set_target(agent, None);
                let speed = SquadRole::Looter.speed(&ctx.features.squads);
                ctx.navigate(agent, spot, speed);
            }
        }
    }

    /// Lead the squad to the best known loot spot, or somewhere safe inside
    /// the settlement when nothing is known yet.
    fn seek_loot(&self, ctx: &mut TickContext, squad: &Squad, spot: Option<DVec3>) {
        let destination = match spot {
            Some(spot) => Some(spot),
            None => {
                let settlement = ctx.host.raid(squad.raid).map(|raid| raid.settlement.clone());
                settlement.and_then(|settlement| ctx.host.random_safe_point(&settlement))
            }
        };

        if let Some(destination) = destination {
            let speed = SquadRole::Leader.speed(&ctx.features.squads);
            ctx.navigate(squad.leader, destination, speed);
        }
    }
}
