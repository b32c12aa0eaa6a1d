//! Top-level driver. The host calls `tick` once per simulation tick and
//! forwards raid lifecycle and combat events; everything else runs as
//! scheduled tasks.

use crate::error::*;
use crate::features::RaidFeatures;
use crate::host::{attributes, AgentId, Host};
use crate::military::coordination::RaiderCoordinationManager;
use crate::military::leader::{LeaderDecision, LeaderDecisionSystem};
use crate::military::memory::RaiderMemory;
use crate::military::retreat::StrategicRetreatManager;
use crate::military::squad::SquadId;
use crate::military::tactics::AdvancedGroupTactics;
use crate::pathing::{NavigationOutcome, PathfindingManager, StuckOutcome};
use crate::raid::{RaidId, RaidMetaKey};
use crate::scheduler::{Subject, Task, TaskResult, TaskScheduler};
use glam::DVec3;
use log::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;

/// Everything a handler may touch during one tick, borrowed from the engine
/// and the host.
pub struct TickContext<'a> {
    pub host: &'a mut dyn Host,
    pub pathing: &'a mut PathfindingManager,
    pub scheduler: &'a mut TaskScheduler,
    pub memory: &'a mut RaiderMemory,
    pub rng: &'a mut StdRng,
    pub features: &'a RaidFeatures,
    pub now: u64,
}

impl<'a> TickContext<'a> {
    pub fn navigate(&mut self, agent: AgentId, goal: DVec3, speed: f64) -> NavigationOutcome {
        self.pathing.navigate(&mut *self.host, agent, goal, speed, self.now)
    }

    pub fn stop(&mut self, agent: AgentId) {
        self.pathing.stop(&mut *self.host, agent)
    }
}

/// Managers that act on a context but are not part of it.
struct Managers<'a> {
    coordination: &'a mut RaiderCoordinationManager,
    tactics: &'a mut AdvancedGroupTactics,
    retreat: &'a mut StrategicRetreatManager,
    leader: &'a LeaderDecisionSystem,
    raids: &'a mut BTreeSet<RaidId>,
}

pub struct RaidEngine {
    features: RaidFeatures,
    scheduler: TaskScheduler,
    pathing: PathfindingManager,
    coordination: RaiderCoordinationManager,
    tactics: AdvancedGroupTactics,
    retreat: StrategicRetreatManager,
    leader: LeaderDecisionSystem,
    memory: RaiderMemory,
    rng: StdRng,
    raids: BTreeSet<RaidId>,
    now: u64,
}

impl RaidEngine {
    pub fn new(features: RaidFeatures) -> RaidEngine {
        let mut scheduler = TaskScheduler::new();

        let scheduling = &features.scheduler;
        scheduler.schedule_repeating(Task::MovementPass, 0, scheduling.path_step_period);
        scheduler.schedule_repeating(Task::StuckPass, 0, features.pathing.stuck_check_period);
        scheduler.schedule_repeating(Task::Cleanup, scheduling.cleanup_period, scheduling.cleanup_period);

        RaidEngine {
            scheduler,
            pathing: PathfindingManager::new(&features),
            coordination: RaiderCoordinationManager::new(),
            tactics: AdvancedGroupTactics::new(),
            retreat: StrategicRetreatManager::new(),
            leader: LeaderDecisionSystem::new(),
            memory: RaiderMemory::new(&features.memory),
            rng: StdRng::seed_from_u64(features.scheduler.seed),
            raids: BTreeSet::new(),
            now: 0,
            features,
        }
    }

    /// Engine configured from a JSON blob. Malformed configuration is logged
    /// and replaced by defaults.
    pub fn from_json(config: &str) -> RaidEngine {
        let features = match RaidFeatures::from_json(config) {
            Ok(features) => features,
            Err(err) => {
                warn!("Malformed raid configuration, using defaults: {}", err);
                RaidFeatures::default()
            }
        };

        RaidEngine::new(features)
    }

    pub fn features(&self) -> &RaidFeatures {
        &self.features
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn pathing(&self) -> &PathfindingManager {
        &self.pathing
    }

    pub fn coordination(&self) -> &RaiderCoordinationManager {
        &self.coordination
    }

    pub fn tactics(&self) -> &AdvancedGroupTactics {
        &self.tactics
    }

    pub fn retreat(&self) -> &StrategicRetreatManager {
        &self.retreat
    }

    pub fn memory(&self) -> &RaiderMemory {
        &self.memory
    }

    pub fn is_managing(&self, raid: RaidId) -> bool {
        self.raids.contains(&raid)
    }

    fn split<'a>(&'a mut self, host: &'a mut dyn Host) -> (TickContext<'a>, Managers<'a>) {
        let ctx = TickContext {
            host,
            pathing: &mut self.pathing,
            scheduler: &mut self.scheduler,
            memory: &mut self.memory,
            rng: &mut self.rng,
            features: &self.features,
            now: self.now,
        };

        let managers = Managers {
            coordination: &mut self.coordination,
            tactics: &mut self.tactics,
            retreat: &mut self.retreat,
            leader: &self.leader,
            raids: &mut self.raids,
        };

        (ctx, managers)
    }

    // ─── Raid lifecycle ─────────────────────────────────────────────────────

    /// Take over a raid the host just spawned. Returns the number of squads
    /// formed.
    pub fn start_raid(&mut self, host: &mut dyn Host, raid: RaidId) -> usize {
        if !host.is_raid_active(raid) {
            warn!("Ignoring start of inactive raid {}", raid);
            return 0;
        }

        if self.raids.contains(&raid) {
            debug!("Raid {} already started", raid);
            return 0;
        }

        let squad_period = self.features.squads.update_period;
        let retreat_period = self.features.retreat.check_period;
        let default_tier = self.features.intelligence.default_tier;

        let (mut ctx, managers) = self.split(host);

        for agent in ctx.host.raiders(raid) {
            attributes::mark_raider(&mut *ctx.host, agent, raid);

            if ctx.host.attribute(agent, &attributes::AttrKey::Intelligence).is_none() {
                attributes::set_intelligence(&mut *ctx.host, agent, default_tier);
            }
        }

        let squads = match managers.coordination.organize(&mut ctx, raid) {
            Ok(squads) => squads.len(),
            Err(err) => {
                warn!("Failed to organize raid {}: {}", raid, err);
                return 0;
            }
        };

        managers.raids.insert(raid);

        let now = ctx.now;
        ctx.scheduler.schedule_repeating(Task::CoordinationPass(raid), now, squad_period);
        ctx.scheduler.schedule_repeating(Task::RetreatCheck(raid), now + retreat_period, retreat_period);

        info!("Raid {} started with {} squads", raid, squads);

        squads
    }

    /// Tear down everything held for a raid: squads, member annotations,
    /// paths, retreats and timers. Safe to call repeatedly.
    pub fn end_raid(&mut self, host: &mut dyn Host, raid: RaidId) {
        let (mut ctx, managers) = self.split(host);
        end_raid_cascade(&mut ctx, managers, raid);
    }

    // ─── Tick ───────────────────────────────────────────────────────────────

    /// Run every task due at `now`.
    pub fn tick(&mut self, host: &mut dyn Host, now: u64) {
        self.now = now;

        let due = self.scheduler.take_due(now);

        for (key, task) in due {
            let result = {
                let (mut ctx, managers) = self.split(&mut *host);
                run_task(&mut ctx, managers, &task)
            };

            match result {
                Ok(result) => self.scheduler.complete(&key, &task, result),
                Err(err) if err.is_terminal() => {
                    debug!("Cancelling {:?}: {}", key, err);
                    self.scheduler.cancel(&key);

                    if let RaidError::AgentGone(agent) = err {
                        self.forget_agent(agent);
                    }
                }
                Err(err) => {
                    warn!("Task {:?} failed, retrying next period: {}", key, err);
                }
            }
        }
    }

    // ─── Host events ────────────────────────────────────────────────────────

    /// A raider took damage from `attacker`.
    pub fn on_agent_damaged(&mut self, host: &mut dyn Host, victim: AgentId, attacker: AgentId) {
        if !attributes::is_raider(host, victim) {
            return;
        }

        let (mut ctx, managers) = self.split(host);

        managers.coordination.on_damage(&mut ctx, managers.retreat, victim, attacker);

        if managers.retreat.try_retreat(&mut ctx, victim).is_some() {
            let mates = managers.coordination.squad_mates(victim);
            managers.retreat.sympathetic_retreat(&mut ctx, victim, &mates);
        }
    }

    /// A raider took an item at `pos`. Marks it as a loot carrier, counts the
    /// theft and remembers the spot.
    pub fn on_loot_stolen(&mut self, host: &mut dyn Host, agent: AgentId, pos: DVec3, valuable: bool) {
        let raid_id = match attributes::raid_of(host, agent) {
            Some(raid) => raid,
            None => return,
        };

        let dedup = self.features.memory.dedup_radius;

        let settlement = match host.raid_mut(raid_id) {
            Some(raid) => {
                raid.stolen_items += 1;
                raid.push_location(RaidMetaKey::LootLocations, pos, dedup);
                raid.settlement.clone()
            }
            None => {
                warn!("Loot reported for unknown raid {}", raid_id);
                return;
            }
        };

        if valuable {
            self.memory.record_valuable(&settlement, pos);
        } else {
            self.memory.record_chest(&settlement, pos);
        }

        attributes::set_loot_carrier(host, agent, true);

        let (mut ctx, managers) = self.split(host);

        if managers.retreat.try_retreat(&mut ctx, agent).is_some() {
            let mates = managers.coordination.squad_mates(agent);
            managers.retreat.sympathetic_retreat(&mut ctx, agent, &mates);
        }
    }

    /// A raider died. Remembers where, and drops its state.
    pub fn on_agent_death(&mut self, host: &mut dyn Host, agent: AgentId) {
        if let (Some(raid), Some(pos)) = (attributes::raid_of(host, agent), host.position(agent)) {
            if let Some(settlement) = host.raid(raid).map(|r| r.settlement.clone()) {
                self.memory.record_danger(&settlement, pos);
            }
        }

        self.forget_agent(agent);
    }

    fn forget_agent(&mut self, agent: AgentId) {
        self.retreat.forget(agent);
        self.pathing.forget(agent);
        self.coordination.forget_agent(agent);
        self.scheduler.cancel_subject(Subject::Agent(agent));
    }

    /// Apply a decision to a squad directly, bypassing the leader's own
    /// judgement and cooldown.
    pub fn command_squad(&mut self, host: &mut dyn Host, squad: SquadId, decision: LeaderDecision) -> bool {
        let (mut ctx, managers) = self.split(host);

        let snapshot = match managers.coordination.squad(squad) {
            Some(squad) => squad.clone(),
            None => return false,
        };

        match managers
            .leader
            .execute(&mut ctx, managers.coordination, managers.tactics, managers.retreat, &snapshot, decision)
        {
            Ok(()) => true,
            Err(err) => {
                debug!("Squad {} could not carry out {:?}: {}", squad, decision, err);
                false
            }
        }
    }

    // ─── Memory ─────────────────────────────────────────────────────────────

    pub fn export_memory(&self) -> Option<String> {
        match self.memory.export() {
            Ok(data) => Some(data),
            Err(err) => {
                error!("Failed to export raider memory: {}", err);
                None
            }
        }
    }

    /// Load a snapshot from `export_memory`. Bad data leaves memory untouched.
    pub fn import_memory(&mut self, data: &str) -> bool {
        match self.memory.import(data) {
            Ok(_) => true,
            Err(err) => {
                warn!("Ignoring malformed raider memory snapshot: {}", err);
                false
            }
        }
    }
}

fn end_raid_cascade(ctx: &mut TickContext, managers: Managers, raid: RaidId) {
    let squads = managers.coordination.disband_raid(ctx, raid);

    for squad in &squads {
        managers.tactics.forget_squad(ctx, *squad);
    }

    let mut agents: BTreeSet<AgentId> = ctx.host.raiders(raid).into_iter().collect();

    if let Some(members) = ctx.host.raid(raid).map(|r| r.members.clone()) {
        agents.extend(members);
    }

    for agent in agents {
        if attributes::raid_of(&*ctx.host, agent).map(|r| r != raid).unwrap_or(false) {
            continue;
        }

        managers.retreat.forget(agent);
        managers.coordination.forget_agent(agent);
        ctx.pathing.stop(&mut *ctx.host, agent);
        ctx.pathing.forget(agent);
        ctx.scheduler.cancel_subject(Subject::Agent(agent));
        attributes::clear_raid_tags(&mut *ctx.host, agent);
    }

    ctx.scheduler.cancel_subject(Subject::Raid(raid));

    if managers.raids.remove(&raid) {
        info!("Raid {} ended, {} squads disbanded", raid, squads.len());
    }
}

fn run_task(ctx: &mut TickContext, managers: Managers, task: &Task) -> RaidResult<TaskResult> {
    match *task {
        Task::MovementPass => {
            for agent in ctx.pathing.navigating_agents() {
                ctx.pathing.step(&mut *ctx.host, agent, ctx.now);
            }

            Ok(TaskResult::Running)
        }
        Task::StuckPass => {
            for agent in ctx.pathing.navigating_agents() {
                if let StuckOutcome::Stuck { goal, remediations } = ctx.pathing.check_stuck(&mut *ctx.host, agent, &mut *ctx.rng) {
                    if !remediations.is_empty() {
                        debug!("Raider {} remediated {:?}", agent, remediations);
                    }

                    let at = ctx.now + ctx.features.pathing.stuck_push_delay;
                    ctx.scheduler.schedule_once(Task::StuckPush { agent, goal }, at);
                }
            }

            Ok(TaskResult::Running)
        }
        Task::StuckPush { agent, goal } => {
            if !ctx.host.is_alive(agent) {
                return Err(RaidError::AgentGone(agent));
            }

            ctx.pathing.push_toward(&mut *ctx.host, agent, goal);

            Ok(TaskResult::Done)
        }
        Task::CoordinationPass(raid) => {
            if !managers.raids.contains(&raid) || !ctx.host.is_raid_active(raid) {
                end_raid_cascade(ctx, managers, raid);
                return Err(RaidError::RaidInactive(raid));
            }

            let report = managers.coordination.update(ctx, managers.retreat, managers.tactics, raid)?;

            for squad in report.disbanded.iter() {
                managers.tactics.forget_squad(ctx, *squad);
            }

            if let Some((_, first, second)) = report.merged {
                managers.tactics.forget_squad(ctx, first);
                managers.tactics.forget_squad(ctx, second);
            }

            trace!("Raid {} coordination pass: {:?}", raid, report);

            for squad in managers.coordination.squads_of_raid(raid) {
                if let Err(err) = managers
                    .leader
                    .run(ctx, managers.coordination, managers.tactics, managers.retreat, squad)
                {
                    debug!("Squad {} skipped its decision: {}", squad, err);
                }
            }

            Ok(TaskResult::Running)
        }
        Task::RetreatCheck(raid) => {
            if !managers.raids.contains(&raid) {
                return Err(RaidError::RaidInactive(raid));
            }

            for (agent, _) in managers.retreat.check_raid(ctx, raid)? {
                let mates = managers.coordination.squad_mates(agent);
                managers.retreat.sympathetic_retreat(ctx, agent, &mates);
            }

            Ok(TaskResult::Running)
        }
        Task::RetreatMonitor(agent) => managers.retreat.monitor(ctx, agent),
        Task::Tactic { squad, step } => {
            let snapshot = managers.coordination.squad(squad).cloned();
            managers.tactics.run_step(ctx, squad, snapshot.as_ref(), step)
        }
        Task::Cleanup => {
            let paths = ctx.pathing.prune(&*ctx.host);
            let retreats = managers.retreat.prune(ctx);
            managers.tactics.prune(ctx);

            if paths + retreats > 0 {
                debug!("Cleanup dropped {} path caches and {} retreat records", paths, retreats);
            }

            let ended: Vec<RaidId> = managers.raids.iter().copied().filter(|raid| !ctx.host.is_raid_active(*raid)).collect();

            if ended.is_empty() {
                return Ok(TaskResult::Running);
            }

            let Managers {
                coordination,
                tactics,
                retreat,
                leader,
                raids,
            } = managers;

            for raid in ended {
                end_raid_cascade(
                    ctx,
                    Managers {
                        coordination: &mut *coordination,
                        tactics: &mut *tactics,
                        retreat: &mut *retreat,
                        leader,
                        raids: &mut *raids,
                    },
                    raid,
                );
            }

            Ok(TaskResult::Running)
        }
    }
}
