//! Small in-memory world implementing every host interface, with just enough
//! kinematics (gravity, block collision, stepping) for raiders to walk paths.
//! Used by the scenario tests and for headless runs.

use crate::geometry::{block_of, Aabb};
use crate::host::*;
use crate::pathing::hazards::BlockKind;
use crate::raid::{Raid, RaidId};
use glam::{DVec3, IVec3};
use log::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Clone, Debug)]
pub struct SimAgent {
    pub position: DVec3,
    pub velocity: DVec3,
    pub facing: DVec3,
    pub health: Health,
    pub capability: Capability,
    pub hostile: bool,
    pub alive: bool,
    pub target: Option<AgentId>,
    pub attributes: HashMap<AttrKey, AttrValue>,
}

impl SimAgent {
    pub fn new(position: DVec3, capability: Capability, hostile: bool) -> SimAgent {
        SimAgent {
            position,
            velocity: DVec3::ZERO,
            facing: DVec3::X,
            health: Health::new(20.0, 20.0),
            capability,
            hostile,
            alive: true,
            target: None,
            attributes: HashMap::new(),
        }
    }
}

pub struct SimWorld {
    blocks: HashMap<IVec3, BlockKind>,
    /// Cells below this height default to stone, the rest to air.
    ground_level: i32,
    agents: BTreeMap<AgentId, SimAgent>,
    raids: HashMap<RaidId, Raid>,
    active_raids: HashSet<RaidId>,
    settlements: HashMap<String, Aabb>,
    /// Cells the placement gate refuses to let raiders change.
    protected: HashSet<IVec3>,
    rng: StdRng,
    pub gravity: f64,
    next_id: u128,
}

impl SimWorld {
    /// Flat world whose surface sits at `ground_level`: agents stand at that
    /// height on the stone below.
    pub fn flat(ground_level: i32, seed: u64) -> SimWorld {
        SimWorld {
            blocks: HashMap::new(),
            ground_level,
            agents: BTreeMap::new(),
            raids: HashMap::new(),
            active_raids: HashSet::new(),
            settlements: HashMap::new(),
            protected: HashSet::new(),
            rng: StdRng::seed_from_u64(seed),
            gravity: 0.08,
            next_id: 1,
        }
    }

    pub fn ground_level(&self) -> i32 {
        self.ground_level
    }

    pub fn put_block(&mut self, pos: IVec3, kind: BlockKind) {
        self.blocks.insert(pos, kind);
    }

    /// Fill the inclusive box between two corners.
    pub fn fill(&mut self, a: IVec3, b: IVec3, kind: BlockKind) {
        let (min, max) = (a.min(b), a.max(b));

        for x in min.x..=max.x {
            for y in min.y..=max.y {
                for z in min.z..=max.z {
                    self.blocks.insert(IVec3::new(x, y, z), kind);
                }
            }
        }
    }

    pub fn protect(&mut self, pos: IVec3) {
        self.protected.insert(pos);
    }

    pub fn add_settlement(&mut self, name: &str, bounds: Aabb) {
        self.settlements.insert(name.to_owned(), bounds);
    }

    /// Agents get sequential ids so test runs are reproducible.
    pub fn spawn(&mut self, position: DVec3, capability: Capability, hostile: bool) -> AgentId {
        let id = AgentId::from_u128(self.next_id);
        self.next_id += 1;

        self.agents.insert(id, SimAgent::new(position, capability, hostile));

        id
    }

    pub fn agent(&self, agent: AgentId) -> Option<&SimAgent> {
        self.agents.get(&agent)
    }

    pub fn agent_mut(&mut self, agent: AgentId) -> Option<&mut SimAgent> {
        self.agents.get_mut(&agent)
    }

    pub fn set_health(&mut self, agent: AgentId, current: f64) {
        if let Some(entry) = self.agents.get_mut(&agent) {
            entry.health.current = current.clamp(0.0, entry.health.max);
            if entry.health.current <= 0.0 {
                entry.alive = false;
            }
        }
    }

    pub fn kill(&mut self, agent: AgentId) {
        self.set_health(agent, 0.0);
    }

    pub fn begin_raid(&mut self, settlement: &str, now: u64) -> RaidId {
        let id = RaidId(uuid::Uuid::from_u128(self.next_id));
        self.next_id += 1;

        self.raids.insert(id, Raid::new(id, settlement, now));
        self.active_raids.insert(id);

        id
    }

    pub fn enlist(&mut self, raid: RaidId, agent: AgentId) {
        if let Some(entry) = self.raids.get_mut(&raid) {
            entry.members.insert(agent);
        }
    }

    /// Mark a raid over from the host side. The engine notices on its next pass.
    pub fn finish_raid(&mut self, raid: RaidId) {
        self.active_raids.remove(&raid);
    }

    fn blocks_body(&self, pos: DVec3) -> bool {
        let feet = block_of(pos);
        self.block(feet).is_solid() || self.block(feet + IVec3::Y).is_solid()
    }

    fn supports(&self, cell: IVec3) -> bool {
        let kind = self.block(cell);
        kind.is_solid() || kind.is_liquid()
    }

    fn advance_agent(&self, agent: &SimAgent) -> (DVec3, DVec3) {
        let pos = agent.position;
        let mut velocity = agent.velocity;

        let grounded = self.supports(block_of(pos - DVec3::new(0.0, 0.05, 0.0)));

        if grounded && velocity.y <= 0.0 {
            velocity.y = 0.0;
        } else {
            velocity.y -= self.gravity;
        }

        let mut next = DVec3::new(pos.x + velocity.x, pos.y, pos.z + velocity.z);

        if self.blocks_body(next) {
            next = pos;
            velocity.x = 0.0;
            velocity.z = 0.0;
        }

        next.y += velocity.y;

        if velocity.y < 0.0 && self.supports(block_of(next)) {
            next.y = next.y.floor() + 1.0;
            velocity.y = 0.0;
        } else if velocity.y > 0.0 && self.block(block_of(next) + IVec3::Y).is_solid() {
            next.y = pos.y;
            velocity.y = 0.0;
        }

        (next, velocity)
    }

    /// Move every living agent one tick.
    pub fn advance(&mut self) {
        let updates: Vec<(AgentId, DVec3, DVec3)> = self
            .agents
            .iter()
            .filter(|(_, agent)| agent.alive)
            .map(|(id, agent)| {
                let (pos, vel) = self.advance_agent(agent);
                (*id, pos, vel)
            })
            .collect();

        for (id, pos, vel) in updates {
            if let Some(agent) = self.agents.get_mut(&id) {
                agent.position = pos;
                agent.velocity = vel;

                let horizontal = DVec3::new(vel.x, 0.0, vel.z);
                if horizontal.length_squared() > 1e-9 {
                    agent.facing = horizontal.normalize();
                }
            }
        }
    }
}

impl AgentHost for SimWorld {
    fn is_alive(&self, agent: AgentId) -> bool {
        self.agents.get(&agent).map(|a| a.alive).unwrap_or(false)
    }

    fn position(&self, agent: AgentId) -> Option<DVec3> {
        self.agents.get(&agent).filter(|a| a.alive).map(|a| a.position)
    }

    fn velocity(&self, agent: AgentId) -> Option<DVec3> {
        self.agents.get(&agent).filter(|a| a.alive).map(|a| a.velocity)
    }

    fn set_velocity(&mut self, agent: AgentId, velocity: DVec3) {
        if let Some(entry) = self.agents.get_mut(&agent) {
            entry.velocity = velocity;
        }
    }

    fn facing(&self, agent: AgentId) -> Option<DVec3> {
        self.agents.get(&agent).map(|a| a.facing)
    }

    fn health(&self, agent: AgentId) -> Option<Health> {
        self.agents.get(&agent).map(|a| a.health)
    }

    fn capability(&self, agent: AgentId) -> Capability {
        self.agents.get(&agent).map(|a| a.capability).unwrap_or(Capability::MELEE)
    }

    fn attribute(&self, agent: AgentId, key: &AttrKey) -> Option<AttrValue> {
        self.agents.get(&agent).and_then(|a| a.attributes.get(key).cloned())
    }

    fn set_attribute(&mut self, agent: AgentId, key: AttrKey, value: AttrValue) {
        if let Some(entry) = self.agents.get_mut(&agent) {
            entry.attributes.insert(key, value);
        }
    }

    fn remove_attribute(&mut self, agent: AgentId, key: &AttrKey) {
        if let Some(entry) = self.agents.get_mut(&agent) {
            entry.attributes.remove(key);
        }
    }

    fn nearby_agents(&self, center: DVec3, radius: f64) -> Vec<AgentId> {
        self.agents
            .iter()
            .filter(|(_, a)| a.alive && a.position.distance(center) <= radius)
            .map(|(id, _)| *id)
            .collect()
    }

    fn is_hostile(&self, agent: AgentId) -> bool {
        self.agents.get(&agent).map(|a| a.hostile).unwrap_or(false)
    }

    fn target(&self, agent: AgentId) -> Option<AgentId> {
        self.agents.get(&agent).and_then(|a| a.target)
    }

    fn set_target(&mut self, agent: AgentId, target: Option<AgentId>) {
        if let Some(entry) = self.agents.get_mut(&agent) {
            entry.target = target;
        }
    }

    fn despawn(&mut self, agent: AgentId) {
        if let Some(entry) = self.agents.get_mut(&agent) {
            entry.alive = false;
        }

        for raid in self.raids.values_mut() {
            raid.members.remove(&agent);
        }

        trace!("Despawned {}", agent);
    }
}

impl BlockWorld for SimWorld {
    fn block(&self, pos: IVec3) -> BlockKind {
        match self.blocks.get(&pos) {
            Some(kind) => *kind,
            None if pos.y < self.ground_level => BlockKind::Stone,
            None => BlockKind::Air,
        }
    }

    fn set_block(&mut self, pos: IVec3, kind: BlockKind) -> bool {
        self.blocks.insert(pos, kind);
        true
    }
}

impl PlacementGate for SimWorld {
    fn may_modify(&self, _agent: AgentId, pos: IVec3, _kind: BlockKind) -> bool {
        !self.protected.contains(&pos)
    }
}

impl SettlementGeometry for SimWorld {
    fn settlement_contains(&self, settlement: &str, pos: DVec3) -> bool {
        self.settlements.get(settlement).map(|b| b.contains_horizontal(pos)).unwrap_or(false)
    }

    fn settlement_bounds(&self, settlement: &str) -> Option<Aabb> {
        self.settlements.get(settlement).copied()
    }

    fn settlement_border(&self, settlement: &str) -> Vec<DVec3> {
        let bounds = match self.settlements.get(settlement) {
            Some(bounds) => bounds,
            None => return Vec::new(),
        };

        let y = self.ground_level as f64;
        let mut samples = Vec::new();
        let mut x = bounds.min.x;

        while x <= bounds.max.x {
            samples.push(DVec3::new(x, y, bounds.min.z));
            samples.push(DVec3::new(x, y, bounds.max.z));
            x += 4.0;
        }

        let mut z = bounds.min.z;

        while z <= bounds.max.z {
            samples.push(DVec3::new(bounds.min.x, y, z));
            samples.push(DVec3::new(bounds.max.x, y, z));
            z += 4.0;
        }

        samples
    }

    fn random_safe_point(&mut self, settlement: &str) -> Option<DVec3> {
        let bounds = *self.settlements.get(settlement)?;

        let x = self.rng.random_range(bounds.min.x..=bounds.max.x);
        let z = self.rng.random_range(bounds.min.z..=bounds.max.z);

        Some(DVec3::new(x.floor() + 0.5, self.ground_level as f64, z.floor() + 0.5))
    }
}

impl RaidProvider for SimWorld {
    fn raid(&self, raid: RaidId) -> Option<&Raid> {
        self.raids.get(&raid)
    }

    fn raid_mut(&mut self, raid: RaidId) -> Option<&mut Raid> {
        self.raids.get_mut(&raid)
    }

    fn is_raid_active(&self, raid: RaidId) -> bool {
        self.active_raids.contains(&raid) && self.raids.contains_key(&raid)
    }

    fn raiders(&self, raid: RaidId) -> Vec<AgentId> {
        let mut members: Vec<AgentId> = match self.raids.get(&raid) {
            Some(entry) => entry.members.iter().copied().filter(|agent| self.is_alive(*agent)).collect(),
            None => Vec::new(),
        };

        members.sort();
        members
    }
}
