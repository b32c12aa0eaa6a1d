use crate::features::SquadFeatures;
use crate::host::{AgentId, Capability};
use crate::raid::RaidId;
use serde::{Deserialize, Serialize};
use shrinkwraprs::Shrinkwrap;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Shrinkwrap, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SquadId(pub Uuid);

impl SquadId {
    pub fn new_random() -> SquadId {
        SquadId(Uuid::new_v4())
    }
}

impl fmt::Display for SquadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Squad lifecycle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SquadState {
    /// Leader picked, members still being attached.
    #[default]
    Forming,
    /// Following the leader in formation.
    Active,
    /// Being folded into another squad.
    Merging,
    /// Torn down; members are being released.
    Disbanding,
}

/// Role a raider plays within its squad.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SquadRole {
    Leader,
    /// Armored front-liner.
    Tank,
    Ranged,
    /// Fast raider that goes for the loot.
    Looter,
    #[default]
    Member,
    /// Lone raider without a squad to follow.
    LoneWolf,
}

impl SquadRole {
    pub fn name(&self) -> &'static str {
        match self {
            SquadRole::Leader => "leader",
            SquadRole::Tank => "tank",
            SquadRole::Ranged => "ranged",
            SquadRole::Looter => "looter",
            SquadRole::Member => "member",
            SquadRole::LoneWolf => "lone_wolf",
        }
    }

    pub fn from_name(name: &str) -> Option<SquadRole> {
        match name {
            "leader" => Some(SquadRole::Leader),
            "tank" => Some(SquadRole::Tank),
            "ranged" => Some(SquadRole::Ranged),
            "looter" => Some(SquadRole::Looter),
            "member" => Some(SquadRole::Member),
            "lone_wolf" => Some(SquadRole::LoneWolf),
            _ => None,
        }
    }

    /// Role for a non-leader based on what the agent can do.
    pub fn for_capability(capability: Capability) -> SquadRole {
        if capability.contains(Capability::RANGED) {
            SquadRole::Ranged
        } else if capability.contains(Capability::FAST) {
            SquadRole::Looter
        } else if capability.contains(Capability::ARMORED) {
            SquadRole::Tank
        } else {
            SquadRole::Member
        }
    }

    /// Roles that fight rather than loot.
    pub fn is_combat(&self) -> bool {
        matches!(self, SquadRole::Leader | SquadRole::Tank | SquadRole::Ranged | SquadRole::Member)
    }

    /// Movement speed multiplier when catching up to formation.
    pub fn speed(&self, features: &SquadFeatures) -> f64 {
        match self {
            SquadRole::Leader => features.leader_speed,
            SquadRole::Tank => features.tank_speed,
            SquadRole::Ranged => features.ranged_speed,
            SquadRole::Looter => features.looter_speed,
            SquadRole::Member => features.member_speed,
            SquadRole::LoneWolf => features.lone_wolf_speed,
        }
    }
}

impl fmt::Display for SquadRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Formation shape followers hold relative to the leader.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormationKind {
    /// V-shaped stagger behind the leader.
    #[default]
    Arrow,
    /// Single file behind the leader.
    Line,
    /// Even ring around the leader, good for searching.
    Spread,
    /// Tanks in front, ranged behind, everyone else in the middle.
    Protected,
    /// Ring with per-slot jitter.
    Flexible,
}

// ─── Squad ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Squad {
    pub id: SquadId,
    /// Raid that owns the squad.
    pub raid: RaidId,
    pub leader: AgentId,
    /// Every member including the leader, with its role.
    members: BTreeMap<AgentId, SquadRole>,
    pub formation: FormationKind,
    pub state: SquadState,
    pub created_at: u64,
    /// Tick of the leader's last decision.
    pub last_decision: Option<u64>,
}

impl Squad {
    pub fn new(raid: RaidId, leader: AgentId, now: u64) -> Squad {
        Squad::with_role(raid, leader, SquadRole::Leader, now)
    }

    /// Single-member squad whose only member keeps `role` (used for lone wolves).
    pub fn with_role(raid: RaidId, leader: AgentId, role: SquadRole, now: u64) -> Squad {
        let mut members = BTreeMap::new();
        members.insert(leader, role);

        Squad {
            id: SquadId::new_random(),
            raid,
            leader,
            members,
            formation: FormationKind::default(),
            state: SquadState::Forming,
            created_at: now,
            last_decision: None,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_full(&self, max_size: usize) -> bool {
        self.members.len() >= max_size
    }

    pub fn contains(&self, agent: AgentId) -> bool {
        self.members.contains_key(&agent)
    }

    pub fn role_of(&self, agent: AgentId) -> Option<SquadRole> {
        self.members.get(&agent).copied()
    }

    pub fn add_member(&mut self, agent: AgentId, role: SquadRole) {
        self.members.insert(agent, role);
    }

    pub fn remove_member(&mut self, agent: AgentId) -> Option<SquadRole> {
        self.members.remove(&agent)
    }

    /// All members in id order, leader included.
    pub fn members(&self) -> impl Iterator<Item = (AgentId, SquadRole)> + '_ {
        self.members.iter().map(|(agent, role)| (*agent, *role))
    }

    pub fn member_ids(&self) -> Vec<AgentId> {
        self.members.keys().copied().collect()
    }

    /// Members other than the leader.
    pub fn followers(&self) -> Vec<(AgentId, SquadRole)> {
        self.members().filter(|(agent, _)| *agent != self.leader).collect()
    }

    pub fn with_role_of(&self, role: SquadRole) -> Vec<AgentId> {
        self.members().filter(|(_, r)| *r == role).map(|(agent, _)| agent).collect()
    }

    pub fn has_role(&self, role: SquadRole) -> bool {
        self.members.values().any(|r| *r == role)
    }

    /// Hand leadership to another member. The old leader becomes a plain member.
    pub fn promote(&mut self, agent: AgentId) -> bool {
        if !self.members.contains_key(&agent) {
            return false;
        }

        if agent != self.leader {
            if let Some(old) = self.members.get_mut(&self.leader) {
                *old = SquadRole::Member;
            }
        }

        self.members.insert(agent, SquadRole::Leader);
        self.leader = agent;
        true
    }

    pub fn is_disbanding(&self) -> bool {
        self.state == SquadState::Disbanding
    }
}
