//! Interfaces to the host simulation. The engine never owns agents, blocks,
//! settlements or raids; it reads and annotates them through these traits.

pub mod attributes;

pub use attributes::{AttrKey, AttrValue};

use crate::geometry::Aabb;
use crate::pathing::hazards::BlockKind;
use crate::raid::{Raid, RaidId};
use bitflags::bitflags;
use glam::{DVec3, IVec3};
use serde::{Deserialize, Serialize};
use shrinkwraprs::Shrinkwrap;
use std::fmt;
use uuid::Uuid;

/// Stable identifier of a living entity in the world.
#[derive(Shrinkwrap, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new_random() -> AgentId {
        AgentId(Uuid::new_v4())
    }

    pub fn from_u128(value: u128) -> AgentId {
        AgentId(Uuid::from_u128(value))
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// What kind of fighter an agent is. Drives role assignment.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Capability: u8 {
        const MELEE = 0b0001;
        const RANGED = 0b0010;
        /// Light, quick variant of a melee type.
        const FAST = 0b0100;
        /// Heavy, armored variant of a melee type.
        const ARMORED = 0b1000;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Health {
    pub current: f64,
    pub max: f64,
}

impl Health {
    pub fn new(current: f64, max: f64) -> Health {
        Health { current, max }
    }

    pub fn fraction(&self) -> f64 {
        if self.max <= 0.0 {
            0.0
        } else {
            (self.current / self.max).clamp(0.0, 1.0)
        }
    }
}

/// Agent access: spawn state, kinematics, attributes, targeting.
pub trait AgentHost {
    fn is_alive(&self, agent: AgentId) -> bool;

    fn position(&self, agent: AgentId) -> Option<DVec3>;

    fn velocity(&self, agent: AgentId) -> Option<DVec3>;

    fn set_velocity(&mut self, agent: AgentId, velocity: DVec3);

    /// Horizontal unit vector the agent is facing.
    fn facing(&self, agent: AgentId) -> Option<DVec3>;

    fn health(&self, agent: AgentId) -> Option<Health>;

    fn capability(&self, agent: AgentId) -> Capability;

    fn attribute(&self, agent: AgentId, key: &AttrKey) -> Option<AttrValue>;

    fn set_attribute(&mut self, agent: AgentId, key: AttrKey, value: AttrValue);

    fn remove_attribute(&mut self, agent: AgentId, key: &AttrKey);

    /// All living agents within `radius` of `center`, in no particular order.
    fn nearby_agents(&self, center: DVec3, radius: f64) -> Vec<AgentId>;

    /// Whether the agent is a defender or player the raiders should fight.
    fn is_hostile(&self, agent: AgentId) -> bool;

    fn target(&self, agent: AgentId) -> Option<AgentId>;

    fn set_target(&mut self, agent: AgentId, target: Option<AgentId>);

    fn despawn(&mut self, agent: AgentId);
}

/// Voxel queries and mutation.
pub trait BlockWorld {
    fn block(&self, pos: IVec3) -> BlockKind;

    fn is_solid(&self, pos: IVec3) -> bool {
        self.block(pos).is_solid()
    }

    /// Returns false if the host refused or could not apply the change.
    fn set_block(&mut self, pos: IVec3, kind: BlockKind) -> bool;
}

/// External permission check for block changes made by raiders.
pub trait PlacementGate {
    fn may_modify(&self, agent: AgentId, pos: IVec3, kind: BlockKind) -> bool;
}

pub trait SettlementGeometry {
    fn settlement_contains(&self, settlement: &str, pos: DVec3) -> bool;

    fn settlement_bounds(&self, settlement: &str) -> Option<Aabb>;

    /// Sample points along the settlement border.
    fn settlement_border(&self, settlement: &str) -> Vec<DVec3>;

    fn random_safe_point(&mut self, settlement: &str) -> Option<DVec3>;
}

pub trait RaidProvider {
    fn raid(&self, raid: RaidId) -> Option<&Raid>;

    fn raid_mut(&mut self, raid: RaidId) -> Option<&mut Raid>;

    fn is_raid_active(&self, raid: RaidId) -> bool;

    /// Living agents that belong to the raid.
    fn raiders(&self, raid: RaidId) -> Vec<AgentId>;
}

/// Everything the engine needs from the host in one object.
pub trait Host: AgentHost + BlockWorld + PlacementGate + SettlementGeometry + RaidProvider {}

impl<T> Host for T where T: AgentHost + BlockWorld + PlacementGate + SettlementGeometry + RaidProvider + ?Sized {}

/// Health fraction, treating unknown agents as dead.
pub fn health_fraction(host: &dyn Host, agent: AgentId) -> f64 {
    host.health(agent).map(|h| h.fraction()).unwrap_or(0.0)
}

/// Living hostile agents around a point.
pub fn hostiles_near(host: &dyn Host, center: DVec3, radius: f64) -> Vec<AgentId> {
    host.nearby_agents(center, radius)
        .into_iter()
        .filter(|agent| host.is_alive(*agent) && host.is_hostile(*agent))
        .collect()
}
