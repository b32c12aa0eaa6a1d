//! Typed view over the namespaced per-agent attribute store. Every key the
//! engine writes lives under the `raid` namespace so that cleanup can strip
//! them without touching anything else the host keeps on the agent.

use super::{AgentHost, AgentId};
use crate::military::squad::{SquadId, SquadRole};
use crate::raid::RaidId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const NAMESPACE: &str = "raid";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrKey {
    /// Raid the agent belongs to.
    Raider,
    Squad,
    Role,
    Retreating,
    Intelligence,
    LootCarrier,
    /// Open-ended annotations owned by the host or extensions.
    Custom(String),
}

impl AttrKey {
    pub fn name(&self) -> &str {
        match self {
            AttrKey::Raider => "raider",
            AttrKey::Squad => "squad",
            AttrKey::Role => "role",
            AttrKey::Retreating => "retreating",
            AttrKey::Intelligence => "intelligence",
            AttrKey::LootCarrier => "loot_carrier",
            AttrKey::Custom(name) => name,
        }
    }
}

impl fmt::Display for AttrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", NAMESPACE, self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Flag(bool),
    Int(i64),
    Id(Uuid),
    Text(String),
}

impl AttrValue {
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            AttrValue::Flag(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<Uuid> {
        match self {
            AttrValue::Id(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

fn flag<H: AgentHost + ?Sized>(host: &H, agent: AgentId, key: &AttrKey) -> bool {
    host.attribute(agent, key).and_then(|v| v.as_flag()).unwrap_or(false)
}

pub fn raid_of<H: AgentHost + ?Sized>(host: &H, agent: AgentId) -> Option<RaidId> {
    host.attribute(agent, &AttrKey::Raider).and_then(|v| v.as_id()).map(RaidId)
}

pub fn mark_raider<H: AgentHost + ?Sized>(host: &mut H, agent: AgentId, raid: RaidId) {
    host.set_attribute(agent, AttrKey::Raider, AttrValue::Id(raid.0));
}

pub fn is_raider<H: AgentHost + ?Sized>(host: &H, agent: AgentId) -> bool {
    raid_of(host, agent).is_some()
}

pub fn squad_of<H: AgentHost + ?Sized>(host: &H, agent: AgentId) -> Option<SquadId> {
    host.attribute(agent, &AttrKey::Squad).and_then(|v| v.as_id()).map(SquadId)
}

pub fn role_of<H: AgentHost + ?Sized>(host: &H, agent: AgentId) -> Option<SquadRole> {
    host.attribute(agent, &AttrKey::Role)
        .and_then(|v| v.as_text().and_then(SquadRole::from_name))
}

pub fn set_membership<H: AgentHost + ?Sized>(host: &mut H, agent: AgentId, squad: SquadId, role: SquadRole) {
    host.set_attribute(agent, AttrKey::Squad, AttrValue::Id(squad.0));
    host.set_attribute(agent, AttrKey::Role, AttrValue::Text(role.name().to_owned()));
}

pub fn clear_membership<H: AgentHost + ?Sized>(host: &mut H, agent: AgentId) {
    host.remove_attribute(agent, &AttrKey::Squad);
    host.remove_attribute(agent, &AttrKey::Role);
}

pub fn is_retreating<H: AgentHost + ?Sized>(host: &H, agent: AgentId) -> bool {
    flag(host, agent, &AttrKey::Retreating)
}

pub fn set_retreating<H: AgentHost + ?Sized>(host: &mut H, agent: AgentId, retreating: bool) {
    if retreating {
        host.set_attribute(agent, AttrKey::Retreating, AttrValue::Flag(true));
    } else {
        host.remove_attribute(agent, &AttrKey::Retreating);
    }
}

/// Intelligence tier, falling back to `default_tier` for unannotated agents.
pub fn intelligence<H: AgentHost + ?Sized>(host: &H, agent: AgentId, default_tier: u8) -> u8 {
    host.attribute(agent, &AttrKey::Intelligence)
        .and_then(|v| v.as_int())
        .map(|v| v.clamp(0, u8::MAX as i64) as u8)
        .unwrap_or(default_tier)
}

pub fn set_intelligence<H: AgentHost + ?Sized>(host: &mut H, agent: AgentId, tier: u8) {
    host.set_attribute(agent, AttrKey::Intelligence, AttrValue::Int(tier as i64));
}

pub fn is_loot_carrier<H: AgentHost + ?Sized>(host: &H, agent: AgentId) -> bool {
    flag(host, agent, &AttrKey::LootCarrier)
}

pub fn set_loot_carrier<H: AgentHost + ?Sized>(host: &mut H, agent: AgentId, carrying: bool) {
    if carrying {
        host.set_attribute(agent, AttrKey::LootCarrier, AttrValue::Flag(true));
    } else {
        host.remove_attribute(agent, &AttrKey::LootCarrier);
    }
}

/// Strip every engine-owned attribute except the intelligence tier, which the
/// host assigns at spawn.
pub fn clear_raid_tags<H: AgentHost + ?Sized>(host: &mut H, agent: AgentId) {
    for key in [AttrKey::Raider, AttrKey::Squad, AttrKey::Role, AttrKey::Retreating, AttrKey::LootCarrier] {
        host.remove_attribute(agent, &key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(AttrKey::Squad.to_string(), "raid:squad");
        assert_eq!(AttrKey::Custom("banner".to_owned()).to_string(), "raid:banner");
    }

    #[test]
    fn value_accessors_reject_other_variants() {
        assert_eq!(AttrValue::Int(3).as_int(), Some(3));
        assert_eq!(AttrValue::Int(3).as_flag(), None);
        assert_eq!(AttrValue::Text("tank".to_owned()).as_text(), Some("tank"));
    }
}
