use crate::host::AgentId;
use glam::DVec3;
use serde::{Deserialize, Serialize};
use shrinkwraprs::Shrinkwrap;
use std::collections::{HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

#[derive(Shrinkwrap, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RaidId(pub Uuid);

impl RaidId {
    pub fn new_random() -> RaidId {
        RaidId(Uuid::new_v4())
    }
}

impl fmt::Display for RaidId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Known metadata slots on a raid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RaidMetaKey {
    /// Shared exit loot carriers head for.
    ExtractionPoint,
    /// Points of interest for looters.
    LootLocations,
    ExitPoints,
    /// Spots where raiders were hurt, shared across the squad.
    DangerPoints,
    /// Raiders that escaped with loot.
    Extracted,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RaidMeta {
    Location(DVec3),
    Locations(Vec<DVec3>),
    Counter(u32),
    Flag(bool),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Raid {
    pub id: RaidId,
    pub settlement: String,
    pub started_at: u64,
    pub stolen_items: u32,
    pub members: HashSet<AgentId>,
    pub anchor: Option<DVec3>,
    meta: HashMap<RaidMetaKey, RaidMeta>,
    /// Extension point for annotations the engine does not know about.
    pub extra: HashMap<String, RaidMeta>,
}

impl Raid {
    pub fn new(id: RaidId, settlement: &str, started_at: u64) -> Raid {
        Raid {
            id,
            settlement: settlement.to_owned(),
            started_at,
            stolen_items: 0,
            members: HashSet::new(),
            anchor: None,
            meta: HashMap::new(),
            extra: HashMap::new(),
        }
    }

    pub fn meta(&self, key: RaidMetaKey) -> Option<&RaidMeta> {
        self.meta.get(&key)
    }

    pub fn set_meta(&mut self, key: RaidMetaKey, value: RaidMeta) {
        self.meta.insert(key, value);
    }

    pub fn extraction_point(&self) -> Option<DVec3> {
        match self.meta.get(&RaidMetaKey::ExtractionPoint) {
            Some(RaidMeta::Location(pos)) => Some(*pos),
            _ => None,
        }
    }

    pub fn set_extraction_point(&mut self, pos: DVec3) {
        self.meta.insert(RaidMetaKey::ExtractionPoint, RaidMeta::Location(pos));
    }

    pub fn locations(&self, key: RaidMetaKey) -> &[DVec3] {
        match self.meta.get(&key) {
            Some(RaidMeta::Locations(list)) => list,
            _ => &[],
        }
    }

    /// Append a location unless one already sits within `dedup_radius`.
    /// Returns whether the list changed.
    pub fn push_location(&mut self, key: RaidMetaKey, pos: DVec3, dedup_radius: f64) -> bool {
        let entry = self.meta.entry(key).or_insert_with(|| RaidMeta::Locations(Vec::new()));

        if !matches!(entry, RaidMeta::Locations(_)) {
            *entry = RaidMeta::Locations(Vec::new());
        }

        match entry {
            RaidMeta::Locations(list) => {
                if list.iter().any(|existing| existing.distance(pos) < dedup_radius) {
                    false
                } else {
                    list.push(pos);
                    true
                }
            }
            _ => false,
        }
    }

    pub fn counter(&self, key: RaidMetaKey) -> u32 {
        match self.meta.get(&key) {
            Some(RaidMeta::Counter(value)) => *value,
            _ => 0,
        }
    }

    pub fn increment_counter(&mut self, key: RaidMetaKey) -> u32 {
        let next = self.counter(key) + 1;
        self.meta.insert(key, RaidMeta::Counter(next));
        next
    }

    pub fn quota_met(&self, quota: u32) -> bool {
        self.stolen_items >= quota
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locations_are_deduplicated_by_proximity() {
        let mut raid = Raid::new(RaidId::new_random(), "Ashford", 0);

        assert!(raid.push_location(RaidMetaKey::LootLocations, DVec3::new(0.0, 64.0, 0.0), 4.0));
        assert!(!raid.push_location(RaidMetaKey::LootLocations, DVec3::new(1.0, 64.0, 1.0), 4.0));
        assert!(raid.push_location(RaidMetaKey::LootLocations, DVec3::new(10.0, 64.0, 0.0), 4.0));

        assert_eq!(raid.locations(RaidMetaKey::LootLocations).len(), 2);
        assert!(raid.locations(RaidMetaKey::DangerPoints).is_empty());
    }

    #[test]
    fn counters_start_at_zero() {
        let mut raid = Raid::new(RaidId::new_random(), "Ashford", 0);

        assert_eq!(raid.counter(RaidMetaKey::Extracted), 0);
        assert_eq!(raid.increment_counter(RaidMetaKey::Extracted), 1);
        assert_eq!(raid.increment_counter(RaidMetaKey::Extracted), 2);
    }
}
