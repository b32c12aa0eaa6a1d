//! Spatial memory raiders keep about each settlement across raids: where
//! loot was found, where raiders got hurt, and where they got out.

use crate::features::MemoryFeatures;
use crate::serialize::{decode_from_string, encode_to_string};
use glam::DVec3;
use itertools::Itertools;
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpotKind {
    Chest,
    /// Valuable block worth breaking.
    Valuable,
    Danger,
    Exit,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TownMemory {
    pub chest_spots: Vec<DVec3>,
    pub valuable_spots: Vec<DVec3>,
    pub danger_spots: Vec<DVec3>,
    pub exit_spots: Vec<DVec3>,
}

impl TownMemory {
    fn spots_mut(&mut self, kind: SpotKind) -> &mut Vec<DVec3> {
        match kind {
            SpotKind::Chest => &mut self.chest_spots,
            SpotKind::Valuable => &mut self.valuable_spots,
            SpotKind::Danger => &mut self.danger_spots,
            SpotKind::Exit => &mut self.exit_spots,
        }
    }

    pub fn spots(&self, kind: SpotKind) -> &[DVec3] {
        match kind {
            SpotKind::Chest => &self.chest_spots,
            SpotKind::Valuable => &self.valuable_spots,
            SpotKind::Danger => &self.danger_spots,
            SpotKind::Exit => &self.exit_spots,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chest_spots.is_empty() && self.valuable_spots.is_empty() && self.danger_spots.is_empty() && self.exit_spots.is_empty()
    }
}

pub struct RaiderMemory {
    towns: HashMap<String, TownMemory>,
    features: MemoryFeatures,
}

impl RaiderMemory {
    pub fn new(features: &MemoryFeatures) -> RaiderMemory {
        RaiderMemory {
            towns: HashMap::new(),
            features: features.clone(),
        }
    }

    pub fn town(&self, settlement: &str) -> Option<&TownMemory> {
        self.towns.get(settlement)
    }

    /// Remember a spot unless an equivalent one is already known. When the
    /// list is full the oldest entry is dropped.
    pub fn record(&mut self, settlement: &str, kind: SpotKind, pos: DVec3) -> bool {
        let dedup_radius = self.features.dedup_radius;
        let max_spots = self.features.max_spots.max(1);

        let spots = self.towns.entry(settlement.to_owned()).or_default().spots_mut(kind);

        if spots.iter().any(|spot| spot.distance(pos) < dedup_radius) {
            return false;
        }

        if spots.len() >= max_spots {
            spots.remove(0);
        }

        spots.push(pos);

        debug!("Remembered {:?} spot at {} in {}", kind, pos, settlement);

        true
    }

    pub fn record_chest(&mut self, settlement: &str, pos: DVec3) -> bool {
        self.record(settlement, SpotKind::Chest, pos)
    }

    pub fn record_valuable(&mut self, settlement: &str, pos: DVec3) -> bool {
        self.record(settlement, SpotKind::Valuable, pos)
    }

    pub fn record_danger(&mut self, settlement: &str, pos: DVec3) -> bool {
        self.record(settlement, SpotKind::Danger, pos)
    }

    pub fn record_exit(&mut self, settlement: &str, pos: DVec3) -> bool {
        self.record(settlement, SpotKind::Exit, pos)
    }

    pub fn is_dangerous(&self, settlement: &str, pos: DVec3) -> bool {
        self.towns
            .get(settlement)
            .map(|town| town.danger_spots.iter().any(|spot| spot.distance(pos) <= self.features.danger_radius))
            .unwrap_or(false)
    }

    /// Closest remembered chest or valuable spot that is not known to be dangerous.
    pub fn best_loot_spot(&self, settlement: &str, from: DVec3) -> Option<DVec3> {
        let town = self.towns.get(settlement)?;

        town.chest_spots
            .iter()
            .chain(town.valuable_spots.iter())
            .filter(|spot| !self.is_dangerous(settlement, **spot))
            .copied()
            .min_by(|a, b| a.distance(from).total_cmp(&b.distance(from)))
    }

    /// Closest remembered exit.
    pub fn nearest_exit(&self, settlement: &str, from: DVec3) -> Option<DVec3> {
        self.towns
            .get(settlement)?
            .exit_spots
            .iter()
            .copied()
            .min_by(|a, b| a.distance(from).total_cmp(&b.distance(from)))
    }

    pub fn forget(&mut self, settlement: &str) -> bool {
        self.towns.remove(settlement).is_some()
    }

    pub fn settlements(&self) -> Vec<&str> {
        self.towns.keys().map(|name| name.as_str()).sorted().collect()
    }

    /// Snapshot of everything remembered, as a compact string.
    pub fn export(&self) -> Result<String, String> {
        encode_to_string(&self.towns)
    }

    /// Replace memory with a snapshot. On failure the current memory is kept.
    pub fn import(&mut self, data: &str) -> Result<usize, String> {
        let towns: HashMap<String, TownMemory> = decode_from_string(data)?;
        let count = towns.len();

        self.towns = towns;

        info!("Imported raider memory for {} settlements", count);

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> RaiderMemory {
        RaiderMemory::new(&MemoryFeatures::default())
    }

    #[test]
    fn nearby_spots_are_deduplicated() {
        let mut memory = memory();

        assert!(memory.record_chest("Ashford", DVec3::new(0.0, 64.0, 0.0)));
        assert!(!memory.record_chest("Ashford", DVec3::new(2.0, 64.0, 0.0)));
        assert!(memory.record_chest("Ashford", DVec3::new(5.0, 64.0, 0.0)));
        assert!(memory.record_chest("Briarwood", DVec3::new(0.0, 64.0, 0.0)));

        assert_eq!(memory.town("Ashford").map(|t| t.chest_spots.len()), Some(2));
    }

    #[test]
    fn full_lists_drop_the_oldest_spot() {
        let mut memory = RaiderMemory::new(&MemoryFeatures {
            max_spots: 2,
            ..MemoryFeatures::default()
        });

        for i in 0..3 {
            memory.record_danger("Ashford", DVec3::new(i as f64 * 10.0, 64.0, 0.0));
        }

        assert_eq!(
            memory.town("Ashford").unwrap().danger_spots,
            vec![DVec3::new(10.0, 64.0, 0.0), DVec3::new(20.0, 64.0, 0.0)]
        );
    }

    #[test]
    fn best_loot_skips_dangerous_spots() {
        let mut memory = memory();

        memory.record_chest("Ashford", DVec3::new(2.0, 64.0, 0.0));
        memory.record_valuable("Ashford", DVec3::new(20.0, 64.0, 0.0));
        memory.record_danger("Ashford", DVec3::new(3.0, 64.0, 0.0));

        assert_eq!(memory.best_loot_spot("Ashford", DVec3::ZERO), Some(DVec3::new(20.0, 64.0, 0.0)));
        assert_eq!(memory.best_loot_spot("Nowhere", DVec3::ZERO), None);
    }

    #[test]
    fn export_and_import_restore_memory() {
        let mut memory = memory();
        memory.record_chest("Ashford", DVec3::new(1.0, 64.0, 1.0));
        memory.record_exit("Ashford", DVec3::new(40.0, 64.0, 0.0));

        let snapshot = memory.export().unwrap();

        let mut restored = RaiderMemory::new(&MemoryFeatures::default());
        assert_eq!(restored.import(&snapshot), Ok(1));
        assert_eq!(restored.nearest_exit("Ashford", DVec3::ZERO), Some(DVec3::new(40.0, 64.0, 0.0)));

        assert!(restored.import("definitely not a snapshot").is_err());
        assert_eq!(restored.settlements(), vec!["Ashford"]);
    }
}
