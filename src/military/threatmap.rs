use super::memory::RaiderMemory;
use crate::features::ThreatFeatures;
use crate::host::{attributes, hostiles_near, AgentId, Capability, Host};
use glam::DVec3;
use itertools::Itertools;
use lerp::*;
use serde::{Deserialize, Serialize};

/// Scored view of a single hostile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreatInfo {
    pub agent: AgentId,
    pub position: DVec3,
    /// Higher is more dangerous.
    pub score: f64,
    pub health_fraction: f64,
    /// Whether the hostile is currently attacking a raider.
    pub targeting_raider: bool,
}

pub struct ThreatAssessor<'a> {
    features: &'a ThreatFeatures,
}

impl<'a> ThreatAssessor<'a> {
    pub fn new(features: &'a ThreatFeatures) -> ThreatAssessor<'a> {
        ThreatAssessor { features }
    }

    fn base_danger(&self, capability: Capability) -> f64 {
        if capability.contains(Capability::RANGED) {
            self.features.ranged_danger
        } else if capability.contains(Capability::ARMORED) {
            self.features.armored_danger
        } else {
            self.features.melee_danger
        }
    }

    /// Score one hostile as seen from `reference`.
    pub fn assess(&self, host: &dyn Host, memory: &RaiderMemory, settlement: &str, threat: AgentId, reference: DVec3) -> Option<ThreatInfo> {
        if !host.is_alive(threat) {
            return None;
        }

        let position = host.position(threat)?;
        let health_fraction = host.health(threat).map(|h| h.fraction()).unwrap_or(1.0);

        // Health only scales the upper half of the base danger.
        let mut score = self.base_danger(host.capability(threat)) * 0.5f64.lerp_bounded(1.0, health_fraction);

        if self.features.proximity_radius > 0.0 {
            let closeness = 1.0 - position.distance(reference) / self.features.proximity_radius;
            score += 0.0f64.lerp_bounded(self.features.proximity_bonus, closeness);
        }

        let targeting_raider = host
            .target(threat)
            .map(|target| attributes::is_raider(host, target))
            .unwrap_or(false);

        if targeting_raider {
            score += self.features.targeting_raider_bonus;
        }

        if memory.is_dangerous(settlement, position) {
            score += self.features.danger_zone_bonus;
        }

        Some(ThreatInfo {
            agent: threat,
            position,
            score,
            health_fraction,
            targeting_raider,
        })
    }

    /// Living hostiles within `radius`, in id order.
    pub fn threats_near(&self, host: &dyn Host, center: DVec3, radius: f64) -> Vec<AgentId> {
        hostiles_near(host, center, radius).into_iter().sorted().collect()
    }

    /// Hostiles around `center`, most dangerous first. Equal scores fall back
    /// to id order so rankings are stable.
    pub fn rank_threats(&self, host: &dyn Host, memory: &RaiderMemory, settlement: &str, center: DVec3, radius: f64) -> Vec<ThreatInfo> {
        self.threats_near(host, center, radius)
            .into_iter()
            .filter_map(|threat| self.assess(host, memory, settlement, threat, center))
            .sorted_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.agent.cmp(&b.agent)))
            .collect()
    }

    pub fn priority_target(&self, host: &dyn Host, memory: &RaiderMemory, settlement: &str, center: DVec3, radius: f64) -> Option<ThreatInfo> {
        self.rank_threats(host, memory, settlement, center, radius).into_iter().next()
    }

    /// Mean direction from `from` toward the given threats, if any.
    pub fn threat_direction(threats: &[ThreatInfo], from: DVec3) -> Option<DVec3> {
        if threats.is_empty() {
            return None;
        }

        let sum = threats
            .iter()
            .fold(DVec3::ZERO, |acc, t| acc + crate::geometry::flatten(t.position - from).normalize_or_zero());

        if sum.length_squared() < 1e-9 {
            None
        } else {
            Some(sum.normalize())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::MemoryFeatures;
    use crate::host::AgentHost;
    use crate::raid::RaidId;
    use crate::sim::SimWorld;

    #[test]
    fn priority_target_prefers_whoever_is_hitting_a_raider() {
        let mut world = SimWorld::flat(64, 5);
        let features = ThreatFeatures::default();
        let memory = RaiderMemory::new(&MemoryFeatures::default());
        let assessor = ThreatAssessor::new(&features);

        let origin = DVec3::new(0.5, 64.0, 0.5);
        let raider = world.spawn(origin, Capability::MELEE, false);
        attributes::mark_raider(&mut world, raider, RaidId::new_random());

        let brute = world.spawn(DVec3::new(8.5, 64.0, 0.5), Capability::MELEE, true);
        let archer = world.spawn(DVec3::new(-7.5, 64.0, 0.5), Capability::RANGED, true);
        world.spawn(DVec3::new(40.5, 64.0, 0.5), Capability::RANGED, true);

        world.set_target(brute, Some(raider));

        let ranked = assessor.rank_threats(&world, &memory, "Ashford", origin, 20.0);
        assert_eq!(ranked.len(), 2);

        let first = assessor.priority_target(&world, &memory, "Ashford", origin, 20.0).unwrap();
        assert_eq!(first.agent, brute);
        assert!(first.targeting_raider);
        assert_eq!(ranked[0], first);

        world.set_target(archer, Some(raider));

        let first = assessor.priority_target(&world, &memory, "Ashford", origin, 20.0).unwrap();
        assert_eq!(first.agent, archer);

        assert_eq!(assessor.priority_target(&world, &memory, "Ashford", DVec3::new(0.5, 64.0, 100.5), 5.0), None);
    }

    #[test]
    fn opposing_threats_have_no_direction() {
        let make = |x: f64| ThreatInfo {
            agent: AgentId::from_u128(x as u128),
            position: DVec3::new(x, 64.0, 0.0),
            score: 1.0,
            health_fraction: 1.0,
            targeting_raider: false,
        };

        let from = DVec3::new(0.0, 64.0, 0.0);

        assert_eq!(ThreatAssessor::threat_direction(&[], from), None);
        assert_eq!(ThreatAssessor::threat_direction(&[make(5.0)], from), Some(DVec3::X));
        assert_eq!(ThreatAssessor::threat_direction(&[make(5.0), make(-5.0)], from), None);
    }
}
