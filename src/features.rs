//! Read-only tunables. The host hands these over once (usually parsed from a
//! JSON blob) and the engine never mutates them.

use crate::pathing::hazards::BlockKind;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RaidFeatures {
    pub pathing: PathingFeatures,
    pub obstacles: ObstacleFeatures,
    pub intelligence: IntelligenceFeatures,
    pub squads: SquadFeatures,
    pub formation: FormationFeatures,
    pub tactics: TacticsFeatures,
    pub leader: LeaderFeatures,
    pub retreat: RetreatFeatures,
    pub threat: ThreatFeatures,
    pub memory: MemoryFeatures,
    pub scheduler: SchedulerFeatures,
}

impl RaidFeatures {
    pub fn from_json(data: &str) -> Result<RaidFeatures, String> {
        serde_json::from_str(data).map_err(|e| e.to_string())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PathingFeatures {
    /// Hard ceiling on node expansions per search.
    pub max_iterations: u32,
    /// Hard ceiling on accumulated path cost per search.
    pub max_path_cost: f64,
    pub difficult_terrain_multiplier: f64,
    pub vertical_step_multiplier: f64,
    /// Consecutive direction vectors with a dot product above this are merged.
    pub simplify_dot_threshold: f64,
    pub goal_tolerance: f64,
    /// Squared distance the goal may drift before the path is recomputed.
    pub recompute_distance_sq: f64,
    pub recompute_interval: u64,
    pub arrival_radius: f64,
    /// Blocks per tick at a speed multiplier of 1.0.
    pub base_speed: f64,
    pub jump_velocity: f64,
    pub stuck_check_period: u64,
    /// Movement below this between two checks counts as "not moving".
    pub stuck_distance: f64,
    pub stuck_checks: u32,
    pub stuck_push_delay: u64,
    pub push_strength: f64,
    pub hazards: Vec<BlockKind>,
}

impl Default for PathingFeatures {
    fn default() -> Self {
        PathingFeatures {
            max_iterations: 2000,
            max_path_cost: 256.0,
            difficult_terrain_multiplier: 1.5,
            vertical_step_multiplier: 1.2,
            simplify_dot_threshold: 0.95,
            goal_tolerance: 1.0,
            recompute_distance_sq: 4.0,
            recompute_interval: 40,
            arrival_radius: 0.8,
            base_speed: 0.25,
            jump_velocity: 0.42,
            stuck_check_period: 10,
            stuck_distance: 0.15,
            stuck_checks: 3,
            stuck_push_delay: 10,
            push_strength: 0.35,
            hazards: BlockKind::default_hazards().to_vec(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ObstacleFeatures {
    pub cobweb_clear_chance: f64,
    /// Half-width of the cube scanned around a stuck agent.
    pub scan_radius: i32,
    pub bridge_block: BlockKind,
    pub avoid_strength: f64,
}

impl Default for ObstacleFeatures {
    fn default() -> Self {
        ObstacleFeatures {
            cobweb_clear_chance: 0.6,
            scan_radius: 1,
            bridge_block: BlockKind::Cobblestone,
            avoid_strength: 0.3,
        }
    }
}

/// Minimum intelligence tier per capability.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IntelligenceFeatures {
    pub default_tier: u8,
    pub clear_cobweb: u8,
    pub bridge_liquid: u8,
    pub clear_plants: u8,
    pub extinguish_fire: u8,
    pub open_doors: u8,
    pub redirect_leader: u8,
    pub tactical_decisions: u8,
    pub single_threat_decisions: u8,
}

impl Default for IntelligenceFeatures {
    fn default() -> Self {
        IntelligenceFeatures {
            default_tier: 1,
            clear_cobweb: 2,
            bridge_liquid: 3,
            clear_plants: 2,
            extinguish_fire: 3,
            open_doors: 2,
            redirect_leader: 2,
            tactical_decisions: 3,
            single_threat_decisions: 2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SquadFeatures {
    pub max_leaders: usize,
    pub max_squad_size: usize,
    pub attach_radius: f64,
    pub update_period: u64,
    /// Members farther than this from their slot are sent back to it.
    pub slot_threshold: f64,
    pub leader_speed: f64,
    pub tank_speed: f64,
    pub ranged_speed: f64,
    pub looter_speed: f64,
    pub member_speed: f64,
    pub lone_wolf_speed: f64,
    pub looter_retreat_chance: f64,
}

impl Default for SquadFeatures {
    fn default() -> Self {
        SquadFeatures {
            max_leaders: 5,
            max_squad_size: 5,
            attach_radius: 16.0,
            update_period: 20,
            slot_threshold: 2.0,
            leader_speed: 1.0,
            tank_speed: 0.8,
            ranged_speed: 0.95,
            looter_speed: 1.1,
            member_speed: 1.0,
            lone_wolf_speed: 1.25,
            looter_retreat_chance: 0.5,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FormationFeatures {
    pub spacing: f64,
    pub spread_radius: f64,
    pub flexible_radius: f64,
    pub flexible_jitter: f64,
}

impl Default for FormationFeatures {
    fn default() -> Self {
        FormationFeatures {
            spacing: 2.5,
            spread_radius: 4.0,
            flexible_radius: 3.5,
            flexible_jitter: 1.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TacticsFeatures {
    pub cooldown: u64,
    pub surround_radius: f64,
    pub surround_acquire_delay: u64,
    pub ambush_trigger_radius: f64,
    pub ambush_hide_radius: f64,
    pub ambush_bait_stray: f64,
    pub ambush_watch_period: u64,
    pub ambush_timeout: u64,
    pub leapfrog_cadence: u64,
    pub leapfrog_step: f64,
    pub leapfrog_arrival: f64,
    pub leapfrog_timeout: u64,
    pub feint_distance: f64,
    pub feint_delay: u64,
    pub feint_reacquire_radius: f64,
    pub hunt_period: u64,
    pub hunt_trail_distance: f64,
    pub hunt_flank_distance: f64,
    pub hunt_surround_quadrants: usize,
    pub hunt_quadrant_radius: f64,
    pub hunt_timeout: u64,
    pub flank_distance: f64,
    pub engage_speed: f64,
}

impl Default for TacticsFeatures {
    fn default() -> Self {
        TacticsFeatures {
            cooldown: 200,
            surround_radius: 5.0,
            surround_acquire_delay: 40,
            ambush_trigger_radius: 6.0,
            ambush_hide_radius: 3.0,
            ambush_bait_stray: 24.0,
            ambush_watch_period: 10,
            ambush_timeout: 600,
            leapfrog_cadence: 40,
            leapfrog_step: 6.0,
            leapfrog_arrival: 3.0,
            leapfrog_timeout: 1200,
            feint_distance: 12.0,
            feint_delay: 60,
            feint_reacquire_radius: 10.0,
            hunt_period: 20,
            hunt_trail_distance: 4.0,
            hunt_flank_distance: 5.0,
            hunt_surround_quadrants: 3,
            hunt_quadrant_radius: 8.0,
            hunt_timeout: 1200,
            flank_distance: 6.0,
            engage_speed: 1.15,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderFeatures {
    pub decision_cooldown: u64,
    pub threat_radius: f64,
    /// Stolen items a raid needs before it counts as successful.
    pub loot_quota: u32,
}

impl Default for LeaderFeatures {
    fn default() -> Self {
        LeaderFeatures {
            decision_cooldown: 60,
            threat_radius: 24.0,
            loot_quota: 16,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetreatFeatures {
    pub cooldown: u64,
    pub check_period: u64,
    pub monitor_period: u64,
    pub loot_health: f64,
    pub critical_health: f64,
    pub emergency_health: f64,
    pub quota_retreat_chance: f64,
    pub threat_radius: f64,
    pub simple_distance: f64,
    pub tactical_distance: f64,
    pub defensive_search_radius: i32,
    pub border_margin: f64,
    pub arrival_distance: f64,
    pub simple_timeout: u64,
    pub tactical_timeout: u64,
    pub emergency_timeout: u64,
    pub loot_carrier_timeout: u64,
    pub defensive_timeout: u64,
    pub simple_speed: f64,
    pub tactical_speed: f64,
    pub emergency_speed: f64,
    pub loot_carrier_speed: f64,
    pub defensive_speed: f64,
    pub cover_chance: f64,
    pub join_tactical_chance: f64,
    pub sympathetic_radius: f64,
}

impl Default for RetreatFeatures {
    fn default() -> Self {
        RetreatFeatures {
            cooldown: 400,
            check_period: 20,
            monitor_period: 10,
            loot_health: 0.6,
            critical_health: 0.3,
            emergency_health: 0.15,
            quota_retreat_chance: 0.1,
            threat_radius: 16.0,
            simple_distance: 12.0,
            tactical_distance: 14.0,
            defensive_search_radius: 8,
            border_margin: 6.0,
            arrival_distance: 2.0,
            simple_timeout: 400,
            tactical_timeout: 600,
            emergency_timeout: 200,
            loot_carrier_timeout: 800,
            defensive_timeout: 500,
            simple_speed: 1.15,
            tactical_speed: 1.1,
            emergency_speed: 1.4,
            loot_carrier_speed: 1.2,
            defensive_speed: 1.0,
            cover_chance: 0.5,
            join_tactical_chance: 0.35,
            sympathetic_radius: 10.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatFeatures {
    pub melee_danger: f64,
    pub ranged_danger: f64,
    pub armored_danger: f64,
    pub targeting_raider_bonus: f64,
    pub proximity_radius: f64,
    pub proximity_bonus: f64,
    pub danger_zone_bonus: f64,
}

impl Default for ThreatFeatures {
    fn default() -> Self {
        ThreatFeatures {
            melee_danger: 1.0,
            ranged_danger: 1.4,
            armored_danger: 1.2,
            targeting_raider_bonus: 0.5,
            proximity_radius: 16.0,
            proximity_bonus: 0.75,
            danger_zone_bonus: 0.3,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryFeatures {
    /// Spots closer than this to an existing entry are treated as the same spot.
    pub dedup_radius: f64,
    pub max_spots: usize,
    pub danger_radius: f64,
}

impl Default for MemoryFeatures {
    fn default() -> Self {
        MemoryFeatures {
            dedup_radius: 4.0,
            max_spots: 32,
            danger_radius: 6.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerFeatures {
    pub path_step_period: u64,
    pub cleanup_period: u64,
    pub seed: u64,
}

impl Default for SchedulerFeatures {
    fn default() -> Self {
        SchedulerFeatures {
            path_step_period: 1,
            cleanup_period: 200,
            seed: 0x5EED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let features = RaidFeatures::from_json(r#"{ "squads": { "max_squad_size": 3 }, "leader": { "loot_quota": 4 } }"#).unwrap();

        assert_eq!(features.squads.max_squad_size, 3);
        assert_eq!(features.squads.max_leaders, 5);
        assert_eq!(features.leader.loot_quota, 4);
        assert_eq!(features.pathing.max_iterations, 2000);
        assert!(features.pathing.hazards.contains(&BlockKind::Lava));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(RaidFeatures::from_json("{ squads: ").is_err());
    }
}
