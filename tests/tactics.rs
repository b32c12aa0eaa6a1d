use glam::DVec3;
use raid_tactics::geometry::{horizontal_distance, Aabb};
use raid_tactics::host::{attributes, AgentHost, Capability, RaidProvider};
use raid_tactics::military::leader::LeaderDecision;
use raid_tactics::military::retreat::RetreatTrigger;
use raid_tactics::military::squad::{FormationKind, SquadId};
use raid_tactics::military::tactics::TacticKind;
use raid_tactics::raid::RaidMetaKey;
use raid_tactics::sim::SimWorld;
use raid_tactics::{AgentId, RaidEngine, RaidFeatures, RaidId};
use std::f64::consts::TAU;

const GROUND: i32 = 64;

fn at(x: f64, z: f64) -> DVec3 {
    DVec3::new(x + 0.5, GROUND as f64, z + 0.5)
}

const TANK: Capability = Capability::MELEE.union(Capability::ARMORED);
const LOOTER: Capability = Capability::MELEE.union(Capability::FAST);

struct Scenario {
    world: SimWorld,
    engine: RaidEngine,
    raid: RaidId,
    raiders: Vec<AgentId>,
    hostiles: Vec<AgentId>,
    squad: SquadId,
}

impl Scenario {
    /// One squad led by the first raider (tier `leader_tier`), followers at
    /// tier one, hostiles as given.
    fn new(features: RaidFeatures, leader_tier: u8, raiders: &[(f64, f64, Capability)], hostiles: &[(f64, f64, Capability)]) -> Scenario {
        let mut world = SimWorld::flat(GROUND, 5);
        let raid = world.begin_raid("Ashford", 0);

        let raider_ids: Vec<AgentId> = raiders
            .iter()
            .enumerate()
            .map(|(i, (x, z, capability))| {
                let agent = world.spawn(at(*x, *z), *capability, false);
                attributes::set_intelligence(&mut world, agent, if i == 0 { leader_tier } else { 1 });
                world.enlist(raid, agent);
                agent
            })
            .collect();

        let hostile_ids = hostiles.iter().map(|(x, z, capability)| world.spawn(at(*x, *z), *capability, true)).collect();

        let mut features = features;
        features.squads.max_leaders = 1;

        let mut engine = RaidEngine::new(features);
        assert_eq!(engine.start_raid(&mut world, raid), 1);

        let squad = engine.coordination().squad_of(raider_ids[0]).map(|s| s.id).unwrap();

        Scenario {
            world,
            engine,
            raid,
            raiders: raider_ids,
            hostiles: hostile_ids,
            squad,
        }
    }

    fn run(&mut self, ticks: std::ops::RangeInclusive<u64>) {
        for now in ticks {
            self.engine.tick(&mut self.world, now);
            self.world.advance();
        }
    }

    fn target_of(&self, agent: AgentId) -> Option<AgentId> {
        self.world.agent(agent).and_then(|a| a.target)
    }

    fn active(&self) -> Option<TacticKind> {
        self.engine.tactics().active_kind(self.squad)
    }
}

fn full_squad() -> Vec<(f64, f64, Capability)> {
    vec![
        (0.0, 0.0, Capability::MELEE),
        (2.0, 0.0, TANK),
        (0.0, 2.0, TANK),
        (-2.0, 0.0, Capability::RANGED),
        (0.0, -2.0, Capability::RANGED),
    ]
}

// ─── Commanded tactics ──────────────────────────────────────────────────────

#[test]
fn surround_spreads_the_squad_evenly_then_closes_in() {
    // Hostile starts beyond the leader's threat radius so its own decisions
    // stay out of the way.
    let mut s = Scenario::new(RaidFeatures::default(), 3, &full_squad(), &[(30.0, 0.0, Capability::MELEE)]);
    let hostile = s.hostiles[0];

    s.run(0..=0);
    assert!(s.engine.command_squad(&mut s.world, s.squad, LeaderDecision::Surround { target: hostile }));

    let target_pos = s.world.position(hostile).unwrap();
    let radius = s.engine.features().tactics.surround_radius;
    let slots = s.engine.tactics().surround_slots(s.squad).expect("surround running").to_vec();

    assert_eq!(slots.len(), 5);

    let mut assigned: Vec<AgentId> = slots.iter().map(|(agent, _)| *agent).collect();
    assigned.sort();
    assigned.dedup();
    assert_eq!(assigned.len(), 5, "each member gets its own slot");

    let mut angles: Vec<f64> = slots
        .iter()
        .map(|(_, slot)| {
            assert!((horizontal_distance(*slot, target_pos) - radius).abs() < 1e-6);
            (slot.z - target_pos.z).atan2(slot.x - target_pos.x).rem_euclid(TAU)
        })
        .collect();
    angles.sort_by(|a, b| a.total_cmp(b));

    for pair in angles.windows(2) {
        assert!((pair[1] - pair[0] - TAU / 5.0).abs() < 1e-6);
    }

    assert!(s.engine.tactics().is_steering(s.squad));

    let delay = s.engine.features().tactics.surround_acquire_delay;

    s.run(1..=delay - 1);
    assert!(s.raiders.iter().all(|agent| s.target_of(*agent).is_none()));

    s.run(delay..=delay + 5);

    for agent in &s.raiders {
        assert_eq!(s.target_of(*agent), Some(hostile), "{} should be attacking", agent);
    }

    assert!(s.engine.tactics().surround_slots(s.squad).is_none());
    assert!(!s.engine.tactics().is_steering(s.squad));
}

#[test]
fn tactics_on_cooldown_fall_back_to_a_plain_engagement() {
    let mut s = Scenario::new(RaidFeatures::default(), 3, &full_squad(), &[(30.0, 0.0, Capability::MELEE)]);
    let hostile = s.hostiles[0];

    s.run(0..=0);
    assert!(s.engine.command_squad(&mut s.world, s.squad, LeaderDecision::Surround { target: hostile }));
    assert!(s.raiders.iter().all(|agent| s.target_of(*agent).is_none()));

    assert!(!s.engine.tactics().can_execute(s.squad, 0, s.engine.features().tactics.cooldown));
    assert!(s.engine.command_squad(&mut s.world, s.squad, LeaderDecision::Flanking { target: hostile }));

    // Flanking never started; every combat role was sent straight in.
    assert_eq!(s.active(), Some(TacticKind::Surround));
    assert!(s.raiders.iter().all(|agent| s.target_of(*agent) == Some(hostile)));
}

#[test]
fn ambush_springs_when_the_target_reaches_the_trap() {
    let mut s = Scenario::new(RaidFeatures::default(), 3, &full_squad(), &[(30.0, 0.0, Capability::RANGED)]);
    let hostile = s.hostiles[0];

    s.run(0..=0);

    let trap = s.world.position(s.raiders[0]).unwrap();
    assert!(s.engine.command_squad(&mut s.world, s.squad, LeaderDecision::Ambush { target: hostile }));
    assert_eq!(s.active(), Some(TacticKind::Ambush));

    // Exactly one bait goes after the target, a tank.
    let baits: Vec<AgentId> = s.raiders.iter().copied().filter(|agent| s.target_of(*agent) == Some(hostile)).collect();
    assert_eq!(baits.len(), 1);
    assert_eq!(s.world.capability(baits[0]), TANK);

    // The target takes the bait and walks into the trap.
    s.world.agent_mut(hostile).unwrap().position = trap + DVec3::new(1.0, 0.0, 0.0);

    let period = s.engine.features().tactics.ambush_watch_period;
    s.run(1..=period);

    assert!(s.raiders.iter().all(|agent| s.target_of(*agent) == Some(hostile)));
    assert_eq!(s.active(), None);
}

#[test]
fn commands_for_unknown_squads_are_refused() {
    let mut s = Scenario::new(RaidFeatures::default(), 3, &full_squad(), &[(30.0, 0.0, Capability::MELEE)]);

    assert!(!s.engine.command_squad(&mut s.world, SquadId::new_random(), LeaderDecision::SeekLoot { spot: None }));
}

// ─── Leader decisions ───────────────────────────────────────────────────────

#[test]
fn leaders_with_looters_create_a_distraction() {
    let mut s = Scenario::new(
        RaidFeatures::default(),
        3,
        &[(0.0, 0.0, Capability::MELEE), (2.0, 0.0, LOOTER)],
        &[(8.0, 0.0, Capability::MELEE), (8.0, 4.0, Capability::MELEE)],
    );

    s.run(0..=0);

    assert_eq!(s.active(), Some(TacticKind::Distraction));
    assert!(s.hostiles.contains(&s.target_of(s.raiders[0]).unwrap()));
}

#[test]
fn leaders_with_tanks_flank_small_groups() {
    let mut s = Scenario::new(
        RaidFeatures::default(),
        3,
        &[(0.0, 0.0, Capability::MELEE), (2.0, 0.0, TANK), (0.0, 2.0, Capability::RANGED)],
        &[(10.0, 0.0, Capability::MELEE), (10.0, 3.0, Capability::MELEE)],
    );

    s.run(0..=0);

    assert_eq!(s.active(), Some(TacticKind::Flanking));
    assert!(s.raiders.iter().all(|agent| s.target_of(*agent).is_some()));
}

#[test]
fn outnumbered_squads_feign_a_retreat() {
    let mut s = Scenario::new(
        RaidFeatures::default(),
        3,
        &[(0.0, 0.0, Capability::MELEE), (2.0, 0.0, Capability::MELEE)],
        &[(10.0, 0.0, Capability::MELEE), (10.0, 3.0, Capability::MELEE), (10.0, -3.0, Capability::MELEE)],
    );

    s.run(0..=0);

    assert_eq!(s.active(), Some(TacticKind::FeignedRetreat));
    assert!(s.engine.tactics().is_steering(s.squad));
    assert!(s.raiders.iter().all(|agent| s.target_of(*agent).is_none()));
    assert!(s.raiders.iter().all(|agent| !s.engine.retreat().is_retreating(*agent)));
}

#[test]
fn outnumbered_squads_with_enough_loot_go_home() {
    let mut features = RaidFeatures::default();
    features.leader.loot_quota = 1;

    let mut s = Scenario::new(
        features,
        3,
        &[(0.0, 0.0, Capability::MELEE), (2.0, 0.0, Capability::MELEE)],
        &[(10.0, 0.0, Capability::MELEE), (10.0, 3.0, Capability::MELEE), (10.0, -3.0, Capability::MELEE)],
    );

    s.world.raid_mut(s.raid).unwrap().stolen_items = 1;
    s.run(0..=0);

    for agent in &s.raiders {
        let info = s.engine.retreat().info(*agent).expect("squad withdraws");
        assert_eq!(info.trigger, RetreatTrigger::LeaderOrder);
    }
}

#[test]
fn a_lone_threat_gets_surrounded() {
    let mut s = Scenario::new(
        RaidFeatures::default(),
        3,
        &[(0.0, 0.0, Capability::MELEE), (2.0, 0.0, Capability::MELEE), (0.0, 2.0, Capability::MELEE)],
        &[(10.0, 0.0, Capability::MELEE)],
    );

    s.run(0..=0);

    assert_eq!(s.active(), Some(TacticKind::Surround));
    assert_eq!(s.engine.tactics().surround_slots(s.squad).map(|slots| slots.len()), Some(3));
}

#[test]
fn a_fleeing_threat_gets_hunted() {
    let mut s = Scenario::new(
        RaidFeatures::default(),
        3,
        &[(0.0, 0.0, Capability::MELEE), (2.0, 0.0, Capability::MELEE), (0.0, 2.0, Capability::MELEE)],
        &[(10.0, 0.0, Capability::MELEE)],
    );

    s.world.set_velocity(s.hostiles[0], DVec3::new(0.2, 0.0, 0.0));
    s.run(0..=0);

    assert_eq!(s.active(), Some(TacticKind::HuntingPack));
}

#[test]
fn small_squads_rush_a_lone_threat() {
    let mut s = Scenario::new(
        RaidFeatures::default(),
        3,
        &[(0.0, 0.0, Capability::MELEE), (2.0, 0.0, Capability::MELEE)],
        &[(10.0, 0.0, Capability::MELEE)],
    );

    s.run(0..=0);

    assert_eq!(s.active(), Some(TacticKind::ConcentratedAssault));
    assert!(s.raiders.iter().all(|agent| s.target_of(*agent) == Some(s.hostiles[0])));
}

#[test]
fn dim_leaders_just_engage() {
    let mut s = Scenario::new(
        RaidFeatures::default(),
        1,
        &[(0.0, 0.0, Capability::MELEE), (2.0, 0.0, TANK), (0.0, 2.0, LOOTER)],
        &[(10.0, 0.0, Capability::MELEE), (10.0, 3.0, Capability::MELEE)],
    );

    s.run(0..=0);

    assert_eq!(s.active(), None);
    assert!(s.target_of(s.raiders[0]).is_some());
    assert!(s.target_of(s.raiders[2]).is_none(), "looters stay out of plain fights");
}

#[test]
fn quiet_squads_spread_out_to_look_for_loot() {
    let mut s = Scenario::new(RaidFeatures::default(), 3, &[(0.0, 0.0, Capability::MELEE), (2.0, 0.0, LOOTER)], &[]);

    s.world.add_settlement("Ashford", Aabb::new(DVec3::new(-20.0, 60.0, -20.0), DVec3::new(20.0, 72.0, 20.0)));
    s.run(0..=0);

    let squad = s.engine.coordination().squad(s.squad).unwrap();
    assert_eq!(squad.formation, FormationKind::Spread);
    assert!(s.engine.pathing().is_navigating(s.raiders[0]));
}

#[test]
fn big_squads_leapfrog_toward_distant_loot() {
    let mut s = Scenario::new(
        RaidFeatures::default(),
        3,
        &[(0.0, 0.0, Capability::MELEE), (2.0, 0.0, TANK), (0.0, 2.0, Capability::RANGED), (-2.0, 0.0, LOOTER)],
        &[],
    );

    let dedup = s.engine.features().memory.dedup_radius;
    s.world.raid_mut(s.raid).unwrap().push_location(RaidMetaKey::LootLocations, at(60.0, 0.0), dedup);

    s.run(0..=0);

    assert_eq!(s.active(), Some(TacticKind::Leapfrog));
    assert_eq!(s.engine.coordination().squad(s.squad).map(|sq| sq.formation), Some(FormationKind::Spread));
}
