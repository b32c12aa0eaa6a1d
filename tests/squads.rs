use glam::DVec3;
use raid_tactics::host::{attributes, Capability};
use raid_tactics::military::squad::SquadRole;
use raid_tactics::scheduler::Task;
use raid_tactics::sim::SimWorld;
use raid_tactics::{AgentId, RaidEngine, RaidFeatures, RaidId};
use std::collections::HashSet;

const GROUND: i32 = 64;

fn at(x: f64, z: f64) -> DVec3 {
    DVec3::new(x + 0.5, GROUND as f64, z + 0.5)
}

fn raid_with(world: &mut SimWorld, spots: &[(f64, f64, Capability, u8)]) -> (RaidId, Vec<AgentId>) {
    let raid = world.begin_raid("Ashford", 0);

    let agents = spots
        .iter()
        .map(|(x, z, capability, tier)| {
            let agent = world.spawn(at(*x, *z), *capability, false);
            attributes::set_intelligence(world, agent, *tier);
            world.enlist(raid, agent);
            agent
        })
        .collect();

    (raid, agents)
}

#[test]
fn every_raider_lands_in_exactly_one_squad() {
    let mut world = SimWorld::flat(GROUND, 3);

    let spots: Vec<(f64, f64, Capability, u8)> = (0..12)
        .map(|i| {
            let capability = match i % 3 {
                0 => Capability::MELEE | Capability::ARMORED,
                1 => Capability::RANGED,
                _ => Capability::MELEE | Capability::FAST,
            };
            ((i % 4) as f64 * 2.0, (i / 4) as f64 * 2.0, capability, (i % 5) as u8)
        })
        .collect();

    let (raid, agents) = raid_with(&mut world, &spots);

    let mut engine = RaidEngine::new(RaidFeatures::default());
    let formed = engine.start_raid(&mut world, raid);

    assert!(formed > 0);
    assert!(engine.is_managing(raid));

    let coordination = engine.coordination();
    let squads = coordination.squads_of_raid(raid);
    assert_eq!(squads.len(), formed);

    let mut seen = HashSet::new();
    let max_size = engine.features().squads.max_squad_size;

    for id in &squads {
        let squad = coordination.squad(*id).unwrap();
        assert!(squad.len() <= max_size);

        for (agent, role) in squad.members() {
            assert!(seen.insert(agent), "{} is in more than one squad", agent);
            assert_eq!(attributes::squad_of(&world, agent), Some(*id));
            assert_eq!(attributes::role_of(&world, agent), Some(role));
            assert_eq!(attributes::raid_of(&world, agent), Some(raid));
        }
    }

    assert_eq!(seen.len(), agents.len());

    // The smartest raiders lead.
    let leader_tiers: Vec<u8> = squads
        .iter()
        .filter_map(|id| coordination.squad(*id))
        .filter(|squad| squad.role_of(squad.leader) != Some(SquadRole::LoneWolf))
        .map(|squad| attributes::intelligence(&world, squad.leader, 0))
        .collect();
    let min_leader = leader_tiers.iter().copied().min().unwrap();

    for agent in &agents {
        if coordination.squad_of(*agent).map(|s| s.leader != *agent).unwrap_or(false) {
            assert!(attributes::intelligence(&world, *agent, 0) <= min_leader);
        }
    }
}

#[test]
fn followers_take_roles_from_their_capabilities() {
    let mut world = SimWorld::flat(GROUND, 3);

    let (raid, agents) = raid_with(
        &mut world,
        &[
            (0.0, 0.0, Capability::MELEE, 3),
            (2.0, 0.0, Capability::MELEE | Capability::ARMORED, 1),
            (0.0, 2.0, Capability::RANGED, 1),
            (2.0, 2.0, Capability::MELEE | Capability::FAST, 1),
        ],
    );

    let mut features = RaidFeatures::default();
    features.squads.max_leaders = 1;

    let mut engine = RaidEngine::new(features);
    assert_eq!(engine.start_raid(&mut world, raid), 1);

    let squad = engine.coordination().squad_of(agents[0]).unwrap();

    assert_eq!(squad.leader, agents[0]);
    assert_eq!(squad.role_of(agents[1]), Some(SquadRole::Tank));
    assert_eq!(squad.role_of(agents[2]), Some(SquadRole::Ranged));
    assert_eq!(squad.role_of(agents[3]), Some(SquadRole::Looter));
}

#[test]
fn stragglers_become_lone_wolves() {
    let mut world = SimWorld::flat(GROUND, 3);

    let (raid, agents) = raid_with(&mut world, &[(0.0, 0.0, Capability::MELEE, 3), (100.0, 100.0, Capability::MELEE, 1)]);

    let mut features = RaidFeatures::default();
    features.squads.max_leaders = 1;

    let mut engine = RaidEngine::new(features);
    assert_eq!(engine.start_raid(&mut world, raid), 2);

    assert_eq!(attributes::role_of(&world, agents[1]), Some(SquadRole::LoneWolf));
    assert_ne!(attributes::squad_of(&world, agents[0]), attributes::squad_of(&world, agents[1]));
}

#[test]
fn lone_leaders_merge_on_the_first_pass() {
    let mut world = SimWorld::flat(GROUND, 3);

    // Too far apart to share a squad at formation time.
    let (raid, agents) = raid_with(&mut world, &[(0.0, 0.0, Capability::MELEE, 1), (40.0, 0.0, Capability::MELEE, 3)]);

    let mut engine = RaidEngine::new(RaidFeatures::default());
    assert_eq!(engine.start_raid(&mut world, raid), 2);

    let before = engine.coordination().squads_of_raid(raid);
    assert_eq!(before.len(), 2);

    engine.tick(&mut world, 0);

    let after = engine.coordination().squads_of_raid(raid);
    assert_eq!(after.len(), 1);
    assert!(before.iter().all(|id| engine.coordination().squad(*id).is_none()));

    let merged = engine.coordination().squad(after[0]).unwrap();
    assert_eq!(merged.len(), 2);
    assert_eq!(merged.leader, agents[1], "the sharper raider leads");

    for agent in &agents {
        assert_eq!(attributes::squad_of(&world, *agent), Some(merged.id));
    }

    assert_eq!(engine.coordination().len(), 1);
}

#[test]
fn a_dead_leader_disbands_the_squad_and_followers_find_homes() {
    let mut world = SimWorld::flat(GROUND, 3);

    let (raid, agents) = raid_with(
        &mut world,
        &[
            (0.0, 0.0, Capability::MELEE, 3),
            (2.0, 0.0, Capability::MELEE | Capability::ARMORED, 1),
            (0.0, 2.0, Capability::RANGED, 1),
        ],
    );

    let mut features = RaidFeatures::default();
    features.squads.max_leaders = 1;

    let mut engine = RaidEngine::new(features);
    engine.start_raid(&mut world, raid);

    let original = engine.coordination().squad_of(agents[0]).unwrap().id;

    world.kill(agents[0]);
    engine.on_agent_death(&mut world, agents[0]);
    engine.tick(&mut world, 0);

    assert!(engine.coordination().squad(original).is_none());

    for agent in &agents[1..] {
        let squad = engine.coordination().squad_of(*agent).expect("follower re-homed");
        assert_ne!(squad.id, original);
        assert_eq!(attributes::squad_of(&world, *agent), Some(squad.id));
    }
}

#[test]
fn ending_a_raid_releases_everyone() {
    let mut world = SimWorld::flat(GROUND, 3);

    let (raid, agents) = raid_with(
        &mut world,
        &[
            (0.0, 0.0, Capability::MELEE, 3),
            (2.0, 0.0, Capability::RANGED, 1),
            (0.0, 2.0, Capability::MELEE | Capability::FAST, 2),
            (60.0, 0.0, Capability::MELEE, 1),
        ],
    );

    let mut engine = RaidEngine::new(RaidFeatures::default());
    engine.start_raid(&mut world, raid);

    for now in 0..30 {
        engine.tick(&mut world, now);
        world.advance();
    }

    engine.end_raid(&mut world, raid);

    assert!(!engine.is_managing(raid));
    assert!(engine.coordination().is_empty());
    assert!(!engine.scheduler().is_scheduled(&Task::CoordinationPass(raid).key()));
    assert!(!engine.scheduler().is_scheduled(&Task::RetreatCheck(raid).key()));

    for agent in &agents {
        assert_eq!(attributes::squad_of(&world, *agent), None);
        assert_eq!(attributes::role_of(&world, *agent), None);
        assert_eq!(attributes::raid_of(&world, *agent), None);
        assert!(!engine.pathing().is_navigating(*agent));
    }

    // A second teardown finds nothing left to do.
    engine.end_raid(&mut world, raid);
    assert!(engine.coordination().is_empty());
}

#[test]
fn raids_the_host_finishes_are_torn_down_on_the_next_pass() {
    let mut world = SimWorld::flat(GROUND, 3);
    let (raid, agents) = raid_with(&mut world, &[(0.0, 0.0, Capability::MELEE, 3), (2.0, 0.0, Capability::MELEE, 1)]);

    let mut engine = RaidEngine::new(RaidFeatures::default());
    engine.start_raid(&mut world, raid);
    engine.tick(&mut world, 0);

    world.finish_raid(raid);

    let period = engine.features().squads.update_period;

    for now in 1..=period {
        engine.tick(&mut world, now);
    }

    assert!(!engine.is_managing(raid));
    assert!(engine.coordination().squads_of_raid(raid).is_empty());
    assert!(agents.iter().all(|agent| attributes::squad_of(&world, *agent).is_none()));
}

#[test]
fn inactive_raids_are_not_started() {
    let mut world = SimWorld::flat(GROUND, 3);
    let (raid, _) = raid_with(&mut world, &[(0.0, 0.0, Capability::MELEE, 3)]);

    world.finish_raid(raid);

    let mut engine = RaidEngine::new(RaidFeatures::default());

    assert_eq!(engine.start_raid(&mut world, raid), 0);
    assert!(!engine.is_managing(raid));
    assert!(engine.coordination().is_empty());
}
