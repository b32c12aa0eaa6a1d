#![warn(clippy::all)]

//! Headless raid run against the in-memory world. Optionally takes a JSON
//! feature file and a tick count:
//!
//! `raid-tactics [features.json] [ticks]`

use glam::{DVec3, IVec3};
use log::*;
use raid_tactics::geometry::Aabb;
use raid_tactics::host::{attributes, AgentHost, Capability, RaidProvider};
use raid_tactics::logging;
use raid_tactics::pathing::BlockKind;
use raid_tactics::raid::RaidMetaKey;
use raid_tactics::sim::SimWorld;
use raid_tactics::{AgentId, RaidEngine, RaidId};

const GROUND: i32 = 64;
const TOWN: &str = "Ashford";
const DEFAULT_TICKS: u64 = 2000;
const REACH: f64 = 2.0;
const HIT: f64 = 1.0;

struct Encounter {
    world: SimWorld,
    raid: RaidId,
    chests: Vec<DVec3>,
}

fn build_encounter() -> Encounter {
    let mut world = SimWorld::flat(GROUND, 42);

    let min = DVec3::new(-24.0, GROUND as f64 - 4.0, -24.0);
    let max = DVec3::new(24.0, GROUND as f64 + 8.0, 24.0);
    world.add_settlement(TOWN, Aabb::new(min, max));

    // A walled yard with a gate, a lava moat on one side and a cobweb in the lane.
    world.fill(IVec3::new(-6, GROUND, -6), IVec3::new(6, GROUND + 1, -6), BlockKind::Stone);
    world.fill(IVec3::new(-6, GROUND, 6), IVec3::new(6, GROUND + 1, 6), BlockKind::Stone);
    world.fill(IVec3::new(6, GROUND, -6), IVec3::new(6, GROUND + 1, 6), BlockKind::Stone);
    world.fill(IVec3::new(-6, GROUND, 0), IVec3::new(-6, GROUND + 1, 0), BlockKind::Door { open: false });
    world.fill(IVec3::new(-10, GROUND - 1, -4), IVec3::new(-10, GROUND - 1, 4), BlockKind::Lava);
    world.put_block(IVec3::new(-14, GROUND, 10), BlockKind::Cobweb);

    let raid = world.begin_raid(TOWN, 0);

    let raiders = [
        (-30.0, 0.0, Capability::MELEE, 3),
        (-31.0, 2.0, Capability::MELEE | Capability::ARMORED, 1),
        (-31.0, -2.0, Capability::RANGED, 2),
        (-32.0, 4.0, Capability::MELEE | Capability::FAST, 1),
        (-32.0, -4.0, Capability::MELEE | Capability::FAST, 1),
        (-30.0, 20.0, Capability::MELEE, 2),
        (-31.0, 22.0, Capability::RANGED, 1),
    ];

    for (x, z, capability, tier) in raiders {
        let agent = world.spawn(DVec3::new(x, GROUND as f64, z), capability, false);
        attributes::set_intelligence(&mut world, agent, tier);
        world.enlist(raid, agent);
    }

    for (x, z, capability) in [(0.0, 0.0, Capability::MELEE), (2.0, 3.0, Capability::RANGED), (12.0, -10.0, Capability::MELEE | Capability::ARMORED)] {
        world.spawn(DVec3::new(x, GROUND as f64, z), capability, true);
    }

    Encounter {
        world,
        raid,
        chests: vec![DVec3::new(2.5, GROUND as f64, -2.5), DVec3::new(-18.5, GROUND as f64, 14.5)],
    }
}

fn living(world: &SimWorld, candidates: &[AgentId], hostile: bool) -> Vec<(AgentId, DVec3)> {
    candidates
        .iter()
        .copied()
        .filter(|agent| world.is_alive(*agent) && world.is_hostile(*agent) == hostile)
        .filter_map(|agent| world.position(agent).map(|pos| (agent, pos)))
        .collect()
}

/// Crude melee exchange: anyone next to something it is fighting lands a hit.
fn resolve_combat(engine: &mut RaidEngine, world: &mut SimWorld, everyone: &[AgentId]) {
    let raiders = living(world, everyone, false);
    let defenders = living(world, everyone, true);

    for (raider, raider_pos) in &raiders {
        let struck = world
            .target(*raider)
            .and_then(|target| world.position(target).map(|pos| (target, pos)))
            .filter(|(_, pos)| pos.distance(*raider_pos) <= REACH);

        if let Some((target, _)) = struck {
            let health = world.health(target).map(|h| h.current).unwrap_or(0.0);
            world.set_health(target, health - HIT);
        }
    }

    for (defender, defender_pos) in &defenders {
        if !world.is_alive(*defender) {
            continue;
        }

        let victim = raiders
            .iter()
            .filter(|(raider, pos)| world.is_alive(*raider) && pos.distance(*defender_pos) <= REACH)
            .map(|(raider, _)| *raider)
            .next();

        if let Some(victim) = victim {
            let health = world.health(victim).map(|h| h.current).unwrap_or(0.0);
            world.set_health(victim, health - HIT * 0.5);

            if world.is_alive(victim) {
                engine.on_agent_damaged(world, victim, *defender);
            } else {
                engine.on_agent_death(world, victim);
            }
        }
    }
}

fn steal(engine: &mut RaidEngine, world: &mut SimWorld, raid: RaidId, chests: &mut Vec<DVec3>) {
    for agent in world.raiders(raid) {
        if attributes::is_loot_carrier(&*world, agent) {
            continue;
        }

        let pos = match world.position(agent) {
            Some(pos) => pos,
            None => continue,
        };

        if let Some(index) = chests.iter().position(|chest| chest.distance(pos) <= REACH) {
            let chest = chests.remove(index);
            engine.on_loot_stolen(world, agent, chest, false);
        }
    }
}

fn main() {
    logging::setup_logging(logging::Info);

    let mut args = std::env::args().skip(1);

    let mut engine = match args.next() {
        Some(path) => match std::fs::read_to_string(&path) {
            Ok(config) => RaidEngine::from_json(&config),
            Err(err) => {
                warn!("Could not read {}: {}, using default features", path, err);
                RaidEngine::new(Default::default())
            }
        },
        None => RaidEngine::new(Default::default()),
    };

    let ticks = args.next().and_then(|arg| arg.parse().ok()).unwrap_or(DEFAULT_TICKS);

    let Encounter { mut world, raid, mut chests } = build_encounter();

    // Rumours from earlier raids on the same town.
    for chest in &chests {
        if let Some(entry) = world.raid_mut(raid) {
            entry.push_location(RaidMetaKey::LootLocations, *chest, 4.0);
        }
    }

    let everyone: Vec<AgentId> = (1..=16).map(AgentId::from_u128).filter(|agent| world.agent(*agent).is_some()).collect();

    let squads = engine.start_raid(&mut world, raid);
    info!("Raid on {} begins with {} squads", TOWN, squads);

    for now in 0..ticks {
        engine.tick(&mut world, now);
        world.advance();

        resolve_combat(&mut engine, &mut world, &everyone);
        steal(&mut engine, &mut world, raid, &mut chests);

        if world.raiders(raid).is_empty() {
            info!("No raiders left at tick {}", now);
            break;
        }
    }

    let (stolen, extracted) = world
        .raid(raid)
        .map(|entry| (entry.stolen_items, entry.counter(RaidMetaKey::Extracted)))
        .unwrap_or((0, 0));

    world.finish_raid(raid);
    engine.end_raid(&mut world, raid);

    info!("Raid over: {} items stolen, {} carriers extracted", stolen, extracted);

    match engine.export_memory() {
        Some(snapshot) => info!("Raider memory snapshot: {} bytes", snapshot.len()),
        None => warn!("Raider memory could not be exported"),
    }
}
