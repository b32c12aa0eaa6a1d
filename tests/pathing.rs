use glam::{DVec3, IVec3};
use raid_tactics::geometry::block_of;
use raid_tactics::host::{attributes, AgentHost, BlockWorld, Capability};
use raid_tactics::pathing::astar::{is_walkable, SearchSettings};
use raid_tactics::pathing::obstacles::{ObstacleHandler, Remediation};
use raid_tactics::pathing::*;
use raid_tactics::sim::SimWorld;
use raid_tactics::{AgentId, RaidError, RaidFeatures, RaidId};
use rand::rngs::StdRng;
use rand::SeedableRng;

const GROUND: i32 = 64;

fn at(x: i32, z: i32) -> DVec3 {
    DVec3::new(x as f64 + 0.5, GROUND as f64, z as f64 + 0.5)
}

/// Lava channel across the x axis with a one block crossing at z = 4.
fn lava_channel() -> SimWorld {
    let mut world = SimWorld::flat(GROUND, 7);

    for z in -6..=6 {
        if z != 4 {
            world.put_block(IVec3::new(5, GROUND - 1, z), BlockKind::Lava);
        }
    }

    world
}

/// Cells swept by a body of the given half-width walking from `start`
/// through every waypoint in turn.
fn swept_cells(start: DVec3, path: &WaypointPath, half_width: f64) -> Vec<IVec3> {
    let mut points = vec![start];
    points.extend(path.waypoints().iter().map(|w| w.position()));

    let mut cells = Vec::new();

    for pair in points.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        let flat = DVec3::new(to.x - from.x, 0.0, to.z - from.z);
        let side = DVec3::new(-flat.z, 0.0, flat.x).normalize_or_zero() * half_width;
        let samples = (from.distance(to) / 0.05).ceil().max(1.0) as usize;

        for i in 0..=samples {
            let t = i as f64 / samples as f64;
            let centre = from.lerp(to, t);

            for offset in [-side, DVec3::ZERO, side] {
                cells.push(block_of(centre + offset));
            }
        }
    }

    cells
}

#[test]
fn walked_paths_never_touch_hazards() {
    let world = lava_channel();
    let hazards = HazardSet::new(BlockKind::default_hazards());
    let settings = SearchSettings::default();
    let start = at(0, 0);

    let path = AStarPathfinder::new(&hazards, &settings)
        .find_path(&world, start, at(10, 0))
        .expect("a crossing exists");

    assert!(!path.is_empty());

    for cell in swept_cells(start, &path, 0.3) {
        for layer in [cell - IVec3::Y, cell, cell + IVec3::Y] {
            assert!(!hazards.contains(world.block(layer)), "walking the path crosses a hazard at {}", layer);
        }
    }

    let end = path.destination().unwrap();
    assert!(end.distance(at(10, 0)) <= 1.5);

    // The only way across is the crossing, so the path must bend toward it.
    assert!(path.waypoints().iter().any(|w| w.position().z > 2.0));
}

#[test]
fn simplification_never_lengthens_a_path() {
    let zigzag: Vec<Waypoint> = (0..12)
        .map(|i| {
            let wobble = if i % 4 == 3 { 1.0 } else { 0.0 };
            Waypoint::new(DVec3::new(i as f64 + 0.5, 64.0, 0.5 + wobble), WaypointTag::Normal)
        })
        .collect();

    let raw = WaypointPath::new(zigzag);
    let mut simplified = raw.clone();
    simplified.simplify(0.95);

    assert!(simplified.len() < raw.len());
    assert!(simplified.length() <= raw.length() + 1e-9);
    assert_eq!(simplified.destination(), raw.destination());
}

#[test]
fn enclosed_goals_end_in_no_path() {
    let mut world = SimWorld::flat(GROUND, 7);
    let goal = IVec3::new(20, GROUND, 0);

    for dx in -2..=2 {
        for dz in -2..=2 {
            if dx == -2 || dx == 2 || dz == -2 || dz == 2 {
                world.put_block(IVec3::new(goal.x + dx, GROUND - 1, goal.z + dz), BlockKind::Lava);
            }
        }
    }

    let hazards = HazardSet::new(BlockKind::default_hazards());
    let settings = SearchSettings {
        max_iterations: 500,
        ..SearchSettings::default()
    };

    let result = AStarPathfinder::new(&hazards, &settings).find_path(&world, at(0, 0), at(goal.x, goal.z));

    assert!(matches!(result, Err(RaidError::NoPath)));
}

#[test]
fn progress_is_idempotent_per_call() {
    let mut path = WaypointPath::new(vec![
        Waypoint::new(at(0, 0), WaypointTag::Normal),
        Waypoint::new(at(4, 0), WaypointTag::Normal),
    ]);

    let start = at(0, 0);

    assert!(path.update_progress(start, 0.8).is_some());
    assert_eq!(path.cursor(), 1);

    // Still standing at the first waypoint: the second is not satisfied.
    for _ in 0..5 {
        assert!(path.update_progress(start, 0.8).is_none());
        assert_eq!(path.cursor(), 1);
    }

    assert!(path.update_progress(at(4, 0), 0.8).is_some());
    assert!(path.is_complete());
    assert!(path.update_progress(at(4, 0), 0.8).is_none());
    assert_eq!(path.cursor(), 2);
}

#[test]
fn raiders_walk_around_hazards_to_their_goal() {
    let mut world = lava_channel();
    let features = RaidFeatures::default();
    let mut manager = PathfindingManager::new(&features);

    let agent = world.spawn(at(0, 0), Capability::MELEE, false);
    attributes::mark_raider(&mut world, agent, RaidId::new_random());

    let goal = at(10, 0);
    let outcome = manager.navigate(&mut world, agent, goal, 1.0, 0);
    assert!(matches!(outcome, NavigationOutcome::Planned(_)));

    let hazards = manager.hazards().clone();

    for tick in 1..600 {
        if !manager.step(&mut world, agent, tick) {
            break;
        }

        world.advance();
    }

    let pos = world.position(agent).unwrap();
    assert!(!manager.is_navigating(agent));
    assert!(pos.distance(goal) < 2.0, "ended at {}", pos);
    assert!(is_walkable(&world, &hazards, block_of(pos)));
}

#[test]
fn unreachable_goals_fall_back_to_direct_steering() {
    let mut world = SimWorld::flat(GROUND, 7);
    let features = RaidFeatures::default();
    let mut manager = PathfindingManager::new(&features);

    let agent = world.spawn(at(0, 0), Capability::MELEE, false);

    // Goal floating in the air: nowhere to stand.
    let outcome = manager.navigate(&mut world, agent, DVec3::new(6.5, 80.0, 0.5), 1.0, 0);

    assert_eq!(outcome, NavigationOutcome::Direct);
    assert!(manager.cache(agent).map(|c| c.is_direct()).unwrap_or(false));
    assert!(world.velocity(agent).unwrap().x > 0.0);
}

// ─── Obstacles ──────────────────────────────────────────────────────────────

const COBWEB: IVec3 = IVec3::new(1, GROUND, 0);
const CACTUS: IVec3 = IVec3::new(-1, GROUND, 0);
const POOL: IVec3 = IVec3::new(0, GROUND - 1, 1);
const GUARDED_FIRE: IVec3 = IVec3::new(1, GROUND, 1);
const OPEN_FIRE: IVec3 = IVec3::new(-1, GROUND, 1);

/// A raider of the given tier hemmed in by a cobweb, a cactus, a pool and two
/// fires, one of which the host refuses to let anyone touch.
fn hemmed_in(tier: u8) -> (SimWorld, AgentId) {
    let mut world = SimWorld::flat(GROUND, 7);

    world.put_block(COBWEB, BlockKind::Cobweb);
    world.put_block(CACTUS, BlockKind::Cactus);
    world.put_block(POOL, BlockKind::Water);
    world.put_block(GUARDED_FIRE, BlockKind::Fire);
    world.put_block(OPEN_FIRE, BlockKind::Fire);
    world.protect(GUARDED_FIRE);

    let agent = world.spawn(at(0, 0), Capability::MELEE, false);
    attributes::set_intelligence(&mut world, agent, tier);

    (world, agent)
}

fn scan(world: &mut SimWorld, agent: AgentId, next_waypoint: Option<DVec3>) -> Vec<Remediation> {
    let mut features = RaidFeatures::default();
    features.obstacles.cobweb_clear_chance = 1.0;

    let handler = ObstacleHandler::new(&features.obstacles, &features.intelligence, features.pathing.jump_velocity);
    let mut rng = StdRng::seed_from_u64(3);

    handler.scan(world, agent, next_waypoint, &mut rng)
}

#[test]
fn dim_raiders_avoid_everything_and_jump() {
    let (mut world, agent) = hemmed_in(1);
    let results = scan(&mut world, agent, None);

    for cell in [COBWEB, CACTUS, GUARDED_FIRE, OPEN_FIRE] {
        assert!(results.contains(&Remediation::Avoided(cell)), "{} not avoided", cell);
    }
    assert!(results.contains(&Remediation::Jumped));

    assert_eq!(world.block(COBWEB), BlockKind::Cobweb);
    assert_eq!(world.block(CACTUS), BlockKind::Cactus);
    assert_eq!(world.block(POOL), BlockKind::Water);

    let velocity = world.velocity(agent).unwrap();
    assert_eq!(velocity.y, RaidFeatures::default().pathing.jump_velocity);
}

#[test]
fn middling_raiders_clear_webs_and_plants() {
    let (mut world, agent) = hemmed_in(2);
    let results = scan(&mut world, agent, None);

    assert!(results.contains(&Remediation::ClearedCobweb(COBWEB)));
    assert!(results.contains(&Remediation::ClearedPlant(CACTUS)));
    assert!(results.contains(&Remediation::Avoided(OPEN_FIRE)));
    assert!(results.contains(&Remediation::Jumped), "water is jumped, not bridged");

    assert_eq!(world.block(COBWEB), BlockKind::Air);
    assert_eq!(world.block(CACTUS), BlockKind::Air);
    assert_eq!(world.block(POOL), BlockKind::Water);
    assert_eq!(world.block(OPEN_FIRE), BlockKind::Fire);
}

#[test]
fn sharp_raiders_bridge_and_put_out_fires_where_allowed() {
    let (mut world, agent) = hemmed_in(3);
    let results = scan(&mut world, agent, None);

    assert!(results.contains(&Remediation::Bridged(POOL)));
    assert!(results.contains(&Remediation::Extinguished(OPEN_FIRE)));
    assert!(!results.contains(&Remediation::Jumped));

    assert_eq!(world.block(POOL), RaidFeatures::default().obstacles.bridge_block);
    assert_eq!(world.block(OPEN_FIRE), BlockKind::Air);

    // The host refused: the raider steers away instead.
    assert!(results.contains(&Remediation::Avoided(GUARDED_FIRE)));
    assert_eq!(world.block(GUARDED_FIRE), BlockKind::Fire);

    let velocity = world.velocity(agent).unwrap();
    assert!(velocity.x < 0.0 && velocity.z < 0.0, "steered {}", velocity);
}

/// Two-high closed door one block east of a raider of the given tier.
fn doorway(tier: u8) -> (SimWorld, AgentId, IVec3) {
    let mut world = SimWorld::flat(GROUND, 7);
    let door = IVec3::new(1, GROUND, 0);

    world.put_block(door, BlockKind::Door { open: false });
    world.put_block(door + IVec3::Y, BlockKind::Door { open: false });

    let agent = world.spawn(at(0, 0), Capability::MELEE, false);
    attributes::set_intelligence(&mut world, agent, tier);

    (world, agent, door)
}

#[test]
fn doors_in_the_way_open_for_raiders_who_know_how() {
    let (mut world, agent, door) = doorway(2);
    let results = scan(&mut world, agent, Some(at(3, 0)));

    assert_eq!(results, vec![Remediation::OpenedDoor(door)]);
    assert_eq!(world.block(door), BlockKind::Door { open: true });
    assert_eq!(world.block(door + IVec3::Y), BlockKind::Door { open: true });

    let (mut world, agent, door) = doorway(1);
    assert!(scan(&mut world, agent, Some(at(3, 0))).is_empty());
    assert_eq!(world.block(door), BlockKind::Door { open: false });

    // Doors behind the raider are left alone.
    let (mut world, agent, door) = doorway(3);
    assert!(scan(&mut world, agent, Some(at(-3, 0))).is_empty());
    assert_eq!(world.block(door), BlockKind::Door { open: false });
}

#[test]
fn a_guarded_upper_door_half_stays_shut() {
    let (mut world, agent, door) = doorway(2);
    world.protect(door + IVec3::Y);

    let results = scan(&mut world, agent, Some(at(3, 0)));

    assert_eq!(results, vec![Remediation::OpenedDoor(door)]);
    assert_eq!(world.block(door), BlockKind::Door { open: true });
    assert_eq!(world.block(door + IVec3::Y), BlockKind::Door { open: false });
}

#[test]
fn gaps_ahead_are_jumped() {
    let mut world = SimWorld::flat(GROUND, 7);
    world.put_block(IVec3::new(1, GROUND - 1, 0), BlockKind::Air);

    let agent = world.spawn(at(0, 0), Capability::MELEE, false);
    attributes::set_intelligence(&mut world, agent, 3);

    assert_eq!(scan(&mut world, agent, Some(at(3, 0))), vec![Remediation::Jumped]);
    assert_eq!(world.velocity(agent).unwrap().y, RaidFeatures::default().pathing.jump_velocity);
}

#[test]
fn stuck_raiders_jump_scan_then_get_pushed() {
    let mut world = SimWorld::flat(GROUND, 7);
    let mut features = RaidFeatures::default();
    features.obstacles.cobweb_clear_chance = 1.0;

    let mut manager = PathfindingManager::new(&features);
    let mut rng = StdRng::seed_from_u64(9);

    let agent = world.spawn(at(0, 0), Capability::MELEE, false);
    attributes::mark_raider(&mut world, agent, RaidId::new_random());
    attributes::set_intelligence(&mut world, agent, 2);

    let web = IVec3::new(-1, GROUND, -1);
    world.put_block(web, BlockKind::Cobweb);

    let goal = at(12, 0);
    assert!(matches!(manager.navigate(&mut world, agent, goal, 1.0, 0), NavigationOutcome::Planned(_)));

    // The world never advances, so the raider never moves.
    assert_eq!(manager.check_stuck(&mut world, agent, &mut rng), StuckOutcome::Moving);

    for count in 1..features.pathing.stuck_checks {
        assert_eq!(manager.check_stuck(&mut world, agent, &mut rng), StuckOutcome::Suspect(count));
    }

    match manager.check_stuck(&mut world, agent, &mut rng) {
        StuckOutcome::Stuck { goal: stuck_goal, remediations } => {
            assert_eq!(stuck_goal, goal);
            assert!(remediations.contains(&Remediation::ClearedCobweb(web)));
        }
        other => panic!("expected a stuck outcome, got {:?}", other),
    }

    assert_eq!(world.block(web), BlockKind::Air);
    assert_eq!(world.velocity(agent).unwrap().y, features.pathing.jump_velocity);

    assert!(manager.push_toward(&mut world, agent, goal));
    assert!(world.velocity(agent).unwrap().x > 0.0);

    // The counter starts over after a stuck episode.
    assert_eq!(manager.check_stuck(&mut world, agent, &mut rng), StuckOutcome::Suspect(1));

    manager.stop(&mut world, agent);
    assert!(!manager.push_toward(&mut world, agent, goal));
    assert_eq!(manager.check_stuck(&mut world, agent, &mut rng), StuckOutcome::Idle);
}
