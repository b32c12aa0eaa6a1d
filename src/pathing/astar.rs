use super::hazards::HazardSet;
use super::waypoint::*;
use crate::error::*;
use crate::features::PathingFeatures;
use crate::geometry::{block_of, standing_point};
use crate::host::BlockWorld;
use glam::{DVec3, IVec3};
use log::*;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Horizontal moves first, then straight up and down.
const NEIGHBOURS: [IVec3; 10] = [
    IVec3::new(1, 0, 0),
    IVec3::new(-1, 0, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(0, 0, -1),
    IVec3::new(1, 0, 1),
    IVec3::new(1, 0, -1),
    IVec3::new(-1, 0, 1),
    IVec3::new(-1, 0, -1),
    IVec3::new(0, 1, 0),
    IVec3::new(0, -1, 0),
];

#[derive(Clone, Debug)]
pub struct SearchSettings {
    pub max_iterations: u32,
    pub max_cost: f64,
    pub difficult_multiplier: f64,
    pub vertical_multiplier: f64,
    pub simplify_dot_threshold: f64,
    pub goal_tolerance: f64,
}

impl From<&PathingFeatures> for SearchSettings {
    fn from(features: &PathingFeatures) -> Self {
        SearchSettings {
            max_iterations: features.max_iterations,
            max_cost: features.max_path_cost,
            difficult_multiplier: features.difficult_terrain_multiplier,
            vertical_multiplier: features.vertical_step_multiplier,
            simplify_dot_threshold: features.simplify_dot_threshold,
            goal_tolerance: features.goal_tolerance,
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        SearchSettings::from(&PathingFeatures::default())
    }
}

/// Outcome counters for a single search, kept for logging and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SearchStats {
    pub iterations: u32,
    pub cost: f64,
}

#[derive(Clone, Copy)]
struct Node {
    cell: IVec3,
    g: f64,
    f: f64,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.cell == other.cell && self.f == other.f
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    // Reversed so the heap pops the lowest f first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.f.total_cmp(&self.f).then_with(|| self.g.total_cmp(&other.g))
    }
}

/// Whether a body can stand in `cell`.
pub fn is_walkable<W: BlockWorld + ?Sized>(world: &W, hazards: &HazardSet, cell: IVec3) -> bool {
    let feet = world.block(cell);
    let head = world.block(cell + IVec3::Y);
    let ground = world.block(cell - IVec3::Y);

    if feet.obstructs() || head.obstructs() {
        return false;
    }

    if !(ground.is_solid() || ground.is_liquid()) {
        return false;
    }

    !(hazards.contains(feet) || hazards.contains(head) || hazards.contains(ground))
}

pub struct AStarPathfinder<'a> {
    hazards: &'a HazardSet,
    settings: &'a SearchSettings,
}

impl<'a> AStarPathfinder<'a> {
    pub fn new(hazards: &'a HazardSet, settings: &'a SearchSettings) -> AStarPathfinder<'a> {
        AStarPathfinder { hazards, settings }
    }

    pub fn find_path<W: BlockWorld + ?Sized>(&self, world: &W, start: DVec3, goal: DVec3) -> RaidResult<WaypointPath> {
        self.find_path_with_stats(world, start, goal).map(|(path, _)| path)
    }

    pub fn find_path_with_stats<W: BlockWorld + ?Sized>(&self, world: &W, start: DVec3, goal: DVec3) -> RaidResult<(WaypointPath, SearchStats)> {
        let start_cell = block_of(start);
        let goal_cell = block_of(goal);
        let goal_point = goal_cell.as_dvec3();

        let heuristic = |cell: IVec3| cell.as_dvec3().distance(goal_point);

        let mut open = BinaryHeap::new();
        let mut came_from: HashMap<IVec3, IVec3> = HashMap::new();
        let mut g_score: HashMap<IVec3, f64> = HashMap::new();
        let mut closed: HashSet<IVec3> = HashSet::new();

        g_score.insert(start_cell, 0.0);
        open.push(Node {
            cell: start_cell,
            g: 0.0,
            f: heuristic(start_cell),
        });

        let mut stats = SearchStats::default();

        while let Some(node) = open.pop() {
            if closed.contains(&node.cell) {
                continue;
            }

            stats.iterations += 1;

            if stats.iterations > self.settings.max_iterations {
                debug!(
                    "Path search from {} to {} hit the iteration ceiling ({})",
                    start_cell, goal_cell, self.settings.max_iterations
                );
                return Err(RaidError::NoPath);
            }

            if heuristic(node.cell) <= self.settings.goal_tolerance {
                stats.cost = node.g;

                let path = self.reconstruct(world, &came_from, start_cell, node.cell);

                trace!(
                    "Path found from {} to {}: {} waypoints, {} iterations, cost {:.2}",
                    start_cell,
                    goal_cell,
                    path.len(),
                    stats.iterations,
                    stats.cost
                );

                return Ok((path, stats));
            }

            closed.insert(node.cell);

            for next in self.successors(world, node.cell) {
                if closed.contains(&next) {
                    continue;
                }

                let g = node.g + self.step_cost(world, node.cell, next);

                if g > self.settings.max_cost {
                    continue;
                }

                let known = g_score.get(&next).copied().unwrap_or(f64::INFINITY);

                if g < known {
                    g_score.insert(next, g);
                    came_from.insert(next, node.cell);
                    open.push(Node {
                        cell: next,
                        g,
                        f: g + heuristic(next),
                    });
                }
            }
        }

        debug!(
            "No path from {} to {} after {} iterations",
            start_cell, goal_cell, stats.iterations
        );

        Err(RaidError::NoPath)
    }

    /// Valid neighbouring cells. A horizontal move that is blocked at the
    /// same height may still resolve one block up (step) or one block down
    /// (ledge).
    fn successors<W: BlockWorld + ?Sized>(&self, world: &W, cell: IVec3) -> Vec<IVec3> {
        let mut result = Vec::with_capacity(NEIGHBOURS.len());

        for offset in NEIGHBOURS.iter() {
            let next = cell + *offset;

            if offset.y != 0 {
                if is_walkable(world, self.hazards, next) {
                    result.push(next);
                }
                continue;
            }

            if offset.x != 0 && offset.z != 0 {
                let side_a = cell + IVec3::new(offset.x, 0, 0);
                let side_b = cell + IVec3::new(0, 0, offset.z);

                if !is_walkable(world, self.hazards, side_a) || !is_walkable(world, self.hazards, side_b) {
                    continue;
                }
            }

            if is_walkable(world, self.hazards, next) {
                result.push(next);
            } else if world.block(next).obstructs() {
                let up = next + IVec3::Y;
                let headroom = world.block(cell + IVec3::Y * 2);

                if !headroom.obstructs() && is_walkable(world, self.hazards, up) {
                    result.push(up);
                }
            } else {
                let down = next - IVec3::Y;

                if is_walkable(world, self.hazards, down) {
                    result.push(down);
                }
            }
        }

        result
    }

    fn step_cost<W: BlockWorld + ?Sized>(&self, world: &W, from: IVec3, to: IVec3) -> f64 {
        let mut cost = from.as_dvec3().distance(to.as_dvec3());

        if world.block(to - IVec3::Y).is_difficult_terrain() {
            cost *= self.settings.difficult_multiplier;
        }

        if from.y != to.y {
            cost *= self.settings.vertical_multiplier;
        }

        cost
    }

    fn reconstruct<W: BlockWorld + ?Sized>(&self, world: &W, came_from: &HashMap<IVec3, IVec3>, start: IVec3, end: IVec3) -> WaypointPath {
        let mut cells = vec![end];
        let mut current = end;

        while let Some(parent) = came_from.get(&current) {
            if *parent == start {
                break;
            }
            cells.push(*parent);
            current = *parent;
        }

        cells.reverse();

        let mut previous = start;
        let mut waypoints = Vec::with_capacity(cells.len());

        for cell in cells {
            waypoints.push(tag_waypoint(world, previous, cell));
            previous = cell;
        }

        let mut path = WaypointPath::new(waypoints);
        path.simplify(self.settings.simplify_dot_threshold);
        path
    }
}

fn tag_waypoint<W: BlockWorld + ?Sized>(world: &W, previous: IVec3, cell: IVec3) -> Waypoint {
    let position = standing_point(cell);
    let feet = world.block(cell);

    if feet.is_door() {
        Waypoint::new(position, WaypointTag::Door).with_action(WaypointAction::OpenDoor(cell))
    } else if cell.y > previous.y {
        Waypoint::new(position, WaypointTag::Jump).with_action(WaypointAction::Jump)
    } else if world.block(cell - IVec3::Y).is_difficult_terrain() {
        Waypoint::new(position, WaypointTag::Careful)
    } else {
        Waypoint::new(position, WaypointTag::Normal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pathing::hazards::BlockKind;

    struct Grid {
        blocks: HashMap<IVec3, BlockKind>,
    }

    impl Grid {
        /// Stone floor at y = 63 spanning the given square.
        fn floor(size: i32) -> Grid {
            let mut blocks = HashMap::new();
            for x in -size..=size {
                for z in -size..=size {
                    blocks.insert(IVec3::new(x, 63, z), BlockKind::Stone);
                }
            }
            Grid { blocks }
        }

        fn put(&mut self, pos: IVec3, kind: BlockKind) {
            self.blocks.insert(pos, kind);
        }
    }

    impl BlockWorld for Grid {
        fn block(&self, pos: IVec3) -> BlockKind {
            self.blocks.get(&pos).copied().unwrap_or(BlockKind::Air)
        }

        fn set_block(&mut self, pos: IVec3, kind: BlockKind) -> bool {
            self.blocks.insert(pos, kind);
            true
        }
    }

    #[test]
    fn straight_line_collapses_to_endpoint() {
        let grid = Grid::floor(10);
        let hazards = HazardSet::default();
        let settings = SearchSettings::default();
        let finder = AStarPathfinder::new(&hazards, &settings);

        let path = finder
            .find_path(&grid, DVec3::new(0.5, 64.0, 0.5), DVec3::new(6.5, 64.0, 0.5))
            .unwrap();

        let end = path.destination().unwrap();
        assert!(end.distance(DVec3::new(6.5, 64.0, 0.5)) <= 1.0 + 1e-9);
        assert!(path.len() <= 2);
        assert!(path.waypoints().iter().all(|w| w.position().y == 64.0));
    }

    #[test]
    fn closed_door_is_passable_and_tagged() {
        let mut grid = Grid::floor(6);
        for z in -6..=6 {
            grid.put(IVec3::new(2, 64, z), BlockKind::Stone);
            grid.put(IVec3::new(2, 65, z), BlockKind::Stone);
        }
        grid.put(IVec3::new(2, 64, 0), BlockKind::Door { open: false });
        grid.put(IVec3::new(2, 65, 0), BlockKind::Door { open: false });

        let hazards = HazardSet::default();
        let settings = SearchSettings::default();
        let finder = AStarPathfinder::new(&hazards, &settings);

        let path = finder
            .find_path(&grid, DVec3::new(0.5, 64.0, 0.5), DVec3::new(5.5, 64.0, 0.5))
            .unwrap();

        let door = path
            .waypoints()
            .iter()
            .find(|w| w.tag() == WaypointTag::Door)
            .expect("door waypoint");

        assert_eq!(door.actions(), &[WaypointAction::OpenDoor(IVec3::new(2, 64, 0))]);
    }

    #[test]
    fn diagonals_never_cut_past_a_hazard() {
        let mut grid = Grid::floor(6);
        grid.put(IVec3::new(1, 63, 0), BlockKind::Lava);

        let hazards = HazardSet::new(BlockKind::default_hazards());
        let settings = SearchSettings::default();
        let finder = AStarPathfinder::new(&hazards, &settings);

        let next = finder.successors(&grid, IVec3::new(0, 64, 0));

        assert!(!next.contains(&IVec3::new(1, 64, 0)));
        assert!(!next.contains(&IVec3::new(1, 64, 1)));
        assert!(!next.contains(&IVec3::new(1, 64, -1)));
        assert!(next.contains(&IVec3::new(0, 64, 1)));
        assert!(next.contains(&IVec3::new(-1, 64, 1)));
    }

    #[test]
    fn steps_up_onto_a_block() {
        let mut grid = Grid::floor(6);
        for x in 2..=6 {
            for z in -6..=6 {
                grid.put(IVec3::new(x, 64, z), BlockKind::Stone);
            }
        }

        let hazards = HazardSet::default();
        let settings = SearchSettings::default();
        let finder = AStarPathfinder::new(&hazards, &settings);

        let path = finder
            .find_path(&grid, DVec3::new(0.5, 64.0, 0.5), DVec3::new(4.5, 65.0, 0.5))
            .unwrap();

        assert!(path.waypoints().iter().any(|w| w.tag() == WaypointTag::Jump));
        assert_eq!(path.destination().map(|p| p.y), Some(65.0));
    }
}
