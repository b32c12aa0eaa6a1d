pub mod astar;
pub mod hazards;
pub mod manager;
pub mod obstacles;
pub mod waypoint;

pub use astar::AStarPathfinder;
pub use hazards::{BlockKind, HazardSet};
pub use manager::{NavigationOutcome, PathfindingManager, StuckOutcome};
pub use waypoint::{Waypoint, WaypointAction, WaypointPath, WaypointTag};
