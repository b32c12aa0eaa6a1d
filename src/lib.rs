#![warn(clippy::all)]

//! Raider AI and tactical coordination for scripted settlement raids.
//!
//! The host simulation owns the world, the agents and the raids. It drives
//! [`engine::RaidEngine`] once per tick through the [`host::Host`] interface;
//! everything the engine does per call is bounded.

pub mod engine;
pub mod error;
pub mod features;
pub mod geometry;
pub mod host;
pub mod logging;
pub mod military;
pub mod pathing;
pub mod raid;
pub mod scheduler;
pub mod serialize;
pub mod sim;

pub use engine::RaidEngine;
pub use error::{RaidError, RaidResult};
pub use features::RaidFeatures;
pub use host::{AgentId, Host};
pub use raid::{Raid, RaidId};
