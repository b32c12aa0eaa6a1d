pub mod coordination;
pub mod formation;
pub mod leader;
pub mod memory;
pub mod retreat;
pub mod squad;
pub mod tactics;
pub mod threatmap;
