//! Built-in command station drivers.

pub mod cs2;
pub mod simulation;
