pub mod authorization;
pub mod roster;
