// Domain layer - Core types and selection rules

pub mod errors;
pub mod model;
pub mod rules;
