pub mod catalog;
pub mod core;
pub mod enrollment;
pub mod offerings;
pub mod schedule;
pub mod scores;
