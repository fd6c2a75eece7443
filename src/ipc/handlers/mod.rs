pub mod closures;
pub mod core;
pub mod lessons;
pub mod packages;
pub mod schedule;
pub mod setup;
pub mod students;
