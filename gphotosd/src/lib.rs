pub mod config;
pub mod mirror;
pub mod sync;
