pub mod config;
pub mod errors;
pub mod index;
pub mod languages;
pub mod live;
pub mod logging;
pub mod progress;
pub mod resolution;
pub mod types;
