#![allow(clippy::new_without_default)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;

pub mod api;
pub mod config;
pub mod error;
pub mod gps_processor;
mod logs;
pub mod position;
pub mod position_source;
pub mod routing;
pub mod trip_session;
pub mod trip_tracker;

pub use config::TrackerConfig;
pub use error::TripError;
pub use position::GeoPosition;
