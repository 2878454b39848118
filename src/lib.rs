pub mod config;
pub mod error;
pub mod hotspot;
pub mod location;
pub mod map;
pub mod realtime;
pub mod signal;
pub mod store;
