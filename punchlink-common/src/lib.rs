//! # punchlink common library
//!
//! Shared code for the attendance relay:
//! - Canonical attendance event model and wire projections
//! - Normalizers for device, JSON webhook and iClock records
//! - Recency filter for push-protocol backlog suppression
//! - Request-scoped user directory
//! - Pipeline counters
//! - Configuration loading

pub mod config;
pub mod counters;
pub mod directory;
pub mod error;
pub mod model;
pub mod normalize;
pub mod recency;
pub mod time;

pub use counters::PipelineCounters;
pub use directory::UserDirectory;
pub use error::{Error, Result};
pub use model::{AttendanceEvent, Direction, Environment, SourceProtocol, Timestamp};
pub use recency::RecencyFilter;
