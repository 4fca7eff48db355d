pub mod config;
pub mod diagnostic;
pub mod fence;
pub mod prompt;
pub mod report;
pub mod types;

pub use config::{Config, ConfigError};
pub use report::{AttemptOutcome, AttemptRecord, SessionReport};
pub use types::*;
