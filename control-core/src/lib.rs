pub mod config;
pub mod errors;
pub mod exec;
pub mod lifecycle;
pub mod runner;
pub mod supervisor;
pub mod units;

pub use config::{Config, LoadOptions, Service};
pub use errors::{ControlError, Result};
pub use lifecycle::Lifecycle;
pub use supervisor::{Supervisor, Systemctl};
