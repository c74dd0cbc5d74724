//! The `stampede` command: argument handling, logging, progress display, the
//! metrics endpoint and the built-in scenarios.

pub mod cli;
pub mod logging;
pub mod metrics_server;
pub mod progress;
pub mod scenarios;

pub use cli::{Cli, Commands, RunArgs};
pub use scenarios::ScenarioKind;
