//! Long-running sync daemon: container startup wait, config refresh, and the
//! fixed-interval reconciliation loop.

mod error;
pub mod runner;
mod runtime;
pub mod services;

pub use error::DaemonError;
pub use runner::CycleRunner;
pub use runtime::{init_tracing, next_delay, run, sleep_or_shutdown, start_blocking};
pub use services::apply_templates;
