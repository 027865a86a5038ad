//! # mailsync-renderer
//!
//! Tera-based renderer for the mail server config files that point dovecot
//! and SOGo at the directory.
//!
//! Call [`pipeline::run`] to render and write every file under the configured
//! output directory; [`pipeline::diff`] shows what would change.
//!
//! ```rust,no_run
//! use mailsync_core::SyncConfig;
//!
//! fn refresh(config: &SyncConfig) -> bool {
//!     match mailsync_renderer::pipeline::run(config, false) {
//!         Ok(report) => report.changed(),
//!         Err(_) => false,
//!     }
//! }
//! ```

pub mod context;
pub mod diff;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod writer;

pub use context::TemplateContext;
pub use diff::FileDiff;
pub use engine::{ConfigFile, TemplateEngine};
pub use error::RenderError;
pub use pipeline::RenderReport;
pub use writer::{write_config, WriteResult};
