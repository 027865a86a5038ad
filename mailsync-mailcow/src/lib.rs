//! # mailsync-mailcow
//!
//! HTTP adapters for a mailcow installation:
//!
//! - [`MailcowClient`] reads snapshots and applies mutations over the REST API.
//! - [`DockerApi`] waits for and restarts the mailcow containers.

pub mod client;
pub mod dockerapi;
pub mod error;
pub mod http;

pub use client::{record_label, MailcowClient};
pub use dockerapi::{DockerApi, RestartAction};
pub use error::{DockerError, HttpError};
