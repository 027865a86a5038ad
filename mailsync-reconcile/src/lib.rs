//! # mailsync-reconcile
//!
//! The reconciliation engine: one generic [`Reconciler`] per entity kind,
//! parameterised by an [`EntityStrategy`], and the [`cycle`] orchestrator
//! that sequences declarations and applies the resulting queues in a
//! dependency-safe order.
//!
//! Call [`cycle::run`] for a full pass, or [`cycle::plan`] followed by
//! [`cycle::apply`] to inspect the queues in between.

pub mod cycle;
pub mod delta;
pub mod desired;
pub mod error;
pub mod reconciler;
pub mod strategy;

pub use cycle::{CyclePhase, CycleReport, Plan};
pub use desired::DesiredSettings;
pub use error::CycleError;
pub use reconciler::{KindQueues, Outcome, QueueCounts, Reconciler};
pub use strategy::{EntityStrategy, ManagedKeys};
