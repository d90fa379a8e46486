//! Stratum controller: converges a `LedgerCluster` through Genesis, Bootstrap
//! and Ready by observing and mutating a [`ResourceStore`](stratum_core::ResourceStore).
//!
//! The engine is backend agnostic. `stratum-kubehub` drives it against the API
//! server and `stratum-store` drives it in memory.

#![forbid(unsafe_code)]

pub mod config;
pub mod inspector;
pub mod planner;
pub mod reconcile;
pub mod stage;
pub mod workload;

pub use config::ControllerConfig;
pub use inspector::{canonical_order, list_live_nodes};
pub use planner::{free_indices, plan, ScalingAction};
pub use reconcile::{Outcome, Reconciler};
pub use stage::{StageMachine, Step};
