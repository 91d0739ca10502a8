//! Shard router and lifecycle controller for the debug-bundle service:
//! wires the Argument Builder, Process Handle, and Metadata Store
//! Adapter crates into the coordinator described in the system design,
//! and exposes it behind a router that serializes access from any
//! caller onto a single service-shard actor task.

pub mod config;
pub mod controller;
pub mod error;
pub mod router;

pub use config::{ConfigHandle, ConfigWriter, DebugBundleConfig, observable};
pub use controller::{Controller, StatusSnapshot};
pub use error::{ControllerError, Result};
pub use router::{Router, ShardId};
