//! Naming conventions and records shared with connectors and workers
//!
//! Nothing in this module talks to the broker; it only derives names and builds
//! the records that describe a connector's queues.

pub mod naming;
pub mod record;

pub use naming::*;
pub use record::*;
