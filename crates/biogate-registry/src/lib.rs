//! Device registry: the single source of truth for configured devices.
//!
//! The registry tracks every panel and relay the coordinator knows about,
//! their reachability, and the binding that says which relay a panel's
//! successful match actuates. Connection state is written only by the
//! transport layer; registrations and bindings change only through admin
//! operations. The decision engine is a pure reader.
//!
//! `resolve` sits on the hot path of every access attempt, so lookups are
//! single hash-map reads behind a short-lived read lock.

mod registry;

pub use registry::{DeviceEntry, DeviceRegistry};
