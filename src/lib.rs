//! Session coordination for transient peer-to-peer game rooms.
//!
//! This library provides room formation with short join codes, a host-side
//! participant registry with a disconnect grace period, per-viewer filtered
//! state replication with unfiltered client backups, and deterministic host
//! migration when the host vanishes.

// layers
pub mod domain;
pub mod migration;
pub mod protocol;
pub mod replication;
pub mod session;
pub mod transport;

// shared library
pub mod common;
