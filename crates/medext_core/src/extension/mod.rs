//! Extension declarations and lifecycle.
//!
//! Manifests are declarative data; no extension code is loaded from disk.
//! Command behavior is supplied by host-registered handlers.

pub mod access;
pub mod capability;
pub mod manifest;
pub mod registry;
pub mod risk;
