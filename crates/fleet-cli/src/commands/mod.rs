// Command modules for fleetctl

/// Dry-run identifier allocation
pub mod allocate;

/// Shared loading helpers
pub mod common;

/// Configuration inspection
pub mod config;

/// Policy table inspection
pub mod policy;
