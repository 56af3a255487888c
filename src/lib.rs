/// Account balances and the two access surfaces: lock-free reads and
/// mutations that require the caller to hold the account lock.
pub mod account;

/// Serializes deposits and transfers with per-account locks, see
/// [`coordinator::simple_coordinator::SimpleCoordinator`].
pub mod coordinator;

/// Runtime settings, loaded from environment variables.
pub mod config;

/// Textual commands and amount parsing shared by the outer surfaces.
pub mod command;

/// HTTP routes (axum) on top of the coordinator.
pub mod api;

pub mod logging;

/// Batch driver used by the binary. Kept in the library so integration
/// tests can run it.
pub mod bin_utils;
