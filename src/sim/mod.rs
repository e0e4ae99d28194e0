//! Run machinery: clock, lifecycle contract, scheduler and emission pass.

/// Simulation clock for timestep management.
pub mod clock;
pub mod context;
/// Per-step attribution of producer emissions to consumers.
pub mod emission;
pub mod latch;
pub mod scheduler;
pub mod status;
pub mod types;
