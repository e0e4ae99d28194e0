//! Multi-carrier energy network simulator.
//!
//! Assets exchanging heat, gas, electricity or any other carrier are split
//! into per-carrier tree networks. Every step each network aggregates the
//! bid curves of its nodes, clears at the equilibrium price and allocates
//! energy back down the tree. Conversion assets couple networks; they are
//! ordered so that the network driving a conversion clears first.

#[cfg(feature = "api")]
pub mod api;
pub mod cli;
pub mod config;
/// Piecewise-linear bid curves.
pub mod curve;
pub mod error;
pub mod io;
pub mod model;
pub mod network;
pub mod nodes;
pub mod observation;
pub mod profile;
pub mod report;
/// Run machinery: clock, scheduler, status and emission attribution.
pub mod sim;
pub mod simulation;
