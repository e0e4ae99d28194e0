//! Error taxonomy shared by setup, stepping and scheduling.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::profile::ProfileError;

/// Every failure the simulator can report.
///
/// Structural variants are raised while the networks are built and abort
/// construction. Logic and remote variants are raised while stepping and
/// abort the whole run, since clearing has no partial-failure mode.
#[derive(Debug, Error)]
pub enum SimError {
    /// A carrier appears on some port but no producer or consumer uses it.
    #[error("no producer or consumer found for carrier `{carrier}`")]
    NoRoot { carrier: String },

    /// The "must clear before" constraints contain a cycle.
    #[error("cyclic ordering constraints, network `{network}` depends on itself")]
    CyclicOrder { network: String },

    /// A conversion-like asset has several outputs and no control strategy.
    #[error("asset `{asset}` has {outputs} output ports and no control strategy")]
    AmbiguousControlStrategy { asset: String, outputs: usize },

    /// The asset kind has no node behavior.
    #[error("asset `{asset}` has an unsupported kind")]
    UnsupportedAsset { asset: String },

    /// The asset is missing ports or parameters its kind requires.
    #[error("asset `{asset}` is invalid: {reason}")]
    InvalidAsset { asset: String, reason: String },

    #[error("unknown carrier `{carrier}` referenced by `{by}`")]
    UnknownCarrier { carrier: String, by: String },

    #[error("unknown port `{port}` referenced by `{by}`")]
    UnknownPort { port: String, by: String },

    #[error("unknown profile `{profile}` referenced by `{by}`")]
    UnknownProfile { profile: String, by: String },

    /// Two networks would write the same port during one step.
    #[error("port `{port}` would be written by networks `{first}` and `{second}`")]
    PortWrittenTwice {
        port: String,
        first: String,
        second: String,
    },

    /// A boundary asset joins a network to itself.
    #[error("asset `{asset}` connects a `{carrier}` network to itself")]
    SelfLoop { asset: String, carrier: String },

    /// The designated port of a control strategy is not in any simulated network.
    #[error("control strategy of asset `{asset}` points to a port outside every simulated network")]
    OrphanStrategy { asset: String },

    /// A node reached a role/strategy combination it cannot serve.
    #[error("asset `{asset}` cannot {reason}")]
    ImpossibleAllocation { asset: String, reason: String },

    /// A read-through node found no flow written by the primary network.
    #[error("no flow recorded on port `{port}` of asset `{asset}` at {timestamp}")]
    MissingFlow {
        asset: String,
        port: String,
        timestamp: DateTime<Utc>,
    },

    #[error("remote logic for asset `{asset}` did not answer within {timeout:?}")]
    RemoteTimeout { asset: String, timeout: Duration },

    #[error("remote logic for asset `{asset}` failed: {message}")]
    Remote { asset: String, message: String },

    #[error("asset `{asset}` is remotely governed but no remote logic is attached")]
    RemoteUnavailable { asset: String },

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to build worker pool: {0}")]
    Pool(String),

    /// The run was aborted by a failing task; carries the sticky description.
    #[error("simulation aborted: {0}")]
    Aborted(String),
}

/// Convenience alias used across the crate.
pub type SimResult<T> = Result<T, SimError>;
