//! # testcluster-types
//!
//! Data model for ephemeral integration-test clusters.
//!
//! This crate provides the types shared by the orchestrator and the CLI:
//! - [`ClusterConfiguration`] - Shared, immutable cluster description (loaded from TOML)
//! - [`NodeConfiguration`] - Per-node identity derived from the cluster plus a node index
//! - [`OutputBuffer`] - Growable byte sink for captured process output
//! - [`ConfigError`] - Configuration errors
//!
//! Nothing in here spawns processes or touches the network.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod buffer;
mod config;
mod error;
mod node;

pub use buffer::OutputBuffer;
pub use config::{
    ClusterConfiguration, DistributionConfig, DistributionKind, SetupCommand, WaitConfig,
    RESERVED_SETTINGS,
};
pub use error::ConfigError;
pub use node::NodeConfiguration;
