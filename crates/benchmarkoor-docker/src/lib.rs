//! Container engine contract for the run engine
//!
//! Wraps the local Docker Engine API: networks, volumes, policy-driven
//! image pulls, container lifecycle, init containers, demultiplexed log
//! streaming, IP lookup and resource stats sampling. Everything created
//! here carries ownership labels so orphans can be swept.

pub mod error;
pub mod labels;
pub mod manager;
pub mod stats;

pub use error::{DockerError, Result};
pub use labels::{managed_filter, run_labels, CLIENT_LABEL, INSTANCE_LABEL, MANAGED_LABEL, RUN_ID_LABEL};
pub use manager::{ContainerManager, ContainerOptions, MountSpec};
pub use stats::{collect_samples, ResourceSample, StepTracker, DEFAULT_STATS_INTERVAL};
