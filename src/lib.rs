//! netstate - Dominant brain-network state labeling and temporal dynamics
//!
//! netstate turns regional activity time series into a discrete sequence of
//! dominant-network states and summarizes how subjects move between them:
//! projection → z-score normalization → dominant-state classification →
//! state maps → fractional occupancy, dwell time, appearance rate and
//! transition probabilities, stacked per cohort.
//!
//! ## Modules
//!
//! - **Labeling**: [`normalizer`], [`classifier`], [`harmonizer`], [`state_maps`]
//! - **Dynamics**: [`dynamics`] per-subject metrics and group tensors
//! - **Control**: [`control`] task assembly and [`energy`] summaries for an
//!   external network-control solver
//! - **Orchestration**: [`pipeline`] over cohorts and classifier variants

pub mod classifier;
pub mod config;
pub mod control;
pub mod dynamics;
pub mod energy;
pub mod error;
pub mod harmonizer;
pub mod io;
pub mod logging;
pub mod normalizer;
pub mod pipeline;
pub mod state_maps;
pub mod types;

pub use classifier::DominantStateClassifier;
pub use config::{CohortConfig, LoggingConfig, PipelineConfig, VariantConfig};
pub use dynamics::{GroupDynamics, SubjectDynamics};
pub use error::{Result, StateError};
pub use pipeline::{RunManifest, StatePipeline};
pub use types::{LabelSequence, LabelSet, Network, RegionNetworkMap, StateLabel, StateSpace};

/// netstate version recorded in every run manifest
pub const NETSTATE_VERSION: &str = env!("CARGO_PKG_VERSION");
