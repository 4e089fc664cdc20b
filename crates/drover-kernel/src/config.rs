//! Run configuration.
//!
//! Two layers feed a run:
//!
//! - `RunSettings`: declared alongside the suite (e.g. `drover.toml`)
//! - `ExecutionOptions`: supplied by whoever launches the run (command line)
//!
//! `RunConfiguration::from_layers` merges them; launch options win whenever
//! they specify a value.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ordering::OrdererRef;

/// Suite-level parallelization behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionBehavior {
    /// Run collections one at a time.
    pub disable_parallelization: bool,

    /// Maximum number of concurrently running work items. `0` (or less)
    /// means one per available hardware thread.
    pub max_parallel_threads: i32,
}

/// Settings declared by the suite itself.
///
/// ```toml
/// case_orderer = "alphabetical"
///
/// [collection_behavior]
/// max_parallel_threads = 4
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub collection_behavior: Option<CollectionBehavior>,
    pub case_orderer: Option<OrdererRef>,
    pub collection_orderer: Option<OrdererRef>,
}

impl RunSettings {
    /// Load settings from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read run settings from {}", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse run settings from {}", path.display()))
    }

    /// Parse settings from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid run settings")
    }
}

/// Settings supplied at launch. `None` defers to the suite settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    pub disable_parallelization: Option<bool>,
    /// Only positive values override the suite setting.
    pub max_parallel_threads: Option<i32>,
}

/// The resolved, immutable configuration for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfiguration {
    pub parallelization_disabled: bool,
    /// `<= 0` means one slot per available hardware thread.
    pub max_concurrency: i32,
    pub case_orderer: Option<OrdererRef>,
    pub collection_orderer: Option<OrdererRef>,
}

impl RunConfiguration {
    /// Merge suite settings with launch options.
    pub fn from_layers(settings: &RunSettings, options: &ExecutionOptions) -> Self {
        let behavior = settings.collection_behavior.clone().unwrap_or_default();

        let parallelization_disabled = options
            .disable_parallelization
            .unwrap_or(behavior.disable_parallelization);

        let max_concurrency = match options.max_parallel_threads {
            Some(threads) if threads > 0 => threads,
            _ => behavior.max_parallel_threads,
        };

        Self {
            parallelization_disabled,
            max_concurrency,
            case_orderer: settings.case_orderer.clone(),
            collection_orderer: settings.collection_orderer.clone(),
        }
    }

    /// Collections run one at a time.
    pub fn sequential() -> Self {
        Self {
            parallelization_disabled: true,
            ..Self::default()
        }
    }

    /// Collections run concurrently with at most `max_concurrency` work items
    /// admitted at once.
    pub fn parallel(max_concurrency: i32) -> Self {
        Self {
            parallelization_disabled: false,
            max_concurrency,
            ..Self::default()
        }
    }

    pub fn with_case_orderer(mut self, orderer: impl Into<OrdererRef>) -> Self {
        self.case_orderer = Some(orderer.into());
        self
    }

    pub fn with_collection_orderer(mut self, orderer: impl Into<OrdererRef>) -> Self {
        self.collection_orderer = Some(orderer.into());
        self
    }

    /// Short description of the execution environment for logs.
    pub fn describe(&self) -> String {
        if self.parallelization_disabled {
            "non-parallel".to_string()
        } else if self.max_concurrency > 0 {
            format!("parallel ({} threads)", self.max_concurrency)
        } else {
            "parallel".to_string()
        }
    }
}
