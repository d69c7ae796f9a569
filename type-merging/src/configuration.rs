//! Runtime options of the merge planner.
use std::num::NonZeroUsize;

use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::error::ConfigError;

/// Configuration of merge planning and batching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MergePlannerConfig {
    /// Batching of delegated calls
    #[serde(default)]
    pub batching: BatchingConfig,

    /// Cache of merge plans
    #[serde(default)]
    pub plan_cache: PlanCacheConfig,
}

impl MergePlannerConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn json_schema() -> RootSchema {
        schemars::schema_for!(MergePlannerConfig)
    }
}

/// Batching of calls to batched entry points.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BatchingConfig {
    /// Coalesce the calls of one planning pass to the same entry point.
    /// When disabled, every entity gets its own call.
    /// Defaults to true
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Send identical keys of one batch only once.
    /// Defaults to true
    #[serde(default = "default_dedupe_keys")]
    pub dedupe_keys: bool,

    /// Split batches with more keys than this into several calls.
    /// Unlimited by default
    #[serde(default)]
    pub max_batch_size: Option<NonZeroUsize>,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            dedupe_keys: default_dedupe_keys(),
            max_batch_size: None,
        }
    }
}

impl BatchingConfig {
    /// The number of keys sent in one call.
    pub(crate) fn chunk_size(&self) -> usize {
        match (self.enabled, self.max_batch_size) {
            (false, _) => 1,
            (true, Some(max)) => max.get(),
            (true, None) => usize::MAX,
        }
    }
}

/// In memory cache of merge plans.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PlanCacheConfig {
    /// Number of plans kept.
    /// Defaults to 512
    #[serde(default = "default_plan_cache_limit")]
    pub limit: NonZeroUsize,
}

impl Default for PlanCacheConfig {
    fn default() -> Self {
        Self {
            limit: default_plan_cache_limit(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_dedupe_keys() -> bool {
    true
}

fn default_plan_cache_limit() -> NonZeroUsize {
    NonZeroUsize::MIN.saturating_add(511)
}
