//! Query planning and result merging for object types federated across subservices.
//!
//! Each subservice knows a subset of the fields of a merged type. Given the fields requested on
//! an entity and the fields already present on it, the [`MergeExecutor`] plans which subservices
//! to call and in what order, batches the calls of concurrently resolving entities, and merges
//! the partial answers into one object.
//!
//! ```text
//! MergeRegistry (per type: subservice views + dependency graph)
//!     -> resolver (obligations, in layers)
//!     -> PlanBuilder (merge steps)
//!     -> BatchCollector / delegate (subservice calls)
//!     -> merge (aggregate result)
//! ```

#![warn(unreachable_pub)]

pub mod json_ext;

mod batching;
pub mod configuration;
pub mod delegate;
pub mod dependency_graph;
pub mod error;
pub mod execution;
pub mod merge;
pub mod merge_config;
pub mod plan;
pub mod registry;
mod resolver;

pub use crate::configuration::BatchingConfig;
pub use crate::configuration::MergePlannerConfig;
pub use crate::configuration::PlanCacheConfig;
pub use crate::delegate::Subservice;
pub use crate::delegate::SubserviceExecutor;
pub use crate::delegate::SubserviceRequest;
pub use crate::delegate::TowerExecutor;
pub use crate::error::ConfigError;
pub use crate::error::DelegationError;
pub use crate::error::ErrorExtension;
pub use crate::error::FieldError;
pub use crate::error::MergeError;
pub use crate::error::PlanError;
pub use crate::error::ResolutionError;
pub use crate::execution::MergeExecutor;
pub use crate::merge::AggregateResult;
pub use crate::merge::ResolutionState;
pub use crate::merge_config::ArgsBuilder;
pub use crate::merge_config::ArgumentValue;
pub use crate::merge_config::EntryPoint;
pub use crate::merge_config::EntryPointKind;
pub use crate::merge_config::FieldMergeConfig;
pub use crate::merge_config::KeyExtractor;
pub use crate::merge_config::MergedTypeConfig;
pub use crate::merge_config::SelectionSet;
pub use crate::merge_config::ValuesFromResults;
pub use crate::plan::MergePlan;
pub use crate::plan::MergeStep;
pub use crate::registry::MergeRegistry;
pub use crate::registry::MergeRegistryBuilder;
pub use crate::registry::MergedType;

const _: () = {
    const fn assert_thread_safe<T: Sync + Send>() {}

    assert_thread_safe::<MergeRegistry>();
    assert_thread_safe::<MergeExecutor>();
    assert_thread_safe::<MergePlan>();
};
