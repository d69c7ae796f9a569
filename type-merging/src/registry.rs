//! The merge registry: compiled merge configuration per type name.
//!
//! A [`MergeRegistryBuilder`] validates each subservice view as it is registered, so that every
//! configuration problem surfaces at startup. The built [`MergeRegistry`] is immutable and is
//! meant to be shared behind an `Arc` by every resolution.
use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use itertools::Itertools;

use crate::delegate::Subservice;
use crate::delegate::SubserviceExecutor;
use crate::dependency_graph::DependencyGraph;
use crate::error::ConfigError;
use crate::merge_config::ArgsBuilder;
use crate::merge_config::EntryPointKind;
use crate::merge_config::MergedTypeConfig;
use crate::merge_config::SelectionSet;

/// Every subservice view of one merged type, with its dependency graph.
#[derive(Debug)]
pub struct MergedType {
    type_name: String,
    configs: Vec<MergedTypeConfig>,
    graph: DependencyGraph,
}

impl MergedType {
    pub(crate) fn new(
        type_name: &str,
        configs: Vec<MergedTypeConfig>,
    ) -> Result<Self, ConfigError> {
        let graph = DependencyGraph::build(type_name, &configs)?;
        Ok(Self {
            type_name: type_name.to_string(),
            configs,
            graph,
        })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The subservice views, in registration order.
    pub fn configs(&self) -> &[MergedTypeConfig] {
        &self.configs
    }

    pub fn config(&self, index: usize) -> Option<&MergedTypeConfig> {
        self.configs.get(index)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Every field some subservice can supply.
    pub fn fields(&self) -> SelectionSet {
        self.graph.fields()
    }

    /// The subservice whose definition of the type is canonical, for schema assembly.
    pub fn canonical_subservice(&self) -> Option<&str> {
        self.configs
            .iter()
            .find(|config| config.canonical)
            .map(|config| config.subservice.as_str())
    }

    /// The subservice whose definition of a field is canonical, for schema assembly: an explicit
    /// field marker wins over the canonical type.
    pub fn canonical_field_source(&self, field: &str) -> Option<&str> {
        self.configs
            .iter()
            .find(|config| config.fields.get(field).is_some_and(|field| field.canonical))
            .or_else(|| {
                self.configs
                    .iter()
                    .find(|config| config.canonical && config.provides(field))
            })
            .map(|config| config.subservice.as_str())
    }

    /// The description of a field, taken from its canonical source when there is one and from
    /// the first subservice that describes it otherwise.
    pub fn field_description(&self, field: &str) -> Option<&str> {
        let description = |subservice: &str| {
            self.configs
                .iter()
                .find(|config| config.subservice == subservice)
                .and_then(|config| config.fields.get(field))
                .and_then(|field| field.description.as_deref())
        };
        self.canonical_field_source(field)
            .and_then(description)
            .or_else(|| {
                self.configs
                    .iter()
                    .filter_map(|config| config.fields.get(field))
                    .find_map(|field| field.description.as_deref())
            })
    }

    fn validate(&self, config: &MergedTypeConfig) -> Result<(), ConfigError> {
        let type_name = &self.type_name;
        if self
            .configs
            .iter()
            .any(|existing| existing.subservice == config.subservice)
        {
            return Err(ConfigError::DuplicateSubservice {
                type_name: type_name.clone(),
                subservice: config.subservice.clone(),
            });
        }

        for entry_point in &config.entry_points {
            if entry_point.selection_set.is_empty() {
                return Err(ConfigError::EmptyEntryPointKey {
                    type_name: type_name.clone(),
                    subservice: config.subservice.clone(),
                    field_name: entry_point.field_name.clone(),
                });
            }
            let reason = match (&entry_point.kind, entry_point.args()) {
                (EntryPointKind::Singular { .. }, ArgsBuilder::FromKeyList { .. }) => {
                    Some("singular entry points build their arguments from the original object")
                }
                (EntryPointKind::Batched { .. }, ArgsBuilder::FromOriginalObject { .. }) => {
                    Some("batched entry points build their arguments from the key list")
                }
                _ => None,
            };
            if let Some(reason) = reason {
                return Err(ConfigError::InvalidArgsBuilder {
                    type_name: type_name.clone(),
                    subservice: config.subservice.clone(),
                    field_name: entry_point.field_name.clone(),
                    reason,
                });
            }
        }

        for (first, second) in config.entry_points.iter().tuple_combinations() {
            if first.selection_set == second.selection_set && first != second {
                return Err(ConfigError::AmbiguousEntryPoints {
                    type_name: type_name.clone(),
                    subservice: config.subservice.clone(),
                    selection_set: first.selection_set.to_string(),
                    first: first.field_name.clone(),
                    second: second.field_name.clone(),
                });
            }
        }

        for (field, field_config) in &config.fields {
            if field_config.computed && field_config.selection_set.is_empty() {
                return Err(ConfigError::ComputedWithoutSelectionSet {
                    type_name: type_name.clone(),
                    subservice: config.subservice.clone(),
                    field: field.clone(),
                });
            }
            if !field_config.canonical {
                continue;
            }
            if let Some(existing) = self.configs.iter().find(|existing| {
                existing
                    .fields
                    .get(field)
                    .is_some_and(|existing| existing.canonical)
            }) {
                return Err(ConfigError::MultipleCanonicalFields {
                    type_name: type_name.clone(),
                    field: field.clone(),
                    first: existing.subservice.clone(),
                    second: config.subservice.clone(),
                });
            }
        }

        if config.canonical {
            if let Some(existing) = self.canonical_subservice() {
                return Err(ConfigError::MultipleCanonicalTypes {
                    type_name: type_name.clone(),
                    first: existing.to_string(),
                    second: config.subservice.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Collects subservices and merged type configuration at startup.
#[derive(Default)]
pub struct MergeRegistryBuilder {
    subservices: IndexMap<String, Subservice>,
    types: IndexMap<String, MergedType>,
}

impl MergeRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the executor of a subservice.
    pub fn subservice(
        mut self,
        name: impl Into<String>,
        executor: Arc<dyn SubserviceExecutor>,
    ) -> Self {
        let name = name.into();
        self.subservices
            .insert(name.clone(), Subservice::new(&name, executor));
        self
    }

    /// Adds one subservice's view of a type.
    ///
    /// The configuration is validated against the views already registered for the type, and
    /// the dependency graph of the type is rebuilt. On error the builder is left unchanged.
    pub fn register(
        &mut self,
        type_name: &str,
        config: MergedTypeConfig,
    ) -> Result<&MergedType, ConfigError> {
        let mut configs = match self.types.get(type_name) {
            Some(existing) => {
                existing.validate(&config)?;
                existing.configs.clone()
            }
            None => {
                MergedType::new(type_name, Vec::new())?.validate(&config)?;
                Vec::new()
            }
        };
        configs.push(config);
        let merged_type = MergedType::new(type_name, configs)?;
        tracing::debug!(
            type_name,
            subservices = %merged_type.configs.iter().map(|config| &config.subservice).join(", "),
            layers = ?merged_type.graph.layers(),
            "registered merged type"
        );

        let (index, _) = self.types.insert_full(type_name.to_string(), merged_type);
        Ok(&self.types[index])
    }

    /// Registers every view of a type at once, stopping at the first invalid one.
    pub fn register_all(
        &mut self,
        type_name: &str,
        configs: impl IntoIterator<Item = MergedTypeConfig>,
    ) -> Result<(), ConfigError> {
        for config in configs {
            self.register(type_name, config)?;
        }
        Ok(())
    }

    /// Checks that every view names a subservice with an executor.
    pub fn build(self) -> Result<MergeRegistry, ConfigError> {
        for merged_type in self.types.values() {
            for config in &merged_type.configs {
                if !self.subservices.contains_key(&config.subservice) {
                    return Err(ConfigError::UnknownSubservice(config.subservice.clone()));
                }
            }
        }
        tracing::debug!(
            types = self.types.len(),
            subservices = self.subservices.len(),
            "merge registry built"
        );
        Ok(MergeRegistry {
            subservices: self.subservices.into_iter().collect(),
            types: self.types.into_iter().collect(),
        })
    }
}

/// The immutable, read-only after startup registry of merged types.
#[derive(Debug)]
pub struct MergeRegistry {
    subservices: HashMap<String, Subservice>,
    types: HashMap<String, MergedType>,
}

impl MergeRegistry {
    pub fn builder() -> MergeRegistryBuilder {
        MergeRegistryBuilder::new()
    }

    pub fn lookup(&self, type_name: &str) -> Option<&MergedType> {
        self.types.get(type_name)
    }

    pub fn subservice(&self, name: &str) -> Option<&Subservice> {
        self.subservices.get(name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.types.keys().map(String::as_str)
    }
}
