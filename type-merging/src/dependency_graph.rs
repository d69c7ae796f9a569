//! The materialized dependency graph of one merged type.
//!
//! Nodes are the subservice views of the type, in registration order, so that a node index is
//! also the index of its view. An edge `A -> B` means that B cannot be visited before A: a field
//! named by the selection set of one of B's fields is supplied by A and by no other view. Entry
//! point keys do not induce edges, they are expected on the original object. Registration rejects
//! any set of views where some view can only be reached through its own output.
use std::fmt;

use indexmap::IndexMap;
use itertools::Itertools;
use petgraph::graph::DiGraph;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::ConfigError;
use crate::merge_config::MergedTypeConfig;
use crate::merge_config::SelectionSet;

#[derive(Debug, Clone)]
pub(crate) struct DependencyNode {
    pub(crate) subservice: String,
    /// Fields every visit to this view needs, whichever entry point is used.
    pub(crate) requires: SelectionSet,
}

#[derive(Debug, Clone)]
pub(crate) struct DependencyEdge {
    pub(crate) fields: SelectionSet,
}

/// The views able to supply one field, in declaration order.
#[derive(Debug, Clone, Default)]
pub(crate) struct Providers {
    pub(crate) direct: Vec<usize>,
    pub(crate) computed: Vec<usize>,
}

impl Providers {
    /// Every provider, direct ones first.
    pub(crate) fn all(&self) -> impl Iterator<Item = usize> + '_ {
        self.direct.iter().chain(self.computed.iter()).copied()
    }
}

#[derive(Debug)]
pub struct DependencyGraph {
    type_name: String,
    graph: DiGraph<DependencyNode, DependencyEdge>,
    providers: IndexMap<String, Providers>,
}

impl DependencyGraph {
    pub(crate) fn build(
        type_name: &str,
        configs: &[MergedTypeConfig],
    ) -> Result<Self, ConfigError> {
        let mut graph = DiGraph::new();
        let mut providers: IndexMap<String, Providers> = IndexMap::new();

        for (index, config) in configs.iter().enumerate() {
            graph.add_node(DependencyNode {
                subservice: config.subservice.clone(),
                requires: hard_requirements(config),
            });
            for (field, field_config) in &config.fields {
                let entry = providers.entry(field.clone()).or_default();
                if field_config.computed {
                    entry.computed.push(index);
                } else {
                    entry.direct.push(index);
                }
            }
        }

        for target in graph.node_indices().collect::<Vec<_>>() {
            let mut incoming: IndexMap<NodeIndex, SelectionSet> = IndexMap::new();
            for field in &configs[target.index()].type_selection_set() {
                let Some(field_providers) = providers.get(field.as_str()) else {
                    continue;
                };
                let others = field_providers
                    .direct
                    .iter()
                    .filter(|index| **index != target.index())
                    .collect::<Vec<_>>();
                if let [source] = others.as_slice() {
                    incoming
                        .entry(NodeIndex::new(**source))
                        .or_default()
                        .insert(field.as_str());
                }
            }
            for (source, fields) in incoming {
                graph.add_edge(source, target, DependencyEdge { fields });
            }
        }

        let dependency_graph = Self {
            type_name: type_name.to_string(),
            graph,
            providers,
        };
        dependency_graph.check_acyclic(configs)?;
        Ok(dependency_graph)
    }

    /// Finds the views that can never be visited. A view can be visited once, for each field its
    /// non-computed selection sets name, some other visitable view supplies it, or no view does
    /// (the field is then expected on the original object). Every view left over waits on its own
    /// output, directly or through other views. The fixpoint runs over the whole set of views, so
    /// the outcome does not depend on registration order.
    fn check_acyclic(&self, configs: &[MergedTypeConfig]) -> Result<(), ConfigError> {
        let requirements = configs
            .iter()
            .map(MergedTypeConfig::type_selection_set)
            .collect::<Vec<_>>();
        let mut visitable = vec![false; configs.len()];
        let mut changed = true;
        while changed {
            changed = false;
            for (index, requires) in requirements.iter().enumerate() {
                if visitable[index] {
                    continue;
                }
                let satisfied = requires
                    .iter()
                    .all(|field| match self.providers.get(field.as_str()) {
                        Some(providers) if !providers.direct.is_empty() => providers
                            .direct
                            .iter()
                            .any(|provider| *provider != index && visitable[*provider]),
                        _ => true,
                    });
                if satisfied {
                    visitable[index] = true;
                    changed = true;
                }
            }
        }

        let stuck = (0..configs.len())
            .filter(|index| !visitable[*index])
            .collect::<Vec<_>>();
        if stuck.is_empty() {
            return Ok(());
        }
        let subservices = stuck
            .iter()
            .map(|index| format!("'{}'", configs[*index].subservice))
            .join(", ");
        tracing::debug!(type_name = %self.type_name, %subservices, "dependency cycle");
        Err(ConfigError::DependencyCycle {
            type_name: self.type_name.clone(),
            subservices,
        })
    }

    pub(crate) fn providers(&self, field: &str) -> Option<&Providers> {
        self.providers.get(field)
    }

    /// Every field of the type, in declaration order.
    pub fn fields(&self) -> SelectionSet {
        self.providers.keys().cloned().collect()
    }

    /// The subservices a view must wait for, with the fields each one supplies.
    pub fn dependencies(&self, config_index: usize) -> Vec<(&str, &SelectionSet)> {
        let node = NodeIndex::new(config_index);
        if node.index() >= self.graph.node_count() {
            return Vec::new();
        }
        let mut dependencies = self
            .graph
            .edges_directed(node, Direction::Incoming)
            .map(|edge| {
                (
                    edge.source().index(),
                    self.graph[edge.source()].subservice.as_str(),
                    &edge.weight().fields,
                )
            })
            .collect::<Vec<_>>();
        dependencies.sort_by_key(|(index, _, _)| *index);
        dependencies
            .into_iter()
            .map(|(_, subservice, fields)| (subservice, fields))
            .collect()
    }

    /// The fields a view needs before it can be visited at all.
    pub fn requirements(&self, config_index: usize) -> Option<&SelectionSet> {
        self.graph
            .node_weight(NodeIndex::new(config_index))
            .map(|node| &node.requires)
    }

    /// Groups the subservices into layers: each one only depends on subservices of earlier
    /// layers. Within a layer, declaration order is kept.
    pub fn layers(&self) -> Vec<Vec<&str>> {
        let mut in_degree = self
            .graph
            .node_indices()
            .map(|node| {
                self.graph
                    .neighbors_directed(node, Direction::Incoming)
                    .count()
            })
            .collect::<Vec<_>>();
        let mut layers = Vec::new();
        let mut current = self
            .graph
            .node_indices()
            .filter(|node| in_degree[node.index()] == 0)
            .collect::<Vec<_>>();

        while !current.is_empty() {
            let mut next = Vec::new();
            for node in &current {
                for target in self.graph.neighbors_directed(*node, Direction::Outgoing) {
                    in_degree[target.index()] -= 1;
                    if in_degree[target.index()] == 0 {
                        next.push(target);
                    }
                }
            }
            next.sort();
            next.dedup();
            layers.push(
                current
                    .iter()
                    .map(|node| self.graph[*node].subservice.as_str())
                    .collect(),
            );
            current = next;
        }
        layers
    }
}

impl fmt::Display for DependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DependencyGraph({}) {{", self.type_name)?;
        for edge in self.graph.edge_references() {
            writeln!(
                f,
                "  {} -> {} {}",
                self.graph[edge.source()].subservice,
                self.graph[edge.target()].subservice,
                edge.weight().fields
            )?;
        }
        write!(f, "}}")
    }
}

/// The fields shared by every entry point key, plus the selection sets of the non-computed
/// fields.
fn hard_requirements(config: &MergedTypeConfig) -> SelectionSet {
    let mut keys = config
        .entry_points
        .iter()
        .map(|entry_point| &entry_point.selection_set);
    let mut requires = match keys.next() {
        Some(first) => keys.fold(first.clone(), |common, key| common.intersection(key)),
        None => SelectionSet::new(),
    };
    requires.extend(&config.type_selection_set());
    requires
}
