//! Decides which subservices to visit, and in what order, to supply the requested fields of an
//! entity.
//!
//! The resolver works on field names only. Starting from the fields present on the original
//! object, it repeatedly picks, for every field still needed, the cheapest way to supply it. A
//! provider is eligible once everything it requires is known; eligible providers form the next
//! layer. Providers that still miss something pull the missing fields into the plan as
//! intermediate obligations.
use indexmap::IndexMap;
use tracing::instrument;

use crate::merge_config::MergedTypeConfig;
use crate::merge_config::SelectionSet;
use crate::registry::MergedType;

/// One visit to one subservice, supplying `fields`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Obligation {
    pub(crate) config_index: usize,
    pub(crate) entry_point_index: usize,
    pub(crate) fields: SelectionSet,
    /// The fields the representation must carry.
    pub(crate) requires: SelectionSet,
    /// Set for the field-scoped visit of computed fields sharing this selection set.
    pub(crate) computed: Option<SelectionSet>,
}

#[derive(Debug, Default)]
pub(crate) struct Resolution {
    pub(crate) layers: Vec<Vec<Obligation>>,
    /// Requested fields no reachable subservice can supply.
    pub(crate) unsatisfiable: SelectionSet,
}

#[derive(Debug, Clone)]
struct Candidate {
    config_index: usize,
    entry_point_index: usize,
    requires: SelectionSet,
    computed: Option<SelectionSet>,
}

struct Resolver<'a> {
    merged_type: &'a MergedType,
}

#[instrument(skip_all, level = "debug", fields(type_name = %merged_type.type_name()))]
pub(crate) fn resolve(
    merged_type: &MergedType,
    requested: &SelectionSet,
    available: &SelectionSet,
) -> Resolution {
    let resolver = Resolver { merged_type };
    let mut resolution = Resolution::default();
    let mut known = available.clone();
    let mut needed = requested.difference(available);

    while !needed.is_empty() {
        // Pull in everything the cheapest providers still miss before forming the layer, so
        // that independent obligations start as early as possible.
        let mut expanded = true;
        while expanded {
            expanded = false;
            for field in needed.clone().iter() {
                if let Some(candidate) = resolver.cheapest(field, &known) {
                    for missing in candidate.requires.difference(&known).iter() {
                        expanded |= needed.insert(missing.as_str());
                    }
                }
            }
        }

        let mut layer: IndexMap<(usize, usize, Option<SelectionSet>), SelectionSet> =
            IndexMap::new();
        let mut stuck = SelectionSet::new();
        for field in &needed {
            match resolver.cheapest(field, &known) {
                Some(candidate) if candidate.requires.is_subset(&known) => {
                    layer
                        .entry((
                            candidate.config_index,
                            candidate.entry_point_index,
                            candidate.computed,
                        ))
                        .or_default()
                        .insert(field.as_str());
                }
                Some(_) => {}
                None => {
                    stuck.insert(field.as_str());
                }
            }
        }
        if layer.is_empty() {
            stuck.extend(&needed);
        }
        for field in &stuck {
            needed.remove(field);
            if requested.contains(field) {
                tracing::debug!(field = %field, "unsatisfiable field");
                resolution.unsatisfiable.insert(field.as_str());
            }
        }
        if layer.is_empty() {
            break;
        }

        let obligations = layer
            .into_iter()
            .map(|((config_index, entry_point_index, computed), fields)| {
                let requires = resolver.requirements(config_index, entry_point_index, &computed);
                Obligation {
                    config_index,
                    entry_point_index,
                    fields,
                    requires,
                    computed,
                }
            })
            .collect::<Vec<_>>();
        for obligation in &obligations {
            known.extend(&obligation.fields);
            for field in &obligation.fields {
                needed.remove(field);
            }
        }
        resolution.layers.push(obligations);
    }

    tracing::debug!(
        layers = resolution.layers.len(),
        unsatisfiable = %resolution.unsatisfiable,
        "resolved merge obligations"
    );
    resolution
}

impl Resolver<'_> {
    fn config(&self, index: usize) -> Option<&MergedTypeConfig> {
        self.merged_type.config(index)
    }

    fn requirements(
        &self,
        config_index: usize,
        entry_point_index: usize,
        computed: &Option<SelectionSet>,
    ) -> SelectionSet {
        let Some(config) = self.config(config_index) else {
            return SelectionSet::new();
        };
        let mut requires = config
            .entry_points
            .get(entry_point_index)
            .map(|entry_point| entry_point.selection_set.clone())
            .unwrap_or_default();
        requires.extend(&config.type_selection_set());
        if let Some(computed) = computed {
            requires.extend(computed);
        }
        requires
    }

    /// Every (view, entry point) pair able to supply `field`.
    fn candidates(&self, field: &str) -> Vec<Candidate> {
        let Some(providers) = self.merged_type.graph().providers(field) else {
            return Vec::new();
        };
        let mut candidates = Vec::new();
        for config_index in providers.all() {
            let Some(config) = self.config(config_index) else {
                continue;
            };
            let computed = config
                .fields
                .get(field)
                .filter(|field_config| field_config.computed)
                .map(|field_config| field_config.selection_set.clone());
            for entry_point_index in 0..config.entry_points.len() {
                candidates.push(Candidate {
                    config_index,
                    entry_point_index,
                    requires: self.requirements(config_index, entry_point_index, &computed),
                    computed: computed.clone(),
                });
            }
        }
        candidates
    }

    /// The reachable candidate with the fewest transitively unresolved fields. Ties go to the
    /// view declared first, then to the entry point declared first.
    fn cheapest(&self, field: &str, known: &SelectionSet) -> Option<Candidate> {
        let mut visiting = vec![field.to_string()];
        self.candidates(field)
            .into_iter()
            .filter_map(|candidate| {
                let missing = candidate.requires.difference(known);
                self.cost(&missing, known, &mut visiting)
                    .map(|cost| (cost, candidate))
            })
            .min_by_key(|(cost, candidate)| {
                (*cost, candidate.config_index, candidate.entry_point_index)
            })
            .map(|(_, candidate)| candidate)
    }

    /// Counts the fields that must be fetched before `missing` is known, or `None` when one of
    /// them cannot be reached at all.
    fn cost(
        &self,
        missing: &SelectionSet,
        known: &SelectionSet,
        visiting: &mut Vec<String>,
    ) -> Option<usize> {
        let mut total = 0;
        for field in missing {
            if visiting.contains(field) {
                return None;
            }
            visiting.push(field.clone());
            let cheapest = self
                .candidates(field)
                .into_iter()
                .filter_map(|candidate| {
                    let missing = candidate.requires.difference(known);
                    self.cost(&missing, known, visiting)
                })
                .min();
            visiting.pop();
            total += 1 + cheapest?;
        }
        Some(total)
    }
}
