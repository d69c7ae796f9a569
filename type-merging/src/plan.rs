//! Merge plans: the delegated subqueries that complete one entity, in dependency order.
use std::fmt;

use indexmap::IndexMap;
use itertools::Itertools;
use tracing::instrument;

use crate::error::FieldError;
use crate::error::PlanError;
use crate::json_ext::Object;
use crate::json_ext::ObjectExt;
use crate::json_ext::Value;
use crate::merge_config::EntryPoint;
use crate::merge_config::SelectionSet;
use crate::registry::MergedType;
use crate::resolver;
use crate::resolver::Obligation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepId(pub usize);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the output of a step is resolved for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StepScope {
    /// Ordinary fields, resolved from the entity.
    Type,
    /// Computed fields, resolved in their own call from a representation carrying their
    /// selection set.
    Computed { selection_set: SelectionSet },
}

/// One delegated subquery against one subservice.
#[derive(Debug, Clone)]
pub struct MergeStep {
    pub(crate) id: StepId,
    pub(crate) layer: usize,
    pub(crate) subservice: String,
    pub(crate) entry_point: EntryPoint,
    /// The fields selected on the call: the output, plus the result key when batched results
    /// are correlated by key.
    pub(crate) selection_set: SelectionSet,
    /// The fields this step supplies to the entity.
    pub(crate) output: SelectionSet,
    pub(crate) non_nullable: SelectionSet,
    pub(crate) requires: SelectionSet,
    pub(crate) depends_on: Vec<StepId>,
    pub(crate) scope: StepScope,
}

/// A step bound to the entity it runs for.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StepInput {
    Single { args: Object, representation: Object },
    Batch { key: Value, representation: Object },
}

impl MergeStep {
    pub fn id(&self) -> StepId {
        self.id
    }

    pub fn layer(&self) -> usize {
        self.layer
    }

    pub fn subservice(&self) -> &str {
        &self.subservice
    }

    pub fn field_name(&self) -> &str {
        &self.entry_point.field_name
    }

    pub fn selection_set(&self) -> &SelectionSet {
        &self.selection_set
    }

    pub fn output(&self) -> &SelectionSet {
        &self.output
    }

    pub fn requires(&self) -> &SelectionSet {
        &self.requires
    }

    pub fn depends_on(&self) -> &[StepId] {
        &self.depends_on
    }

    pub fn scope(&self) -> &StepScope {
        &self.scope
    }

    pub fn is_batched(&self) -> bool {
        self.entry_point.is_batched()
    }

    /// Binds the step to the entity as assembled so far.
    ///
    /// A step is never issued without every field it requires: the representation it sends is
    /// exactly the projection of the entity onto those fields.
    pub(crate) fn bind(&self, aggregate: &Object) -> Result<StepInput, PlanError> {
        let missing = aggregate.missing(&self.requires);
        if !missing.is_empty() {
            return Err(self.missing_requirements(&missing));
        }
        let representation = aggregate.project(&self.requires);

        if self.is_batched() {
            let key = self
                .entry_point
                .key_extractor()
                .extract(aggregate)
                .ok_or_else(|| PlanError::MissingKey {
                    subservice: self.subservice.clone(),
                    field_name: self.field_name().to_string(),
                })?;
            return Ok(StepInput::Batch {
                key,
                representation,
            });
        }

        let args = self
            .entry_point
            .args()
            .build_from_object(aggregate, &representation)
            .map_err(|field| {
                self.missing_requirements(&std::iter::once(field.as_str()).collect())
            })?;
        Ok(StepInput::Single {
            args,
            representation,
        })
    }

    fn missing_requirements(&self, missing: &SelectionSet) -> PlanError {
        PlanError::MissingRequirements {
            subservice: self.subservice.clone(),
            field_name: self.field_name().to_string(),
            missing: missing.to_string(),
        }
    }

    pub(crate) fn dependency_failed(&self) -> PlanError {
        PlanError::DependencyFailed {
            subservice: self.subservice.clone(),
            field_name: self.field_name().to_string(),
        }
    }
}

impl fmt::Display for MergeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Delegate(subservice: \"{}\", field: \"{}\"",
            self.subservice,
            self.field_name()
        )?;
        if self.is_batched() {
            write!(f, ", batched")?;
        }
        if let StepScope::Computed { .. } = self.scope {
            write!(f, ", computed")?;
        }
        if !self.depends_on.is_empty() {
            write!(f, ", after: [{}]", self.depends_on.iter().join(", "))?;
        }
        write!(f, ") {} {} <- {}", self.id, self.selection_set, self.requires)
    }
}

/// The steps completing one entity, in layers.
#[derive(Debug, Clone)]
pub struct MergePlan {
    type_name: String,
    steps: Vec<MergeStep>,
    layer_count: usize,
    unsatisfiable: SelectionSet,
}

impl MergePlan {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Every step, ordered by layer.
    pub fn steps(&self) -> &[MergeStep] {
        &self.steps
    }

    pub fn step(&self, id: StepId) -> Option<&MergeStep> {
        self.steps.get(id.0)
    }

    pub fn layer_count(&self) -> usize {
        self.layer_count
    }

    /// The steps of one layer. They only depend on steps of earlier layers.
    pub fn layer(&self, layer: usize) -> impl Iterator<Item = &MergeStep> + '_ {
        self.steps.iter().filter(move |step| step.layer == layer)
    }

    /// Requested fields no step can supply.
    pub fn unsatisfiable(&self) -> &SelectionSet {
        &self.unsatisfiable
    }

    pub fn errors(&self) -> Vec<FieldError> {
        self.unsatisfiable
            .iter()
            .map(|field| {
                FieldError::new(
                    field.as_str(),
                    PlanError::Unsatisfiable {
                        type_name: self.type_name.clone(),
                        field: field.clone(),
                    },
                )
            })
            .collect()
    }
}

impl fmt::Display for MergePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MergePlan({}) {{", self.type_name)?;
        for layer in 0..self.layer_count {
            writeln!(f, "  Layer {{")?;
            for step in self.layer(layer) {
                writeln!(f, "    {step},")?;
            }
            writeln!(f, "  }},")?;
        }
        if !self.unsatisfiable.is_empty() {
            writeln!(f, "  Unsatisfiable {},", self.unsatisfiable)?;
        }
        write!(f, "}}")
    }
}

/// Turns resolved obligations into bound-at-runtime merge steps.
pub(crate) struct PlanBuilder<'a> {
    merged_type: &'a MergedType,
}

impl<'a> PlanBuilder<'a> {
    pub(crate) fn new(merged_type: &'a MergedType) -> Self {
        Self { merged_type }
    }

    #[instrument(skip_all, level = "debug", fields(type_name = %self.merged_type.type_name()))]
    pub(crate) fn build(&self, requested: &SelectionSet, available: &SelectionSet) -> MergePlan {
        let resolution = resolver::resolve(self.merged_type, requested, available);
        let mut steps = Vec::new();
        let mut suppliers: IndexMap<String, StepId> = IndexMap::new();

        for (layer, obligations) in resolution.layers.iter().enumerate() {
            let layer_steps = obligations
                .iter()
                .filter_map(|obligation| {
                    let id = StepId(steps.len());
                    let step = self.step(id, layer, obligation, &suppliers)?;
                    steps.push(step.clone());
                    Some(step)
                })
                .collect::<Vec<_>>();
            for step in layer_steps {
                for field in &step.output {
                    suppliers.insert(field.clone(), step.id);
                }
            }
        }

        let plan = MergePlan {
            type_name: self.merged_type.type_name().to_string(),
            layer_count: resolution.layers.len(),
            steps,
            unsatisfiable: resolution.unsatisfiable,
        };
        tracing::debug!(steps = plan.steps.len(), layers = plan.layer_count, "built merge plan");
        plan
    }

    fn step(
        &self,
        id: StepId,
        layer: usize,
        obligation: &Obligation,
        suppliers: &IndexMap<String, StepId>,
    ) -> Option<MergeStep> {
        let config = self.merged_type.config(obligation.config_index)?;
        let entry_point = config.entry_points.get(obligation.entry_point_index)?;

        let mut selection_set = obligation.fields.clone();
        if let Some(key) = entry_point.result_key_extractor() {
            selection_set.extend(&key.selection_set());
        }
        let non_nullable = obligation
            .fields
            .iter()
            .filter(|field| {
                config
                    .fields
                    .get(field.as_str())
                    .is_some_and(|field_config| !field_config.nullable)
            })
            .cloned()
            .collect();
        let depends_on = obligation
            .requires
            .iter()
            .filter_map(|field| suppliers.get(field.as_str()).copied())
            .sorted()
            .dedup()
            .collect();
        let scope = match &obligation.computed {
            Some(selection_set) => StepScope::Computed {
                selection_set: selection_set.clone(),
            },
            None => StepScope::Type,
        };

        Some(MergeStep {
            id,
            layer,
            subservice: config.subservice.clone(),
            entry_point: entry_point.clone(),
            selection_set,
            output: obligation.fields.clone(),
            non_nullable,
            requires: obligation.requires.clone(),
            depends_on,
            scope,
        })
    }
}
