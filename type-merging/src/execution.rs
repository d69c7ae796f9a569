//! Resolves merged fields: plans, delegates and merges, one dependency layer at a time.
use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use futures::future::BoxFuture;
use futures::FutureExt;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::Instrument;

use crate::batching::BatchCollector;
use crate::configuration::MergePlannerConfig;
use crate::delegate;
use crate::delegate::SubserviceRequest;
use crate::error::DelegationError;
use crate::error::FieldError;
use crate::error::PlanError;
use crate::error::ResolutionError;
use crate::json_ext::Object;
use crate::json_ext::ObjectExt;
use crate::json_ext::Value;
use crate::merge::merge;
use crate::merge::AggregateResult;
use crate::merge::ResolutionState;
use crate::merge_config::SelectionSet;
use crate::plan::MergePlan;
use crate::plan::MergeStep;
use crate::plan::PlanBuilder;
use crate::plan::StepId;
use crate::plan::StepInput;
use crate::registry::MergeRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PlanCacheKey {
    type_name: String,
    requested: SelectionSet,
    available: SelectionSet,
}

/// The entry point of the request layer.
///
/// One executor is shared by every request; each call to [`MergeExecutor::resolve_merged_entities`]
/// has its own batch collector, so that batches never span requests.
pub struct MergeExecutor {
    registry: Arc<MergeRegistry>,
    config: MergePlannerConfig,
    plan_cache: Mutex<LruCache<PlanCacheKey, Arc<MergePlan>>>,
}

/// The resolution of one entity, across layers.
struct EntityResolution {
    aggregate: AggregateResult,
    plan: Option<Arc<MergePlan>>,
    errors: Vec<FieldError>,
    failed: HashSet<StepId>,
}

type StepOutcome = (usize, StepId, Result<Value, ResolutionError>);

impl MergeExecutor {
    pub fn new(registry: Arc<MergeRegistry>, config: MergePlannerConfig) -> Self {
        let plan_cache = Mutex::new(LruCache::new(config.plan_cache.limit));
        Self {
            registry,
            config,
            plan_cache,
        }
    }

    pub fn registry(&self) -> &MergeRegistry {
        &self.registry
    }

    /// The plan completing `original_object` with the `requested` fields. Plans only depend on
    /// which fields are present, so they are cached by field names.
    pub fn plan(
        &self,
        type_name: &str,
        requested: &SelectionSet,
        original_object: &Object,
    ) -> Result<Arc<MergePlan>, PlanError> {
        let key = PlanCacheKey {
            type_name: type_name.to_string(),
            requested: requested.clone(),
            available: original_object.field_names(),
        };
        if let Some(plan) = self.plan_cache.lock().get(&key) {
            return Ok(plan.clone());
        }

        let merged_type =
            self.registry
                .lookup(type_name)
                .ok_or_else(|| PlanError::UnknownType {
                    type_name: type_name.to_string(),
                })?;
        let plan = Arc::new(PlanBuilder::new(merged_type).build(&key.requested, &key.available));
        self.plan_cache.lock().put(key, plan.clone());
        Ok(plan)
    }

    /// Resolves the requested fields of one entity.
    pub async fn resolve_merged_field(
        &self,
        type_name: &str,
        requested: &SelectionSet,
        original_object: Object,
    ) -> (AggregateResult, Vec<FieldError>) {
        let mut entity = self.start(type_name, requested, original_object);
        self.run(type_name, std::slice::from_mut(&mut entity))
            .instrument(tracing::info_span!(
                "resolve_merged_entities",
                type_name,
                entities = 1usize
            ))
            .await;
        entity.finish(requested)
    }

    /// Resolves the requested fields of several entities of one type. The entities advance
    /// through their plans in lockstep, so the batched steps of a layer share one call.
    pub async fn resolve_merged_entities(
        &self,
        type_name: &str,
        requested: &SelectionSet,
        original_objects: Vec<Object>,
    ) -> Vec<(AggregateResult, Vec<FieldError>)> {
        let span = tracing::info_span!(
            "resolve_merged_entities",
            type_name,
            entities = original_objects.len()
        );
        let mut entities = original_objects
            .into_iter()
            .map(|original_object| self.start(type_name, requested, original_object))
            .collect::<Vec<_>>();
        self.run(type_name, &mut entities).instrument(span).await;
        entities
            .into_iter()
            .map(|entity| entity.finish(requested))
            .collect()
    }

    fn start(
        &self,
        type_name: &str,
        requested: &SelectionSet,
        original_object: Object,
    ) -> EntityResolution {
        let mut aggregate = AggregateResult::new(original_object);
        match self.plan(type_name, requested, &aggregate.data) {
            Ok(plan) => {
                aggregate.transition(ResolutionState::AwaitingSteps);
                EntityResolution {
                    aggregate,
                    errors: plan.errors(),
                    plan: Some(plan),
                    failed: HashSet::new(),
                }
            }
            Err(error) => EntityResolution {
                aggregate,
                plan: None,
                errors: requested
                    .iter()
                    .map(|field| FieldError::new(field.as_str(), error.clone()))
                    .collect(),
                failed: HashSet::new(),
            },
        }
    }

    async fn run(&self, type_name: &str, entities: &mut [EntityResolution]) {
        let layer_count = entities
            .iter()
            .filter_map(|entity| entity.plan.as_ref())
            .map(|plan| plan.layer_count())
            .max()
            .unwrap_or_default();
        for layer in 0..layer_count {
            tracing::debug!(type_name, layer, "planning pass");
            self.run_layer(layer, entities).await;
        }
    }

    /// Issues every eligible step of `layer`, then merges the results in step order.
    async fn run_layer(&self, layer: usize, entities: &mut [EntityResolution]) {
        let collector = BatchCollector::new(self.config.batching.clone());
        let mut pending: Vec<BoxFuture<'static, StepOutcome>> = Vec::new();

        for (index, entity) in entities.iter_mut().enumerate() {
            let Some(plan) = entity.plan.clone() else {
                continue;
            };
            for step in plan.layer(layer) {
                if step.depends_on.iter().any(|id| entity.failed.contains(id)) {
                    entity.fail(step, step.dependency_failed().into());
                    continue;
                }
                let Some(subservice) = self.registry.subservice(&step.subservice).cloned() else {
                    entity.fail(step, unknown_subservice(step).into());
                    continue;
                };
                let step_id = step.id;
                match step.bind(&entity.aggregate.data) {
                    Err(error) => entity.fail(step, error.into()),
                    Ok(StepInput::Single {
                        args,
                        representation,
                    }) => {
                        let request = SubserviceRequest {
                            selection_set: step.selection_set.clone(),
                            field_name: step.field_name().to_string(),
                            args,
                            representations: vec![representation],
                        };
                        pending.push(
                            async move {
                                let result = delegate::execute(&subservice, request)
                                    .await
                                    .map_err(ResolutionError::from);
                                (index, step_id, result)
                            }
                            .boxed(),
                        );
                    }
                    Ok(StepInput::Batch {
                        key,
                        representation,
                    }) => {
                        let waiter = collector.offer(&subservice, step, key, representation);
                        let dropped = batch_dropped(step);
                        pending.push(
                            async move {
                                let result = waiter
                                    .await
                                    .unwrap_or_else(|_| Err(ResolutionError::from(dropped)));
                                (index, step_id, result)
                            }
                            .boxed(),
                        );
                    }
                }
            }
        }
        tracing::debug!(
            layer,
            steps = pending.len(),
            batched = collector.pending(),
            "issuing merge steps"
        );

        let ((), outcomes) = futures::join!(collector.flush(), join_all(pending));

        for (index, step_id, result) in outcomes {
            let Some(entity) = entities.get_mut(index) else {
                continue;
            };
            let Some(plan) = entity.plan.clone() else {
                continue;
            };
            let Some(step) = plan.step(step_id) else {
                continue;
            };
            match result {
                Ok(value) => {
                    let errors = merge(&mut entity.aggregate.data, value, step);
                    if !errors.is_empty() {
                        entity.failed.insert(step_id);
                        entity.errors.extend(errors);
                    }
                }
                Err(error) => entity.fail(step, error),
            }
        }
    }
}

impl EntityResolution {
    /// Every output field of the step gets the error, and the steps after it will be skipped.
    fn fail(&mut self, step: &MergeStep, error: ResolutionError) {
        tracing::debug!(
            step = %step.id,
            subservice = %step.subservice,
            %error,
            "merge step failed"
        );
        self.failed.insert(step.id);
        self.errors.extend(
            step.output
                .iter()
                .map(|field| FieldError::new(field.as_str(), error.clone())),
        );
    }

    /// Only errors of requested fields are reported; intermediate fields surface through the
    /// requested fields that depended on them.
    fn finish(mut self, requested: &SelectionSet) -> (AggregateResult, Vec<FieldError>) {
        let errors = self
            .errors
            .into_iter()
            .filter(|error| requested.contains(&error.field))
            .collect::<Vec<_>>();
        self.aggregate.transition(if errors.is_empty() {
            ResolutionState::Complete
        } else {
            ResolutionState::PartialFailure
        });
        (self.aggregate, errors)
    }
}

fn unknown_subservice(step: &MergeStep) -> DelegationError {
    DelegationError {
        subservice: step.subservice.clone(),
        field_name: step.field_name().to_string(),
        cause: "subservice has no executor".to_string(),
    }
}

fn batch_dropped(step: &MergeStep) -> DelegationError {
    DelegationError {
        subservice: step.subservice.clone(),
        field_name: step.field_name().to_string(),
        cause: "batch was dropped before it completed".to_string(),
    }
}
