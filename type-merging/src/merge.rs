//! Folds step results into the entity being assembled.
use std::collections::HashMap;

use serde::Serialize;

use crate::error::FieldError;
use crate::error::MergeError;
use crate::json_ext::display_value;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::merge_config::KeyExtractor;
use crate::merge_config::ValuesFromResults;
use crate::plan::MergeStep;

/// Where the resolution of one entity stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionState {
    Pending,
    AwaitingSteps,
    Complete,
    /// Some requested fields did not resolve; the rest of the entity is still returned.
    PartialFailure,
}

/// The entity being assembled. Starts as the original object and gains fields as steps resolve.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    pub data: Object,
    pub state: ResolutionState,
}

impl AggregateResult {
    pub(crate) fn new(original: Object) -> Self {
        Self {
            data: original,
            state: ResolutionState::Pending,
        }
    }

    pub(crate) fn transition(&mut self, state: ResolutionState) {
        tracing::trace!(from = ?self.state, to = ?state, "resolution state");
        self.state = state;
    }
}

/// Merges the result of one step into `aggregate`.
///
/// Only the step's output fields are taken from the result, and a value the aggregate already
/// holds is kept: the first provider wins. A null on the aggregate is replaced. A null result, or
/// a null field, leaves the field absent unless it is non-nullable.
pub(crate) fn merge(aggregate: &mut Object, result: Value, step: &MergeStep) -> Vec<FieldError> {
    let mut result = match result {
        Value::Object(result) => result,
        Value::Null => Object::new(),
        _ => {
            return step
                .output
                .iter()
                .map(|field| {
                    FieldError::new(
                        field.as_str(),
                        MergeError::UnexpectedShape {
                            field: field.clone(),
                        },
                    )
                })
                .collect();
        }
    };

    let mut errors = Vec::new();
    for field in &step.output {
        match result.remove(field.as_str()) {
            Some(Value::Null) | None if step.non_nullable.contains(field) => {
                errors.push(FieldError::new(
                    field.as_str(),
                    MergeError::NullForNonNullable {
                        field: field.clone(),
                    },
                ));
            }
            Some(Value::Null) | None => {}
            Some(value) => {
                if aggregate.get(field.as_str()).is_some_and(|held| !held.is_null()) {
                    tracing::trace!(
                        field = %field,
                        step = %step.id,
                        "keeping value of an earlier provider"
                    );
                    continue;
                }
                aggregate.insert(field.as_str(), value);
            }
        }
    }
    errors
}

/// Distributes the items of a batched result to the keys they answer, in key order.
pub(crate) fn correlate_batch(
    keys: &[Value],
    result: Value,
    values_from_results: &ValuesFromResults,
    default_key: &KeyExtractor,
) -> Vec<Result<Value, MergeError>> {
    let Value::Array(items) = result else {
        return vec![Err(MergeError::MalformedBatchResult); keys.len()];
    };

    match values_from_results {
        ValuesFromResults::Positional => {
            if items.len() != keys.len() {
                return vec![
                    Err(MergeError::BatchSizeMismatch {
                        expected: keys.len(),
                        received: items.len(),
                    });
                    keys.len()
                ];
            }
            items.into_iter().map(Ok).collect()
        }
        ValuesFromResults::ByKey { key } => {
            let extractor = key.as_ref().unwrap_or(default_key);
            let mut by_key: HashMap<String, Value> = HashMap::with_capacity(items.len());
            for item in items {
                let Value::Object(object) = &item else {
                    continue;
                };
                if let Some(key) = extractor.extract(object) {
                    by_key.entry(display_value(&key)).or_insert(item);
                }
            }
            keys.iter()
                .map(|key| {
                    let key = display_value(key);
                    by_key
                        .get(&key)
                        .cloned()
                        .ok_or(MergeError::UnmatchedKey { key })
                })
                .collect()
        }
    }
}
