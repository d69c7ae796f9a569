use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json_bytes::Value;
use tower::BoxError;
use type_merging::json_ext::Object;
use type_merging::ArgsBuilder;
use type_merging::ArgumentValue;
use type_merging::EntryPoint;
use type_merging::KeyExtractor;
use type_merging::SelectionSet;
use type_merging::SubserviceExecutor;
use type_merging::SubserviceRequest;
use type_merging::ValuesFromResults;

type Handler = dyn Fn(&SubserviceRequest) -> Result<Value, BoxError> + Send + Sync;

/// A subservice answering with `handler` and recording every request it receives.
pub(crate) struct Recorder {
    calls: Mutex<Vec<SubserviceRequest>>,
    handler: Box<Handler>,
}

impl Recorder {
    pub(crate) fn new(
        handler: impl Fn(&SubserviceRequest) -> Result<Value, BoxError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        })
    }

    pub(crate) fn calls(&self) -> Vec<SubserviceRequest> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SubserviceExecutor for Recorder {
    async fn execute(&self, request: SubserviceRequest) -> Result<Value, BoxError> {
        let result = (self.handler)(&request);
        self.calls.lock().push(request);
        result
    }
}

pub(crate) fn object(value: Value) -> Object {
    match value {
        Value::Object(object) => object,
        other => panic!("expected an object, got {other:?}"),
    }
}

pub(crate) fn selection(fields: &str) -> SelectionSet {
    fields.parse().unwrap()
}

/// A singular lookup passing the `id` of the entity.
pub(crate) fn by_id(field_name: &str) -> EntryPoint {
    EntryPoint::singular(
        selection("{ id }"),
        field_name,
        ArgsBuilder::from_original_object([("id", ArgumentValue::Field("id".to_string()))]),
    )
}

/// A batched lookup by `id`, with results correlated by `result_key`.
pub(crate) fn batched_by_id(field_name: &str, argument: &str, result_key: &str) -> EntryPoint {
    EntryPoint::batched(selection("{ id }"), field_name, argument).with_values_from_results(
        ValuesFromResults::ByKey {
            key: Some(KeyExtractor::Field(result_key.to_string())),
        },
    )
}

/// The list argument of a batched call.
pub(crate) fn keys(request: &SubserviceRequest, argument: &str) -> Vec<Value> {
    match request.args.get(argument) {
        Some(Value::Array(keys)) => keys.clone(),
        _ => Vec::new(),
    }
}
