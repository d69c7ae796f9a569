//! The boundary to the subservices.
//!
//! Executing a query against a subservice is not this crate's business: each subservice comes
//! with a [`SubserviceExecutor`], and every delegated call goes through [`execute`], which only
//! instruments the call and wraps its failure. Retry policy belongs to the executor.
use std::fmt;
use std::sync::Arc;
use std::task::Poll;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tower::BoxError;
use tower::Service;
use tower::ServiceExt;
use tracing::Instrument;

use crate::error::DelegationError;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::merge_config::SelectionSet;

/// One delegated subquery.
#[derive(Debug, Clone, PartialEq)]
pub struct SubserviceRequest {
    /// The fields of the merged type to select on the entry point result.
    pub selection_set: SelectionSet,
    /// The entry point field.
    pub field_name: String,
    pub args: Object,
    /// The entities the call is made for, projected onto the fields the subservice requires.
    /// Batched calls carry one representation per key, in key order.
    pub representations: Vec<Object>,
}

/// Executes queries against one subservice.
///
/// A singular call resolves to an object or null, a batched call to a list of objects or nulls.
#[async_trait]
pub trait SubserviceExecutor: Send + Sync {
    async fn execute(&self, request: SubserviceRequest) -> Result<Value, BoxError>;
}

/// A named subservice and its executor.
#[derive(Clone)]
pub struct Subservice {
    name: Arc<str>,
    executor: Arc<dyn SubserviceExecutor>,
}

impl fmt::Debug for Subservice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subservice")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Subservice {
    pub fn new(name: &str, executor: Arc<dyn SubserviceExecutor>) -> Self {
        Self {
            name: name.into(),
            executor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Adapts a [`tower::Service`] into a [`SubserviceExecutor`].
#[derive(Clone)]
pub struct TowerExecutor<S> {
    service: S,
}

impl<S> TowerExecutor<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> SubserviceExecutor for TowerExecutor<S>
where
    S: Service<SubserviceRequest, Response = Value> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
{
    async fn execute(&self, request: SubserviceRequest) -> Result<Value, BoxError> {
        self.service.clone().oneshot(request).await.map_err(Into::into)
    }
}

/// Lets an executor be layered like any other service.
impl Service<SubserviceRequest> for Subservice {
    type Response = Value;
    type Error = DelegationError;
    type Future = BoxFuture<'static, Result<Value, DelegationError>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: SubserviceRequest) -> Self::Future {
        let subservice = self.clone();
        Box::pin(async move { execute(&subservice, request).await })
    }
}

/// Executes one delegated call, wrapping its failure.
pub(crate) async fn execute(
    subservice: &Subservice,
    request: SubserviceRequest,
) -> Result<Value, DelegationError> {
    let field_name = request.field_name.clone();
    let span = tracing::debug_span!(
        "delegate",
        subservice = %subservice.name(),
        field_name = %field_name,
        representations = request.representations.len(),
    );
    subservice
        .executor
        .execute(request)
        .instrument(span)
        .await
        .map_err(|cause| DelegationError {
            subservice: subservice.name().to_string(),
            field_name,
            cause: cause.to_string(),
        })
}
