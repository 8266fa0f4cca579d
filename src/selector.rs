use std::{any::Any, fmt, sync::Arc};

use async_trait::async_trait;
use serde::Serialize;

use crate::{
    capacity::CapacityError,
    resource::{JobRequest, Resource},
};

/// Identifies the strategy that produced a [`SelectionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SelectorType(&'static str);

impl SelectorType {
    pub const SCRIPT: SelectorType = SelectorType("script");
    pub const ROUND_ROBIN: SelectorType = SelectorType("round_robin");
    pub const LEAST_LOADED: SelectorType = SelectorType("least_loaded");
    pub const FALLBACK: SelectorType = SelectorType("fallback");

    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for SelectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Outcome of one selection call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionResult<R> {
    selected_resource: Option<R>,
    rationale: Option<String>,
    selector_type: SelectorType,
}

impl<R> SelectionResult<R> {
    pub fn builder(selector_type: SelectorType) -> SelectionResultBuilder<R> {
        SelectionResultBuilder {
            selected_resource: None,
            rationale: None,
            selector_type,
        }
    }

    pub fn selected_resource(&self) -> Option<&R> {
        self.selected_resource.as_ref()
    }

    pub fn rationale(&self) -> Option<&str> {
        self.rationale.as_deref()
    }

    pub fn selector_type(&self) -> SelectorType {
        self.selector_type
    }

    pub fn into_parts(self) -> (Option<R>, Option<String>, SelectorType) {
        (self.selected_resource, self.rationale, self.selector_type)
    }
}

#[derive(Debug)]
pub struct SelectionResultBuilder<R> {
    selected_resource: Option<R>,
    rationale: Option<String>,
    selector_type: SelectorType,
}

impl<R> SelectionResultBuilder<R> {
    pub fn with_selected_resource(mut self, resource: R) -> Self {
        self.selected_resource = Some(resource);
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    pub fn with_optional_rationale(mut self, rationale: Option<String>) -> Self {
        self.rationale = rationale;
        self
    }

    pub fn build(self) -> SelectionResult<R> {
        SelectionResult {
            selected_resource: self.selected_resource,
            rationale: self.rationale,
            selector_type: self.selector_type,
        }
    }
}

/// The selection could not be completed.
#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("no candidate resources were supplied")]
    NoCandidates,
    #[error("job id must not be blank")]
    InvalidJobId,
    #[error("selected resource {id} is not one of the candidates")]
    UnknownResource { id: String },
    #[error("selector script failed: {0}")]
    Script(#[source] anyhow::Error),
    #[error("selector panicked: {0}")]
    Panicked(String),
    #[error("unable to read capacity: {0}")]
    Capacity(#[from] CapacityError),
}

impl SelectionError {
    /// Short classification used to tag failed selections.
    pub fn kind(&self) -> &'static str {
        match self {
            SelectionError::NoCandidates => "no_candidates",
            SelectionError::InvalidJobId => "invalid_job_id",
            SelectionError::UnknownResource { .. } => "unknown_resource",
            SelectionError::Script(_) => "script",
            SelectionError::Panicked(_) => "panicked",
            SelectionError::Capacity(_) => "capacity",
        }
    }

    /// Turns a caught panic payload into an error.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_owned()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "unknown panic payload".to_owned()
        };

        SelectionError::Panicked(message)
    }
}

/// Picks at most one resource out of a set of candidates for a job.
///
/// Implementations treat `candidates` as a set and must never return a resource that is
/// not part of it. Any internal failure is reported as a [`SelectionError`].
#[async_trait]
pub trait ResourceSelector<R: Resource>: Send + Sync {
    fn selector_type(&self) -> SelectorType;

    async fn select(
        &self,
        candidates: &[R],
        job_request: &JobRequest,
        job_id: &str,
    ) -> Result<SelectionResult<R>, SelectionError>;
}

#[async_trait]
impl<R, S> ResourceSelector<R> for Box<S>
where
    R: Resource,
    S: ResourceSelector<R> + ?Sized,
{
    fn selector_type(&self) -> SelectorType {
        (**self).selector_type()
    }

    async fn select(
        &self,
        candidates: &[R],
        job_request: &JobRequest,
        job_id: &str,
    ) -> Result<SelectionResult<R>, SelectionError> {
        (**self).select(candidates, job_request, job_id).await
    }
}

#[async_trait]
impl<R, S> ResourceSelector<R> for Arc<S>
where
    R: Resource,
    S: ResourceSelector<R> + ?Sized,
{
    fn selector_type(&self) -> SelectorType {
        (**self).selector_type()
    }

    async fn select(
        &self,
        candidates: &[R],
        job_request: &JobRequest,
        job_id: &str,
    ) -> Result<SelectionResult<R>, SelectionError> {
        (**self).select(candidates, job_request, job_id).await
    }
}

/// Returns an error unless `selected` has the id of one of `candidates`.
pub fn ensure_candidate<R: Resource>(candidates: &[R], selected: &R) -> Result<(), SelectionError> {
    if candidates
        .iter()
        .any(|candidate| candidate.id() == selected.id())
    {
        Ok(())
    } else {
        Err(SelectionError::UnknownResource {
            id: selected.id().to_owned(),
        })
    }
}
