use std::{
    panic::AssertUnwindSafe,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use futures_util::FutureExt;
use tracing::{debug, info};

use crate::{
    resource::{JobRequest, Resource},
    selector::{ensure_candidate, ResourceSelector, SelectionError, SelectionResult, SelectorType},
};

/// Rationale reported when the script selects nothing and does not say why.
pub const NULL_RATIONALE: &str = "Script returned null, no preference";

/// What a selector script returned, before it is turned into a [`SelectionResult`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptSelectionOutcome<R> {
    pub resource: Option<R>,
    pub rationale: Option<String>,
}

impl<R> ScriptSelectionOutcome<R> {
    pub fn selected(resource: R, rationale: Option<String>) -> Self {
        Self {
            resource: Some(resource),
            rationale,
        }
    }

    pub fn no_preference(rationale: Option<String>) -> Self {
        Self {
            resource: None,
            rationale,
        }
    }
}

/// Runs externally managed selection logic.
///
/// The script is untrusted. It may fail with any error, or panic. Bounding how long it
/// runs is up to the implementation.
#[async_trait]
pub trait SelectorScript<R: Resource>: Send + Sync {
    async fn select_resource(
        &self,
        candidates: &[R],
        job_request: &JobRequest,
        job_id: &str,
    ) -> anyhow::Result<ScriptSelectionOutcome<R>>;
}

/// A script that can be replaced while selections are running.
///
/// Calls already in flight finish with the script they started with.
pub struct ReloadableSelectorScript<R: Resource> {
    current: RwLock<Arc<dyn SelectorScript<R>>>,
}

impl<R: Resource> ReloadableSelectorScript<R> {
    pub fn new(script: Arc<dyn SelectorScript<R>>) -> Self {
        Self {
            current: RwLock::new(script),
        }
    }

    #[tracing::instrument(name = "ReloadableSelectorScript::replace", skip_all)]
    pub fn replace(&self, script: Arc<dyn SelectorScript<R>>) {
        let mut current = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *current = script;

        info!("selector script replaced");
    }

    fn current(&self) -> Arc<dyn SelectorScript<R>> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl<R: Resource> SelectorScript<R> for ReloadableSelectorScript<R> {
    async fn select_resource(
        &self,
        candidates: &[R],
        job_request: &JobRequest,
        job_id: &str,
    ) -> anyhow::Result<ScriptSelectionOutcome<R>> {
        let script = self.current();
        script.select_resource(candidates, job_request, job_id).await
    }
}

/// Defers the selection decision to a [`SelectorScript`].
pub struct ScriptResourceSelector<R: Resource> {
    script: Arc<dyn SelectorScript<R>>,
}

impl<R: Resource> ScriptResourceSelector<R> {
    pub fn new(script: Arc<dyn SelectorScript<R>>) -> Self {
        Self { script }
    }

    /// Runs the script, turning panics and foreign errors into [`SelectionError`].
    async fn run_script(
        &self,
        candidates: &[R],
        job_request: &JobRequest,
        job_id: &str,
    ) -> Result<ScriptSelectionOutcome<R>, SelectionError> {
        let outcome = AssertUnwindSafe(self.script.select_resource(candidates, job_request, job_id))
            .catch_unwind()
            .await
            .map_err(SelectionError::from_panic)?;

        // A script may already report a selection error, pass it through as is.
        outcome.map_err(|error| match error.downcast::<SelectionError>() {
            Ok(selection_error) => selection_error,
            Err(error) => SelectionError::Script(error),
        })
    }
}

#[async_trait]
impl<R: Resource> ResourceSelector<R> for ScriptResourceSelector<R> {
    fn selector_type(&self) -> SelectorType {
        SelectorType::SCRIPT
    }

    #[tracing::instrument(name = "ScriptResourceSelector::select", skip_all, fields(
        %job_id,
        candidates = candidates.len()
    ))]
    async fn select(
        &self,
        candidates: &[R],
        job_request: &JobRequest,
        job_id: &str,
    ) -> Result<SelectionResult<R>, SelectionError> {
        debug!(?candidates, "asking script to select a resource");

        let outcome = self.run_script(candidates, job_request, job_id).await?;
        let builder = SelectionResult::builder(SelectorType::SCRIPT);

        match outcome.resource {
            None => {
                let rationale = outcome
                    .rationale
                    .unwrap_or_else(|| NULL_RATIONALE.to_owned());
                debug!(%rationale, "script selected no resource");

                Ok(builder.with_rationale(rationale).build())
            }
            Some(resource) => {
                ensure_candidate(candidates, &resource)?;
                debug!(resource_id = resource.id(), "script selected a resource");

                Ok(builder
                    .with_selected_resource(resource)
                    .with_optional_rationale(outcome.rationale)
                    .build())
            }
        }
    }
}
