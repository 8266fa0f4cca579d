use std::{panic::AssertUnwindSafe, sync::Arc, time::Instant};

use async_trait::async_trait;
use futures_util::FutureExt;
use tracing::{debug, error};

use crate::{
    metrics::{tag_keys, tag_values, MeasurementSink, TagSet, SELECT_TIMER_NAME},
    resource::{JobRequest, Resource},
    selector::{ensure_candidate, ResourceSelector, SelectionError, SelectionResult, SelectorType},
};

/// Rationale attached to an empty selection when the strategy gave none.
pub const DEFAULT_RATIONALE: &str = "no preference";

/// Records the duration of one selection call when dropped.
///
/// Created before the strategy runs, so the measurement is emitted exactly once on every
/// way out of the call, including errors, panics and the caller dropping the future.
struct SelectionTimer<'a> {
    sink: &'a dyn MeasurementSink,
    metric: &'a str,
    started_at: Instant,
    tags: TagSet,
}

impl<'a> SelectionTimer<'a> {
    fn start(sink: &'a dyn MeasurementSink, metric: &'a str, selector_type: SelectorType) -> Self {
        let mut tags = TagSet::new();
        tags.insert(tag_keys::SELECTOR_TYPE, selector_type.as_str());

        Self {
            sink,
            metric,
            started_at: Instant::now(),
            tags,
        }
    }
}

impl Drop for SelectionTimer<'_> {
    fn drop(&mut self) {
        if !self.tags.contains_key(tag_keys::STATUS) {
            self.tags.insert(tag_keys::STATUS, tag_values::CANCELLED);
        }

        self.sink
            .record_duration(self.metric, &self.tags, self.started_at.elapsed());
    }
}

/// Wraps any [`ResourceSelector`] with timing, outcome tags and failure logging.
pub struct InstrumentedSelector<S> {
    inner: S,
    sink: Arc<dyn MeasurementSink>,
    metric: String,
}

impl<S> InstrumentedSelector<S> {
    pub fn new(inner: S, sink: Arc<dyn MeasurementSink>) -> Self {
        Self::with_metric_name(inner, sink, SELECT_TIMER_NAME)
    }

    pub fn with_metric_name(
        inner: S,
        sink: Arc<dyn MeasurementSink>,
        metric: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            sink,
            metric: metric.into(),
        }
    }
}

impl<S> InstrumentedSelector<S> {
    async fn select_inner<R>(
        &self,
        candidates: &[R],
        job_request: &JobRequest,
        job_id: &str,
        tags: &mut TagSet,
    ) -> Result<SelectionResult<R>, SelectionError>
    where
        R: Resource,
        S: ResourceSelector<R>,
    {
        if candidates.is_empty() {
            return Err(SelectionError::NoCandidates);
        }
        if job_id.trim().is_empty() {
            return Err(SelectionError::InvalidJobId);
        }

        let result = AssertUnwindSafe(self.inner.select(candidates, job_request, job_id))
            .catch_unwind()
            .await
            .map_err(SelectionError::from_panic)??;

        let (selected, rationale, selector_type) = result.into_parts();
        let builder = SelectionResult::builder(selector_type);

        match selected {
            None => {
                let rationale = rationale.unwrap_or_else(|| DEFAULT_RATIONALE.to_owned());
                debug!(%rationale, "no resource selected");

                tags.add_success_tags();
                tags.insert(tag_keys::RESOURCE_ID, tag_values::NULL);

                Ok(builder.with_rationale(rationale).build())
            }
            Some(resource) => {
                ensure_candidate(candidates, &resource)?;

                tags.add_success_tags();
                tags.insert(tag_keys::RESOURCE_ID, resource.id());
                tags.insert(tag_keys::RESOURCE_NAME, resource.name());

                Ok(builder
                    .with_selected_resource(resource)
                    .with_optional_rationale(rationale)
                    .build())
            }
        }
    }
}

#[async_trait]
impl<R, S> ResourceSelector<R> for InstrumentedSelector<S>
where
    R: Resource,
    S: ResourceSelector<R>,
{
    fn selector_type(&self) -> SelectorType {
        self.inner.selector_type()
    }

    #[tracing::instrument(name = "InstrumentedSelector::select", skip_all, fields(
        %job_id
    ))]
    async fn select(
        &self,
        candidates: &[R],
        job_request: &JobRequest,
        job_id: &str,
    ) -> Result<SelectionResult<R>, SelectionError> {
        let selector_type = self.inner.selector_type();
        debug!(?candidates, %selector_type, "selecting resource");

        let mut timer = SelectionTimer::start(self.sink.as_ref(), &self.metric, selector_type);

        let result = self
            .select_inner(candidates, job_request, job_id, &mut timer.tags)
            .await;

        if let Err(error) = &result {
            error!(?error, "resource selection error");
            timer.tags.add_failure_tags(error.kind());
        }

        result
    }
}
