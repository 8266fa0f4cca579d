use async_trait::async_trait;
use tracing::warn;

use crate::{
    resource::{JobRequest, Resource},
    selector::{ResourceSelector, SelectionError, SelectionResult, SelectorType},
};

/// Asks `primary` first and `secondary` only if the primary fails.
///
/// An empty selection from the primary is a valid answer and is returned as is.
pub struct FallbackSelector<P, S> {
    primary: P,
    secondary: S,
}

impl<P, S> FallbackSelector<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl<R, P, S> ResourceSelector<R> for FallbackSelector<P, S>
where
    R: Resource,
    P: ResourceSelector<R>,
    S: ResourceSelector<R>,
{
    fn selector_type(&self) -> SelectorType {
        SelectorType::FALLBACK
    }

    #[tracing::instrument(name = "FallbackSelector::select", skip_all, fields(
        %job_id
    ))]
    async fn select(
        &self,
        candidates: &[R],
        job_request: &JobRequest,
        job_id: &str,
    ) -> Result<SelectionResult<R>, SelectionError> {
        match self.primary.select(candidates, job_request, job_id).await {
            Ok(result) => Ok(result),
            Err(error) => {
                warn!(
                    ?error,
                    primary = %self.primary.selector_type(),
                    secondary = %self.secondary.selector_type(),
                    "primary selector failed, falling back"
                );

                self.secondary.select(candidates, job_request, job_id).await
            }
        }
    }
}
