use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::{
    resource::{JobRequest, Resource},
    selector::{ResourceSelector, SelectionError, SelectionResult, SelectorType},
};

/// Hands out candidates in turn, ordered by id.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    next: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<R: Resource> ResourceSelector<R> for RoundRobinSelector {
    fn selector_type(&self) -> SelectorType {
        SelectorType::ROUND_ROBIN
    }

    #[tracing::instrument(name = "RoundRobinSelector::select", skip_all, fields(
        %job_id
    ))]
    async fn select(
        &self,
        candidates: &[R],
        _job_request: &JobRequest,
        job_id: &str,
    ) -> Result<SelectionResult<R>, SelectionError> {
        let mut ordered: Vec<&R> = candidates.iter().collect();
        ordered.sort_by(|a, b| a.id().cmp(b.id()));

        if ordered.is_empty() {
            return Err(SelectionError::NoCandidates);
        }

        let position = self.next.fetch_add(1, Ordering::Relaxed) % ordered.len();
        let selected = ordered[position].clone();

        debug!(resource_id = selected.id(), position, "selected resource in turn");

        Ok(SelectionResult::builder(SelectorType::ROUND_ROBIN)
            .with_selected_resource(selected)
            .with_rationale("round robin")
            .build())
    }
}
