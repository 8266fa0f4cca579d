use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use tracing::debug;

use crate::{
    capacity::{CapacitySource, HostCapacity, JobStatus},
    resource::{JobRequest, Resource},
    selector::{ResourceSelector, SelectionError, SelectionResult, SelectorType},
};

/// Picks the candidate whose host has the least memory in use by active jobs.
///
/// Ties are broken by the number of active jobs, then by resource id. When a per-host
/// memory limit is configured, hosts that cannot fit the job's requested memory are
/// skipped.
pub struct LeastLoadedSelector {
    capacity: Arc<dyn CapacitySource>,
    statuses: HashSet<JobStatus>,
    max_memory_mb_per_host: Option<u64>,
}

impl LeastLoadedSelector {
    pub fn new(capacity: Arc<dyn CapacitySource>) -> Self {
        Self {
            capacity,
            statuses: JobStatus::active_statuses(),
            max_memory_mb_per_host: None,
        }
    }

    pub fn with_max_memory_mb_per_host(mut self, max_memory_mb: Option<u64>) -> Self {
        self.max_memory_mb_per_host = max_memory_mb;
        self
    }

    fn fits(&self, load: &HostCapacity, requested_memory_mb: u64) -> bool {
        match self.max_memory_mb_per_host {
            None => true,
            Some(max) => load.memory_used_mb.saturating_add(requested_memory_mb) <= max,
        }
    }
}

#[async_trait]
impl<R: Resource> ResourceSelector<R> for LeastLoadedSelector {
    fn selector_type(&self) -> SelectorType {
        SelectorType::LEAST_LOADED
    }

    #[tracing::instrument(name = "LeastLoadedSelector::select", skip_all, fields(
        %job_id
    ))]
    async fn select(
        &self,
        candidates: &[R],
        job_request: &JobRequest,
        job_id: &str,
    ) -> Result<SelectionResult<R>, SelectionError> {
        let requested_memory_mb = job_request.requested_memory_mb.unwrap_or(0);

        let mut best: Option<(&R, HostCapacity)> = None;

        for candidate in candidates {
            let load = self
                .capacity
                .host_capacity(candidate.hostname(), &self.statuses)
                .await?;

            debug!(resource_id = candidate.id(), ?load, "candidate load");

            if !self.fits(&load, requested_memory_mb) {
                continue;
            }

            let is_better = match &best {
                None => true,
                Some((current, current_load)) => {
                    (load.memory_used_mb, load.active_jobs, candidate.id())
                        < (
                            current_load.memory_used_mb,
                            current_load.active_jobs,
                            current.id(),
                        )
                }
            };

            if is_better {
                best = Some((candidate, load));
            }
        }

        let builder = SelectionResult::builder(SelectorType::LEAST_LOADED);

        match best {
            None => Ok(builder
                .with_rationale(format!(
                    "no candidate host has {requested_memory_mb} MB of memory available"
                ))
                .build()),
            Some((selected, load)) => Ok(builder
                .with_selected_resource(selected.clone())
                .with_rationale(format!(
                    "least loaded: {} MB in use by {} active jobs on {}",
                    load.memory_used_mb, load.active_jobs, load.hostname
                ))
                .build()),
        }
    }
}
