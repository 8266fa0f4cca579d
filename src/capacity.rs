use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Reserved,
    Resolved,
    Accepted,
    Claimed,
    Init,
    Running,
    Succeeded,
    Killed,
    Failed,
    Invalid,
}

impl JobStatus {
    pub const ACTIVE: [JobStatus; 6] = [
        JobStatus::Reserved,
        JobStatus::Resolved,
        JobStatus::Accepted,
        JobStatus::Claimed,
        JobStatus::Init,
        JobStatus::Running,
    ];

    pub const FINISHED: [JobStatus; 4] = [
        JobStatus::Succeeded,
        JobStatus::Killed,
        JobStatus::Failed,
        JobStatus::Invalid,
    ];

    pub fn active_statuses() -> HashSet<JobStatus> {
        Self::ACTIVE.into_iter().collect()
    }

    pub fn finished_statuses() -> HashSet<JobStatus> {
        Self::FINISHED.into_iter().collect()
    }
}

/// A job as seen by capacity accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Store-assigned numeric id.
    pub id: i64,
    pub unique_id: String,
    pub user: String,
    pub status: JobStatus,
    #[serde(default)]
    pub agent_hostname: Option<String>,
    #[serde(default)]
    pub memory_used_mb: Option<u64>,
    pub created: DateTime<Utc>,
    /// Whether the job runs under an agent rather than embedded in a server.
    #[serde(default)]
    pub agent_managed: bool,
}

/// Load on a single host for some set of statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostCapacity {
    pub hostname: String,
    pub memory_used_mb: u64,
    pub active_jobs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserJobResourcesAggregate {
    pub user: String,
    pub running_jobs_count: u64,
    pub used_memory_mb: u64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CapacityError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("capacity store unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of the load jobs put on hosts and users.
///
/// Results are best effort: they are not consistent with selections happening
/// concurrently.
#[async_trait]
pub trait CapacitySource: Send + Sync {
    /// Total memory in MB used by jobs on `hostname` in any of `statuses`. 0 when there are none.
    async fn total_memory_used_on_host(
        &self,
        hostname: &str,
        statuses: &HashSet<JobStatus>,
    ) -> Result<u64, CapacityError>;

    async fn count_jobs_on_host(
        &self,
        hostname: &str,
        statuses: &HashSet<JobStatus>,
    ) -> Result<u64, CapacityError>;

    async fn host_capacity(
        &self,
        hostname: &str,
        statuses: &HashSet<JobStatus>,
    ) -> Result<HostCapacity, CapacityError> {
        let memory_used_mb = self.total_memory_used_on_host(hostname, statuses).await?;
        let active_jobs = self.count_jobs_on_host(hostname, statuses).await?;

        Ok(HostCapacity {
            hostname: hostname.to_owned(),
            memory_used_mb,
            active_jobs,
        })
    }

    async fn count_jobs_by_user_and_status_in(
        &self,
        user: &str,
        statuses: &HashSet<JobStatus>,
    ) -> Result<u64, CapacityError>;

    /// Running jobs grouped by user. Agent-managed jobs are not included.
    async fn user_job_resources_aggregates(
        &self,
    ) -> Result<Vec<UserJobResourcesAggregate>, CapacityError>;

    /// Ids of at most `batch_size` jobs created strictly before `threshold` whose status is
    /// not in `excluded_statuses`, in ascending order.
    async fn find_jobs_created_before(
        &self,
        threshold: DateTime<Utc>,
        excluded_statuses: &HashSet<JobStatus>,
        batch_size: usize,
    ) -> Result<Vec<i64>, CapacityError>;

    async fn agent_job_ids_with_status_in(
        &self,
        statuses: &HashSet<JobStatus>,
    ) -> Result<HashSet<String>, CapacityError>;

    async fn job_status(&self, unique_id: &str) -> Result<Option<JobStatus>, CapacityError>;

    async fn job_hostname(&self, unique_id: &str) -> Result<Option<String>, CapacityError>;
}
