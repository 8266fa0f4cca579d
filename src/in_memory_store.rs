use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::Path,
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;

use crate::capacity::{
    CapacityError, CapacitySource, JobRecord, JobStatus, UserJobResourcesAggregate,
};

/// Job records kept in memory, keyed by unique id.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: impl IntoIterator<Item = JobRecord>) -> Self {
        Self {
            jobs: RwLock::new(
                jobs.into_iter()
                    .map(|job| (job.unique_id.clone(), job))
                    .collect(),
            ),
        }
    }

    /// Reads a YAML list of job records.
    #[tracing::instrument(name = "InMemoryJobStore::from_file", skip_all, fields(
        file_path = ?file_path.as_ref()
    ))]
    pub async fn from_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let file_contents = tokio::fs::read_to_string(file_path.as_ref()).await?;

        let jobs: Vec<JobRecord> = serde_yaml::from_str(&file_contents)?;

        info!(jobs = jobs.len(), "loaded job records");

        Ok(Self::with_jobs(jobs))
    }

    pub async fn insert(&self, job: JobRecord) -> Option<JobRecord> {
        self.jobs.write().await.insert(job.unique_id.clone(), job)
    }

    /// Returns false if there is no job with `unique_id`.
    pub async fn update_status(&self, unique_id: &str, status: JobStatus) -> bool {
        match self.jobs.write().await.get_mut(unique_id) {
            None => false,
            Some(job) => {
                job.status = status;
                true
            }
        }
    }

    pub async fn remove(&self, unique_id: &str) -> Option<JobRecord> {
        self.jobs.write().await.remove(unique_id)
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

fn on_host(job: &JobRecord, hostname: &str, statuses: &HashSet<JobStatus>) -> bool {
    job.agent_hostname.as_deref() == Some(hostname) && statuses.contains(&job.status)
}

#[async_trait]
impl CapacitySource for InMemoryJobStore {
    #[tracing::instrument(name = "InMemoryJobStore::total_memory_used_on_host", skip_all, fields(
        %hostname
    ))]
    async fn total_memory_used_on_host(
        &self,
        hostname: &str,
        statuses: &HashSet<JobStatus>,
    ) -> Result<u64, CapacityError> {
        let jobs = self.jobs.read().await;

        Ok(jobs
            .values()
            .filter(|job| on_host(job, hostname, statuses))
            .map(|job| job.memory_used_mb.unwrap_or(0))
            .sum())
    }

    #[tracing::instrument(name = "InMemoryJobStore::count_jobs_on_host", skip_all, fields(
        %hostname
    ))]
    async fn count_jobs_on_host(
        &self,
        hostname: &str,
        statuses: &HashSet<JobStatus>,
    ) -> Result<u64, CapacityError> {
        let jobs = self.jobs.read().await;

        Ok(jobs
            .values()
            .filter(|job| on_host(job, hostname, statuses))
            .count() as u64)
    }

    async fn count_jobs_by_user_and_status_in(
        &self,
        user: &str,
        statuses: &HashSet<JobStatus>,
    ) -> Result<u64, CapacityError> {
        if user.trim().is_empty() {
            return Err(CapacityError::InvalidArgument(
                "user must not be blank".to_owned(),
            ));
        }
        if statuses.is_empty() {
            return Err(CapacityError::InvalidArgument(
                "at least one status is required".to_owned(),
            ));
        }

        let jobs = self.jobs.read().await;

        Ok(jobs
            .values()
            .filter(|job| job.user == user && statuses.contains(&job.status))
            .count() as u64)
    }

    async fn user_job_resources_aggregates(
        &self,
    ) -> Result<Vec<UserJobResourcesAggregate>, CapacityError> {
        let jobs = self.jobs.read().await;

        let mut by_user: BTreeMap<&str, UserJobResourcesAggregate> = BTreeMap::new();

        for job in jobs
            .values()
            .filter(|job| job.status == JobStatus::Running && !job.agent_managed)
        {
            let aggregate =
                by_user
                    .entry(job.user.as_str())
                    .or_insert_with(|| UserJobResourcesAggregate {
                        user: job.user.clone(),
                        running_jobs_count: 0,
                        used_memory_mb: 0,
                    });
            aggregate.running_jobs_count += 1;
            aggregate.used_memory_mb += job.memory_used_mb.unwrap_or(0);
        }

        Ok(by_user.into_values().collect())
    }

    #[tracing::instrument(name = "InMemoryJobStore::find_jobs_created_before", skip_all, fields(
        %threshold,
        batch_size = batch_size
    ))]
    async fn find_jobs_created_before(
        &self,
        threshold: DateTime<Utc>,
        excluded_statuses: &HashSet<JobStatus>,
        batch_size: usize,
    ) -> Result<Vec<i64>, CapacityError> {
        let jobs = self.jobs.read().await;

        let mut ids: Vec<i64> = jobs
            .values()
            .filter(|job| job.created < threshold && !excluded_statuses.contains(&job.status))
            .map(|job| job.id)
            .collect();

        ids.sort_unstable();
        ids.truncate(batch_size);

        Ok(ids)
    }

    async fn agent_job_ids_with_status_in(
        &self,
        statuses: &HashSet<JobStatus>,
    ) -> Result<HashSet<String>, CapacityError> {
        if statuses.is_empty() {
            return Err(CapacityError::InvalidArgument(
                "at least one status is required".to_owned(),
            ));
        }

        let jobs = self.jobs.read().await;

        Ok(jobs
            .values()
            .filter(|job| job.agent_managed && statuses.contains(&job.status))
            .map(|job| job.unique_id.clone())
            .collect())
    }

    async fn job_status(&self, unique_id: &str) -> Result<Option<JobStatus>, CapacityError> {
        Ok(self.jobs.read().await.get(unique_id).map(|job| job.status))
    }

    async fn job_hostname(&self, unique_id: &str) -> Result<Option<String>, CapacityError> {
        Ok(self
            .jobs
            .read()
            .await
            .get(unique_id)
            .and_then(|job| job.agent_hostname.clone()))
    }
}
