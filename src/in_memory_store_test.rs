use anyhow::Result;
use std::io::Write;

#[cfg(test)]
mod capacity_source_tests {
    use std::collections::HashSet;

    use chrono::{Duration, TimeZone, Utc};

    use crate::{
        capacity::{
            CapacityError, CapacitySource, HostCapacity, JobRecord, JobStatus,
            UserJobResourcesAggregate,
        },
        in_memory_store::InMemoryJobStore,
    };

    use super::*;

    fn job(id: i64, user: &str, host: Option<&str>, status: JobStatus) -> JobRecord {
        JobRecord {
            id,
            unique_id: format!("job-{id}"),
            user: user.to_owned(),
            status,
            agent_hostname: host.map(str::to_owned),
            memory_used_mb: Some(1024),
            created: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(id),
            agent_managed: false,
        }
    }

    fn store() -> InMemoryJobStore {
        let mut agent_job = job(4, "bob", Some("host-a"), JobStatus::Running);
        agent_job.agent_managed = true;
        agent_job.memory_used_mb = Some(512);

        let mut unknown_memory = job(5, "alice", Some("host-a"), JobStatus::Init);
        unknown_memory.memory_used_mb = None;

        InMemoryJobStore::with_jobs([
            job(1, "alice", Some("host-a"), JobStatus::Running),
            job(2, "alice", Some("host-b"), JobStatus::Running),
            job(3, "bob", Some("host-a"), JobStatus::Succeeded),
            agent_job,
            unknown_memory,
        ])
    }

    #[tokio::test]
    async fn memory_on_host_without_jobs_is_zero() -> Result<()> {
        let store = store();

        let used = store
            .total_memory_used_on_host("host-z", &JobStatus::active_statuses())
            .await?;
        assert_eq!(0, used);

        let used = InMemoryJobStore::new()
            .total_memory_used_on_host("host-a", &JobStatus::active_statuses())
            .await?;
        assert_eq!(0, used);

        Ok(())
    }

    #[tokio::test]
    async fn sums_memory_of_jobs_in_the_given_statuses() -> Result<()> {
        let store = store();

        let active = store
            .total_memory_used_on_host("host-a", &JobStatus::active_statuses())
            .await?;
        assert_eq!(1024 + 512, active);

        let finished = store
            .total_memory_used_on_host("host-a", &JobStatus::finished_statuses())
            .await?;
        assert_eq!(1024, finished);

        Ok(())
    }

    #[tokio::test]
    async fn host_capacity_combines_memory_and_job_count() -> Result<()> {
        let store = store();

        let capacity = store
            .host_capacity("host-a", &JobStatus::active_statuses())
            .await?;

        assert_eq!(
            HostCapacity {
                hostname: "host-a".to_owned(),
                memory_used_mb: 1536,
                active_jobs: 3,
            },
            capacity
        );

        Ok(())
    }

    #[tokio::test]
    async fn user_aggregates_only_include_running_server_jobs() -> Result<()> {
        let aggregates = store().user_job_resources_aggregates().await?;

        assert_eq!(
            vec![UserJobResourcesAggregate {
                user: "alice".to_owned(),
                running_jobs_count: 2,
                used_memory_mb: 2048,
            }],
            aggregates
        );

        Ok(())
    }

    #[tokio::test]
    async fn counts_jobs_by_user() -> Result<()> {
        let store = store();

        assert_eq!(
            3,
            store
                .count_jobs_by_user_and_status_in("alice", &JobStatus::active_statuses())
                .await?
        );
        assert_eq!(
            CapacityError::InvalidArgument("user must not be blank".to_owned()),
            store
                .count_jobs_by_user_and_status_in(" ", &JobStatus::active_statuses())
                .await
                .unwrap_err()
        );
        assert!(store
            .count_jobs_by_user_and_status_in("alice", &HashSet::new())
            .await
            .is_err());

        Ok(())
    }

    #[tokio::test]
    async fn finds_old_jobs_in_batches() -> Result<()> {
        let store = store();
        let threshold = Utc.with_ymd_and_hms(2024, 1, 1, 4, 30, 0).unwrap();
        let excluded: HashSet<_> = [JobStatus::Running].into_iter().collect();

        assert_eq!(
            vec![1, 2, 3, 4],
            store.find_jobs_created_before(threshold, &HashSet::new(), 10).await?
        );
        assert_eq!(
            vec![1, 2],
            store.find_jobs_created_before(threshold, &HashSet::new(), 2).await?
        );
        assert_eq!(
            vec![3],
            store.find_jobs_created_before(threshold, &excluded, 10).await?
        );

        Ok(())
    }

    #[tokio::test]
    async fn agent_jobs_and_lookups() -> Result<()> {
        let store = store();

        let agent_jobs = store
            .agent_job_ids_with_status_in(&JobStatus::active_statuses())
            .await?;
        assert_eq!(HashSet::from(["job-4".to_owned()]), agent_jobs);

        assert_eq!(Some(JobStatus::Succeeded), store.job_status("job-3").await?);
        assert_eq!(None, store.job_status("missing").await?);
        assert_eq!(Some("host-b".to_owned()), store.job_hostname("job-2").await?);

        assert!(store.update_status("job-2", JobStatus::Killed).await);
        assert_eq!(Some(JobStatus::Killed), store.job_status("job-2").await?);
        assert!(!store.update_status("missing", JobStatus::Killed).await);

        assert!(store.remove("job-2").await.is_some());
        assert_eq!(4, store.len().await);

        Ok(())
    }
}

#[cfg(test)]
mod store_from_file_tests {
    use tempfile::NamedTempFile;

    use crate::{
        capacity::{CapacitySource, JobStatus},
        in_memory_store::InMemoryJobStore,
    };

    use super::*;

    #[tokio::test]
    async fn reads_job_records() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            &mut file,
            r#"
- id: 1
  unique_id: job-1
  user: alice
  status: RUNNING
  agent_hostname: host-a
  memory_used_mb: 2048
  created: "2024-01-01T00:00:00Z"
  agent_managed: true
- id: 2
  unique_id: job-2
  user: bob
  status: SUCCEEDED
  created: "2024-01-01T00:00:00Z"
"#
        )?;

        let store = InMemoryJobStore::from_file(file.path()).await?;

        assert_eq!(2, store.len().await);
        assert_eq!(
            2048,
            store
                .total_memory_used_on_host("host-a", &JobStatus::active_statuses())
                .await?
        );

        Ok(())
    }

    #[tokio::test]
    async fn rejects_unknown_statuses() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            &mut file,
            r#"
- id: 1
  unique_id: job-1
  user: alice
  status: SLEEPING
  created: "2024-01-01T00:00:00Z"
"#
        )?;

        assert!(InMemoryJobStore::from_file(file.path()).await.is_err());

        Ok(())
    }
}
