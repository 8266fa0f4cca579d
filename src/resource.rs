use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashSet},
    fmt::Debug,
    path::Path,
};

/// An execution target a job can be placed on.
///
/// The engine only looks at the identity of a resource. Everything else is passed
/// through to the selection strategy untouched.
pub trait Resource: Clone + Debug + Send + Sync + 'static {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Host the resource's jobs are accounted against in the capacity store.
    fn hostname(&self) -> &str {
        self.name()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Cluster {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tags: BTreeSet::new(),
        }
    }
}

impl Resource for Cluster {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// The job being placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub name: String,
    pub user: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Memory the job asks for, in MB.
    #[serde(default)]
    pub requested_memory_mb: Option<u64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl JobRequest {
    pub fn new(name: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            user: user.into(),
            tags: BTreeSet::new(),
            requested_memory_mb: None,
            metadata: serde_json::Value::Null,
        }
    }
}

/// A job request together with the clusters it may run on, as read by `selector select`.
#[derive(Debug, Deserialize)]
pub struct PlacementRequest {
    #[serde(default)]
    pub job_id: Option<String>,
    pub job_request: JobRequest,
    pub candidates: Vec<Cluster>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PlacementRequestError {
    #[error("field {0} is required")]
    MissingField(String),
    #[error("at least one candidate is required")]
    NoCandidates,
    #[error("candidate {0} is listed more than once")]
    DuplicateCandidate(String),
}

impl PlacementRequest {
    #[tracing::instrument(name = "PlacementRequest::from_file", skip_all, fields(
        file_path = ?file_path.as_ref()
    ))]
    pub async fn from_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let file_contents = tokio::fs::read_to_string(file_path.as_ref()).await?;
        let request: PlacementRequest = serde_yaml::from_str(&file_contents)?;

        request.validate()?;

        Ok(request)
    }

    fn validate(&self) -> Result<(), PlacementRequestError> {
        if self.job_request.name.trim().is_empty() {
            return Err(PlacementRequestError::MissingField(
                "job_request.name".to_owned(),
            ));
        }

        if self.candidates.is_empty() {
            return Err(PlacementRequestError::NoCandidates);
        }

        let mut seen = HashSet::new();
        for candidate in &self.candidates {
            if candidate.id.trim().is_empty() {
                return Err(PlacementRequestError::MissingField(
                    "candidates.id".to_owned(),
                ));
            }
            if !seen.insert(candidate.id.as_str()) {
                return Err(PlacementRequestError::DuplicateCandidate(
                    candidate.id.clone(),
                ));
            }
        }

        Ok(())
    }
}
