use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    metrics::{MeasurementSink, TagSet},
    resource::{Cluster, JobRequest, Resource},
    script_selector::{ScriptSelectionOutcome, SelectorScript},
    selector::{ResourceSelector, SelectionError, SelectionResult, SelectorType},
};

pub fn cluster(id: &str) -> Cluster {
    Cluster::new(id, format!("{id}-name"))
}

pub fn job_request() -> JobRequest {
    JobRequest::new("etl", "alice")
}

#[derive(Debug, Clone)]
pub struct Measurement {
    pub metric: String,
    pub tags: TagSet,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    measurements: Mutex<Vec<Measurement>>,
}

impl RecordingSink {
    pub fn measurements(&self) -> Vec<Measurement> {
        self.measurements.lock().unwrap().clone()
    }
}

impl MeasurementSink for RecordingSink {
    fn record_duration(&self, metric: &str, tags: &TagSet, elapsed: Duration) {
        self.measurements.lock().unwrap().push(Measurement {
            metric: metric.to_owned(),
            tags: tags.clone(),
            elapsed,
        });
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ScriptBehavior {
    Select(&'static str, Option<&'static str>),
    NoPreference(Option<&'static str>),
    /// Picks a resource that is not among the candidates.
    SelectForeign,
    FailWithSelectionError,
    FailWithIoError,
    Panic,
}

#[derive(Debug, thiserror::Error)]
#[error("script interpreter crashed")]
pub struct InterpreterCrashed;

/// A selector script with a canned answer that counts how often it runs.
pub struct FakeScript {
    behavior: ScriptBehavior,
    calls: AtomicUsize,
}

impl FakeScript {
    pub fn new(behavior: ScriptBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SelectorScript<Cluster> for FakeScript {
    async fn select_resource(
        &self,
        candidates: &[Cluster],
        _job_request: &JobRequest,
        _job_id: &str,
    ) -> anyhow::Result<ScriptSelectionOutcome<Cluster>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match self.behavior {
            ScriptBehavior::Select(id, rationale) => {
                let resource = candidates
                    .iter()
                    .find(|candidate| candidate.id() == id)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("{id} is not a candidate"))?;
                Ok(ScriptSelectionOutcome::selected(
                    resource,
                    rationale.map(str::to_owned),
                ))
            }
            ScriptBehavior::NoPreference(rationale) => Ok(ScriptSelectionOutcome::no_preference(
                rationale.map(str::to_owned),
            )),
            ScriptBehavior::SelectForeign => {
                Ok(ScriptSelectionOutcome::selected(cluster("foreign"), None))
            }
            ScriptBehavior::FailWithSelectionError => Err(SelectionError::InvalidJobId.into()),
            ScriptBehavior::FailWithIoError => Err(InterpreterCrashed.into()),
            ScriptBehavior::Panic => panic!("script blew up"),
        }
    }
}

/// A strategy with a canned answer, for exercising wrappers.
pub enum FakeSelector {
    Select(&'static str),
    Empty(Option<&'static str>),
    Fail,
    Panic,
    /// Never completes.
    Hang,
}

#[async_trait]
impl ResourceSelector<Cluster> for FakeSelector {
    fn selector_type(&self) -> SelectorType {
        SelectorType::new("fake")
    }

    async fn select(
        &self,
        candidates: &[Cluster],
        _job_request: &JobRequest,
        _job_id: &str,
    ) -> Result<SelectionResult<Cluster>, SelectionError> {
        let builder = SelectionResult::builder(SelectorType::new("fake"));

        match self {
            FakeSelector::Select(id) => {
                let resource = candidates
                    .iter()
                    .find(|candidate| candidate.id() == *id)
                    .cloned()
                    .unwrap_or_else(|| cluster(id));
                Ok(builder.with_selected_resource(resource).build())
            }
            FakeSelector::Empty(rationale) => Ok(builder
                .with_optional_rationale(rationale.map(str::to_owned))
                .build()),
            FakeSelector::Fail => Err(SelectionError::Script(anyhow::anyhow!("boom"))),
            FakeSelector::Panic => panic!("selector blew up"),
            FakeSelector::Hang => {
                futures_util::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}
