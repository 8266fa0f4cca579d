use std::{io, path::PathBuf, process::Stdio, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{debug, warn};

use crate::{
    resource::{JobRequest, Resource},
    script_selector::{ScriptSelectionOutcome, SelectorScript},
    selector::SelectionError,
};

/// Document written to the script's stdin.
#[derive(Debug, Serialize)]
struct ScriptInput<'a, R> {
    job_id: &'a str,
    job_request: &'a JobRequest,
    candidates: &'a [R],
}

/// Document the script must print on stdout.
#[derive(Debug, Deserialize)]
struct ScriptOutput {
    #[serde(default)]
    resource_id: Option<String>,
    #[serde(default)]
    rationale: Option<String>,
}

/// Runs an executable for every selection.
///
/// The request is written to stdin as JSON and the executable answers with
/// `{"resource_id": ..., "rationale": ...}` on stdout. The file is looked up again on
/// every call, so replacing it on disk changes the selection logic without a restart.
#[derive(Debug, Clone)]
pub struct ProcessSelectorScript {
    command: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessSelectorScript {
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }

    #[tracing::instrument(name = "ProcessSelectorScript::run", skip_all, fields(
        command = ?self.command
    ))]
    async fn run(&self, input: Vec<u8>) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning selector script {:?}", self.command))?;

        let stdin = child.stdin.take();

        // Stdin is fed while the output is collected. A script may answer without reading it.
        let write_input = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };

            match stdin.write_all(&input).await {
                Err(error) if error.kind() == io::ErrorKind::BrokenPipe => {
                    debug!("selector script closed its input before reading all of it");
                    Ok(())
                }
                result => result.context("writing selector script input"),
            }
        };

        let exchange = async move {
            let (written, output) = tokio::join!(write_input, child.wait_with_output());
            written?;
            output.context("waiting for selector script")
        };

        let output = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| anyhow::anyhow!("selector script timed out after {:?}", self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = ?output.status, %stderr, "selector script exited unsuccessfully");
            anyhow::bail!(
                "selector script exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl<R> SelectorScript<R> for ProcessSelectorScript
where
    R: Resource + Serialize,
{
    async fn select_resource(
        &self,
        candidates: &[R],
        job_request: &JobRequest,
        job_id: &str,
    ) -> Result<ScriptSelectionOutcome<R>> {
        let input = serde_json::to_vec(&ScriptInput {
            job_id,
            job_request,
            candidates,
        })
        .context("encoding selector script input")?;

        let stdout = self.run(input).await?;

        let output: ScriptOutput =
            serde_json::from_slice(&stdout).context("decoding selector script output")?;

        debug!(?output, "selector script answered");

        let resource = match output.resource_id {
            None => None,
            Some(id) => match candidates.iter().find(|candidate| candidate.id() == id) {
                Some(candidate) => Some(candidate.clone()),
                None => return Err(SelectionError::UnknownResource { id }.into()),
            },
        };

        Ok(ScriptSelectionOutcome {
            resource,
            rationale: output.rationale,
        })
    }
}
