use std::{path::Path, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{
    capacity::CapacitySource,
    fallback_selector::FallbackSelector,
    least_loaded_selector::LeastLoadedSelector,
    metrics::SELECT_TIMER_NAME,
    process_script::ProcessSelectorScript,
    resource::Resource,
    round_robin_selector::RoundRobinSelector,
    script_selector::{ScriptResourceSelector, SelectorScript},
    selector::ResourceSelector,
};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub selector: SelectorConfig,
    #[serde(default)]
    pub script: Option<ScriptConfig>,
    #[serde(default)]
    pub least_loaded: LeastLoadedConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Script,
    RoundRobin,
    LeastLoaded,
}

#[derive(Debug, Deserialize)]
pub struct SelectorConfig {
    pub strategy: Strategy,
    /// Used when `strategy` fails.
    #[serde(default)]
    pub fallback: Option<Strategy>,
}

#[derive(Debug, Deserialize)]
pub struct ScriptConfig {
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct LeastLoadedConfig {
    #[serde(default)]
    pub max_memory_mb_per_host: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_timer_name")]
    pub timer_name: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            timer_name: default_timer_name(),
        }
    }
}

fn default_timer_name() -> String {
    SELECT_TIMER_NAME.to_owned()
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("field {0} is required")]
    MissingField(String),
    #[error("field {field} is invalid: {reason}")]
    InvalidField { field: String, reason: String },
}

impl Config {
    #[tracing::instrument(name = "config::Config::from_file", skip_all, fields(
        file_path = ?file_path.as_ref()
    ))]
    pub async fn from_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let file_contents = tokio::fs::read_to_string(file_path.as_ref()).await?;

        let config: Config = serde_yaml::from_str(&file_contents)?;

        config.validate()?;

        Ok(config)
    }

    fn strategies(&self) -> impl Iterator<Item = Strategy> {
        std::iter::once(self.selector.strategy).chain(self.selector.fallback)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.strategies().any(|strategy| strategy == Strategy::Script) {
            let script = self
                .script
                .as_ref()
                .ok_or_else(|| ConfigError::MissingField("script".to_owned()))?;

            if script.timeout_ms == 0 {
                return Err(ConfigError::InvalidField {
                    field: "script.timeout_ms".to_owned(),
                    reason: "must be greater than 0".to_owned(),
                });
            }
        }

        if self.metrics.timer_name.trim().is_empty() {
            return Err(ConfigError::MissingField("metrics.timer_name".to_owned()));
        }

        Ok(())
    }

    /// Builds the configured strategy, with its fallback when one is set.
    #[tracing::instrument(name = "config::Config::build_selector", skip_all, fields(
        strategy = ?self.selector.strategy,
        fallback = ?self.selector.fallback
    ))]
    pub fn build_selector<R>(
        &self,
        capacity: Arc<dyn CapacitySource>,
    ) -> Result<Box<dyn ResourceSelector<R>>, ConfigError>
    where
        R: Resource + Serialize,
    {
        let primary = self.build_strategy::<R>(self.selector.strategy, Arc::clone(&capacity))?;

        match self.selector.fallback {
            None => Ok(primary),
            Some(fallback) => {
                let secondary = self.build_strategy::<R>(fallback, capacity)?;
                Ok(Box::new(FallbackSelector::new(primary, secondary)))
            }
        }
    }

    fn build_strategy<R>(
        &self,
        strategy: Strategy,
        capacity: Arc<dyn CapacitySource>,
    ) -> Result<Box<dyn ResourceSelector<R>>, ConfigError>
    where
        R: Resource + Serialize,
    {
        match strategy {
            Strategy::RoundRobin => Ok(Box::new(RoundRobinSelector::new())),
            Strategy::LeastLoaded => Ok(Box::new(
                LeastLoadedSelector::new(capacity)
                    .with_max_memory_mb_per_host(self.least_loaded.max_memory_mb_per_host),
            )),
            Strategy::Script => {
                let script = self
                    .script
                    .as_ref()
                    .ok_or_else(|| ConfigError::MissingField("script".to_owned()))?;

                let process: Arc<dyn SelectorScript<R>> = Arc::new(ProcessSelectorScript::new(
                    script.command.clone(),
                    script.args.clone(),
                    Duration::from_millis(script.timeout_ms),
                ));

                Ok(Box::new(ScriptResourceSelector::new(process)))
            }
        }
    }
}
