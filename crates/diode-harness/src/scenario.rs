use anyhow::Result;
use diode_container::ContainerRuntime;
use diode_core::HarnessError;
use diode_policy::PolicyClient;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::TestConfig;
use crate::context::ScenarioContext;
use crate::steps::Step;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub label: String,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn new(label: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            label: label.into(),
            steps,
        }
    }

    /// Builds a scenario from step phrases, one per line. Blank lines and
    /// `#` comments are skipped.
    pub fn parse(label: impl Into<String>, text: &str) -> Result<Self> {
        let steps = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| line.parse::<Step>())
            .collect::<Result<Vec<Step>>>()?;
        Ok(Self::new(label, steps))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    Interrupted,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub status: ScenarioStatus,
    pub steps: Vec<StepReport>,
    pub duration_ms: u128,
    /// Containers left in place because the scenario or its cleanup failed.
    pub kept_containers: Vec<String>,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }
}

/// Runs scenarios one after another against a single runtime and agent API.
pub struct Harness {
    config: TestConfig,
    runtime: Box<dyn ContainerRuntime>,
    client: PolicyClient,
    interrupted: Arc<AtomicBool>,
}

impl Harness {
    pub fn new(config: TestConfig, runtime: Box<dyn ContainerRuntime>) -> Result<Self> {
        let client = PolicyClient::new(&config.agent_api_url)?;
        Ok(Self {
            config,
            runtime,
            client,
            interrupted: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    pub fn runtime(&self) -> &dyn ContainerRuntime {
        self.runtime.as_ref()
    }

    /// Flag checked between steps; setting it stops the current scenario
    /// after the running step and skips the rest.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn run(&self, scenario: &Scenario) -> ScenarioReport {
        let started = Instant::now();
        let mut ctx = ScenarioContext::new(&self.config, self.runtime.as_ref(), &self.client);
        let mut steps = Vec::with_capacity(scenario.steps.len());
        let mut status = ScenarioStatus::Passed;
        tracing::info!(scenario = %scenario.label, "scenario started");

        for step in &scenario.steps {
            if self.is_interrupted() {
                status = ScenarioStatus::Interrupted;
                break;
            }
            tracing::debug!(%step, "step");
            match step.execute(&mut ctx) {
                Ok(()) => steps.push(StepReport {
                    step: step.to_string(),
                    passed: true,
                    error: None,
                }),
                Err(err) => {
                    tracing::error!(%step, error = %format!("{:#}", err), "step failed");
                    steps.push(StepReport {
                        step: step.to_string(),
                        passed: false,
                        error: Some(format!("{:#}", err)),
                    });
                    status = ScenarioStatus::Failed;
                    break;
                }
            }
        }

        let kept_containers = self.after_scenario(&mut ctx, &mut status, &mut steps);
        tracing::info!(
            scenario = %scenario.label,
            ?status,
            elapsed_ms = started.elapsed().as_millis(),
            "scenario finished"
        );
        ScenarioReport {
            scenario: scenario.label.clone(),
            status,
            steps,
            duration_ms: started.elapsed().as_millis(),
            kept_containers,
        }
    }

    pub fn run_all(&self, scenarios: &[Scenario]) -> Vec<ScenarioReport> {
        let mut reports = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            if self.is_interrupted() {
                break;
            }
            reports.push(self.run(scenario));
        }
        reports
    }

    /// Stops and removes the scenario's containers, unless it failed: those are
    /// left in place for inspection and returned. A stop or remove error other
    /// than a missing container fails the scenario, and the container is
    /// reported as kept.
    fn after_scenario(
        &self,
        ctx: &mut ScenarioContext<'_>,
        status: &mut ScenarioStatus,
        steps: &mut Vec<StepReport>,
    ) -> Vec<String> {
        if *status == ScenarioStatus::Failed {
            let kept: Vec<String> = ctx.containers.keys().cloned().collect();
            if !kept.is_empty() {
                tracing::warn!(containers = ?kept, "scenario failed, keeping agent containers");
            }
            return kept;
        }
        let mut kept = Vec::new();
        for id in std::mem::take(&mut ctx.containers).into_keys() {
            if let Err(err) = ignore_missing(self.runtime.stop(&id)) {
                tracing::error!(container = %id, error = %format!("{:#}", err), "failed to stop agent container");
                steps.push(cleanup_failure(Step::StopAgentContainers, &id, &err));
                *status = ScenarioStatus::Failed;
            }
            if let Err(err) = ignore_missing(self.runtime.remove(&id, false)) {
                tracing::error!(container = %id, error = %format!("{:#}", err), "failed to remove agent container");
                steps.push(cleanup_failure(Step::RemoveAgentContainers, &id, &err));
                *status = ScenarioStatus::Failed;
                kept.push(id);
            }
        }
        kept
    }
}

fn ignore_missing(result: Result<()>) -> Result<()> {
    match result {
        Err(err) if HarnessError::is_container_not_found(&err) => Ok(()),
        other => other,
    }
}

fn cleanup_failure(step: Step, id: &str, err: &anyhow::Error) -> StepReport {
    StepReport {
        step: step.to_string(),
        passed: false,
        error: Some(format!("{}: {:#}", id, err)),
    }
}

/// Total wall time for a batch of reports.
pub fn total_duration(reports: &[ScenarioReport]) -> Duration {
    Duration::from_millis(reports.iter().map(|r| r.duration_ms as u64).sum())
}
