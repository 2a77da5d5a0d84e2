use anyhow::{anyhow, Result};
use diode_container::{ContainerRuntime, ContainerStatus, RunSpec};
use diode_core::{find_files, HarnessError, PollSettings, AGENT_FILE_NAME_PREFIX, AGENT_FILE_SUFFIX};
use diode_harness::{catalog, Harness, Scenario, ScenarioContext, ScenarioStatus, Step, TestConfig};
use diode_policy::PolicyClient;
use diode_stub::StubRuntime;
use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;

const STUB_API_URL: &str = "http://127.0.0.1";

fn test_config(dir: &TempDir) -> TestConfig {
    let mut config = TestConfig::new(dir.path()).expect("config");
    config.agent_api_url = STUB_API_URL.to_string();
    config.settle = Duration::ZERO;
    config.poll = PollSettings::new(Duration::from_secs(3), Duration::from_millis(20));
    config
}

fn harness() -> (TempDir, Harness) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(&dir);
    let harness = Harness::new(config, Box::new(StubRuntime::new())).expect("harness");
    (dir, harness)
}

/// Stub runtime whose daemon refuses every removal.
struct RemoveFails(StubRuntime);

impl ContainerRuntime for RemoveFails {
    fn run(&self, spec: &RunSpec) -> Result<String> {
        self.0.run(spec)
    }

    fn stop(&self, id: &str) -> Result<()> {
        self.0.stop(id)
    }

    fn remove(&self, _id: &str, _force: bool) -> Result<()> {
        Err(anyhow!("daemon error: remove failed"))
    }

    fn inspect_status(&self, id: &str) -> Result<ContainerStatus> {
        self.0.inspect_status(id)
    }

    fn list_names(&self) -> Result<Vec<String>> {
        self.0.list_names()
    }
}

/// Stub runtime that has already lost every container on stop and remove.
struct AlreadyGone(StubRuntime);

impl ContainerRuntime for AlreadyGone {
    fn run(&self, spec: &RunSpec) -> Result<String> {
        self.0.run(spec)
    }

    fn stop(&self, id: &str) -> Result<()> {
        Err(anyhow!(HarnessError::ContainerNotFound(id.to_string())))
    }

    fn remove(&self, id: &str, _force: bool) -> Result<()> {
        Err(anyhow!(HarnessError::ContainerNotFound(id.to_string())))
    }

    fn inspect_status(&self, id: &str) -> Result<ContainerStatus> {
        self.0.inspect_status(id)
    }

    fn list_names(&self) -> Result<Vec<String>> {
        self.0.list_names()
    }
}

fn start_agent_scenario() -> Scenario {
    Scenario::new(
        "start one agent",
        vec![
            Step::AgentConfigFile {
                port: diode_harness::PortChoice::Available,
            },
            Step::RunAgent,
        ],
    )
}

fn builtin(filter: &str) -> Scenario {
    let mut scenarios = catalog::select(Some(filter)).expect("catalog");
    assert_eq!(scenarios.len(), 1, "filter '{}' must pick one scenario", filter);
    scenarios.remove(0)
}

#[test]
fn available_port_agent_runs_and_is_cleaned_up() {
    let (_dir, harness) = harness();
    let report = harness.run(&builtin("run with available port"));
    assert!(report.passed(), "{:?}", report);
    assert_eq!(report.steps.len(), 3);
    assert!(harness.runtime().list_names().unwrap().is_empty());
}

#[test]
fn second_agent_on_taken_port_exits() {
    let (_dir, harness) = harness();
    let report = harness.run(&builtin("unavailable"));
    assert!(report.passed(), "{:?}", report);
    assert!(report.kept_containers.is_empty());
}

#[test]
fn applied_policies_are_listed_and_deleted() {
    let (_dir, harness) = harness();
    for filter in ["apply one", "apply three", "delete two"] {
        let report = harness.run(&builtin(filter));
        assert!(report.passed(), "{}: {:?}", filter, report);
    }
}

#[test]
fn failed_scenario_keeps_its_container() {
    let (dir, harness) = harness();
    let scenario = Scenario::parse(
        "expects the wrong status",
        "Given that a diode configuration file exist with default configuration and port available
         When the diode agent is run using existing configuration file
         Then the diode agent container is exited",
    )
    .expect("parse");
    let report = harness.run(&scenario);
    assert_eq!(report.status, ScenarioStatus::Failed);
    let failure = report.steps.last().and_then(|s| s.error.clone()).unwrap_or_default();
    assert!(failure.contains("Expected was: exited"), "{}", failure);
    assert_eq!(report.kept_containers.len(), 1);
    assert_eq!(harness.runtime().list_names().unwrap().len(), 1);

    let cleanup = harness.run(&builtin("cleanup"));
    assert!(cleanup.passed(), "{:?}", cleanup);
    assert!(harness.runtime().list_names().unwrap().is_empty());
    let leftovers = find_files(AGENT_FILE_NAME_PREFIX, AGENT_FILE_SUFFIX, dir.path()).unwrap();
    assert!(leftovers.is_empty(), "{:?}", leftovers);
}

#[test]
fn deleting_more_than_applied_fails() {
    let (_dir, harness) = harness();
    let scenario = Scenario::new(
        "over delete",
        vec![
            "that a diode configuration file exist with default configuration and port available"
                .parse()
                .unwrap(),
            Step::RunAgent,
            Step::ApplyPolicies(1),
            Step::DeletePolicies(2),
        ],
    );
    let report = harness.run(&scenario);
    assert_eq!(report.status, ScenarioStatus::Failed);
    assert_eq!(report.steps.len(), 4);
    let error = report.steps[3].error.clone().unwrap_or_default();
    assert!(error.contains("only 1 policies are applied"), "{}", error);
}

#[test]
fn interrupted_harness_skips_remaining_steps() {
    let (_dir, harness) = harness();
    harness.interrupt_flag().store(true, Ordering::SeqCst);
    let report = harness.run(&builtin("run with available port"));
    assert_eq!(report.status, ScenarioStatus::Interrupted);
    assert!(report.steps.is_empty());
    assert!(harness.run_all(&catalog::builtin().unwrap()).is_empty());
}

#[test]
fn cleanup_failure_after_passed_steps_fails_the_scenario() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness =
        Harness::new(test_config(&dir), Box::new(RemoveFails(StubRuntime::new()))).expect("harness");
    let report = harness.run(&start_agent_scenario());

    assert_eq!(report.status, ScenarioStatus::Failed);
    assert!(!report.passed());
    let last = report.steps.last().expect("cleanup step reported");
    assert_eq!(last.step, Step::RemoveAgentContainers.to_string());
    assert!(!last.passed);
    assert!(
        last.error.as_deref().unwrap_or_default().contains("remove failed"),
        "{:?}",
        last
    );
    assert_eq!(report.kept_containers.len(), 1);
    assert_eq!(harness.runtime().list_names().unwrap().len(), 1);
}

#[test]
fn missing_container_during_cleanup_is_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness =
        Harness::new(test_config(&dir), Box::new(AlreadyGone(StubRuntime::new()))).expect("harness");
    let report = harness.run(&start_agent_scenario());
    assert!(report.passed(), "{:?}", report);
    assert_eq!(report.steps.len(), 2);
    assert!(report.kept_containers.is_empty());
}

#[test]
fn deleted_policies_no_longer_resolve() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(&dir);
    let runtime = StubRuntime::new();
    let client = PolicyClient::new(STUB_API_URL).expect("client");
    let mut ctx = ScenarioContext::new(&config, &runtime, &client);

    for step in [
        Step::AgentConfigFile {
            port: diode_harness::PortChoice::Available,
        },
        Step::RunAgent,
        Step::ApplyPolicies(4),
    ] {
        step.execute(&mut ctx).expect("setup step");
    }
    let applied: BTreeSet<String> = ctx.policies.keys().cloned().collect();
    Step::DeletePolicies(3).execute(&mut ctx).expect("delete");

    let remaining: BTreeSet<String> = ctx.policies.keys().cloned().collect();
    assert_eq!(remaining.len(), 1);
    let port = ctx.port.expect("port");
    for name in applied.difference(&remaining) {
        let err = client.get(name, port).unwrap_err();
        assert_eq!(HarnessError::unexpected_status(&err), Some(404), "{}", name);
    }
    for name in &remaining {
        client.get(name, port).expect("kept policy still resolves");
    }
    Step::PoliciesListed(1).execute(&mut ctx).expect("list");

    Step::StopAgentContainers.execute(&mut ctx).expect("stop");
    Step::RemoveAgentContainers.execute(&mut ctx).expect("remove");
    assert!(runtime.list_names().unwrap().is_empty());
}
