use anyhow::{anyhow, Context, Result};
use diode_container::{
    remove_by_name_prefix, AgentConfigBuilder, ContainerStatus, RunSpec, VolumeMount,
};
use diode_core::{
    allocate_port, poll_until, remove_files, HarnessError, PortAvailability, Probe,
    AGENT_FILE_NAME_PREFIX, AGENT_FILE_SUFFIX, DIODE_AGENT_DEFAULT_PORT,
};
use diode_policy::{assert_no_diff, Policy, PolicyClient};
use rand::seq::IteratorRandom;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::context::ScenarioContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortChoice {
    /// No override; the agent binds its built-in port.
    Default,
    Available,
    /// A port some tracked agent already holds.
    Unavailable,
}

impl PortChoice {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Available => "available",
            Self::Unavailable => "unavailable",
        }
    }
}

impl FromStr for PortChoice {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "default" => Ok(Self::Default),
            "available" => Ok(Self::Available),
            "unavailable" => Ok(Self::Unavailable),
            other => Err(anyhow!(HarnessError::InvalidArgument(format!(
                "Invalid option for port: {}",
                other
            )))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    AgentConfigFile { port: PortChoice },
    RunAgent,
    ContainerStatusIs(ContainerStatus),
    ApplyPolicies(usize),
    DeletePolicies(usize),
    PoliciesListed(usize),
    StopAgentContainers,
    RemoveAgentContainers,
    RemoveGeneratedConfigFiles,
    ForceRemoveTestContainers,
}

type StepParser = fn(&str) -> Result<Step>;

/// Canonical step phrases. `{}` marks the single argument slot.
const STEP_PATTERNS: &[(&str, StepParser)] = &[
    (
        "that a diode configuration file exist with default configuration and port {}",
        |arg| {
            Ok(Step::AgentConfigFile {
                port: arg.parse()?,
            })
        },
    ),
    ("the diode agent is run using existing configuration file", |_| {
        Ok(Step::RunAgent)
    }),
    ("the diode agent container is {}", |arg| {
        Ok(Step::ContainerStatusIs(arg.parse()?))
    }),
    ("{} policies are applied to the agent", |arg| {
        Ok(Step::ApplyPolicies(parse_amount(arg)?))
    }),
    ("{} policy is applied to the agent", |arg| {
        Ok(Step::ApplyPolicies(parse_amount(arg)?))
    }),
    ("{} policies are deleted from agent", |arg| {
        Ok(Step::DeletePolicies(parse_amount(arg)?))
    }),
    ("{} policy is deleted from agent", |arg| {
        Ok(Step::DeletePolicies(parse_amount(arg)?))
    }),
    ("policies route shows {} policies applied", |arg| {
        Ok(Step::PoliciesListed(parse_amount(arg)?))
    }),
    ("policies route shows {} policy applied", |arg| {
        Ok(Step::PoliciesListed(parse_amount(arg)?))
    }),
    ("stop agent container", |_| Ok(Step::StopAgentContainers)),
    ("remove agent container", |_| Ok(Step::RemoveAgentContainers)),
    ("remove all the agents .yaml generated on test process", |_| {
        Ok(Step::RemoveGeneratedConfigFiles)
    }),
    (
        "force remove of all agent containers whose names start with the test prefix",
        |_| Ok(Step::ForceRemoveTestContainers),
    ),
];

const STEP_KEYWORDS: &[&str] = &["Given ", "When ", "Then ", "And ", "But "];

fn parse_amount(raw: &str) -> Result<usize> {
    raw.parse().map_err(|_| {
        anyhow!(HarnessError::InvalidArgument(format!(
            "Amount of policies must be an integer. It was: {}",
            raw
        )))
    })
}

fn match_pattern<'a>(pattern: &str, text: &'a str) -> Option<&'a str> {
    match pattern.split_once("{}") {
        None => (pattern == text).then_some(""),
        Some((prefix, suffix)) => {
            let arg = text.strip_prefix(prefix)?.strip_suffix(suffix)?;
            (!arg.is_empty() && !arg.contains(' ')).then_some(arg)
        }
    }
}

impl FromStr for Step {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let mut text = raw.trim();
        for keyword in STEP_KEYWORDS {
            if let Some(rest) = text.strip_prefix(keyword) {
                text = rest.trim_start();
                break;
            }
        }
        for (pattern, parse) in STEP_PATTERNS {
            if let Some(arg) = match_pattern(pattern, text) {
                return parse(arg).with_context(|| format!("step '{}'", text));
            }
        }
        Err(anyhow!(HarnessError::InvalidArgument(format!(
            "no step matches '{}'",
            text
        ))))
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AgentConfigFile { port } => write!(
                f,
                "that a diode configuration file exist with default configuration and port {}",
                port.as_str()
            ),
            Self::RunAgent => f.write_str("the diode agent is run using existing configuration file"),
            Self::ContainerStatusIs(status) => write!(f, "the diode agent container is {}", status),
            Self::ApplyPolicies(1) => f.write_str("1 policy is applied to the agent"),
            Self::ApplyPolicies(n) => write!(f, "{} policies are applied to the agent", n),
            Self::DeletePolicies(1) => f.write_str("1 policy is deleted from agent"),
            Self::DeletePolicies(n) => write!(f, "{} policies are deleted from agent", n),
            Self::PoliciesListed(1) => f.write_str("policies route shows 1 policy applied"),
            Self::PoliciesListed(n) => write!(f, "policies route shows {} policies applied", n),
            Self::StopAgentContainers => f.write_str("stop agent container"),
            Self::RemoveAgentContainers => f.write_str("remove agent container"),
            Self::RemoveGeneratedConfigFiles => {
                f.write_str("remove all the agents .yaml generated on test process")
            }
            Self::ForceRemoveTestContainers => f.write_str(
                "force remove of all agent containers whose names start with the test prefix",
            ),
        }
    }
}

impl Step {
    pub fn execute(&self, ctx: &mut ScenarioContext<'_>) -> Result<()> {
        match self {
            Self::AgentConfigFile { port } => create_agent_config_file(ctx, *port),
            Self::RunAgent => run_agent(ctx),
            Self::ContainerStatusIs(status) => expect_container_status(ctx, *status),
            Self::ApplyPolicies(amount) => apply_policies(ctx, *amount),
            Self::DeletePolicies(amount) => delete_policies(ctx, *amount),
            Self::PoliciesListed(amount) => expect_policies_listed(ctx, *amount),
            Self::StopAgentContainers => {
                for id in ctx.containers.keys() {
                    ctx.runtime
                        .stop(id)
                        .with_context(|| format!("stop agent container {}", id))?;
                }
                Ok(())
            }
            Self::RemoveAgentContainers => {
                for id in ctx.containers.keys() {
                    ctx.runtime
                        .remove(id, false)
                        .with_context(|| format!("remove agent container {}", id))?;
                }
                ctx.containers.clear();
                Ok(())
            }
            Self::RemoveGeneratedConfigFiles => {
                let removed =
                    remove_files(AGENT_FILE_NAME_PREFIX, AGENT_FILE_SUFFIX, &ctx.config.local_path)?;
                tracing::info!(removed, "removed generated agent config files");
                Ok(())
            }
            Self::ForceRemoveTestContainers => {
                let removed = remove_by_name_prefix(ctx.runtime, AGENT_FILE_NAME_PREFIX)?;
                tracing::info!(removed = removed.len(), "force removed test containers");
                ctx.containers.clear();
                Ok(())
            }
        }
    }
}

fn create_agent_config_file(ctx: &mut ScenarioContext<'_>, choice: PortChoice) -> Result<()> {
    let builder = AgentConfigBuilder::new();
    let (builder, port) = match choice {
        PortChoice::Default => (builder, DIODE_AGENT_DEFAULT_PORT),
        PortChoice::Available | PortChoice::Unavailable => {
            let availability = if choice == PortChoice::Available {
                PortAvailability::Available
            } else {
                PortAvailability::Unavailable
            };
            let in_use: BTreeSet<u16> = ctx.containers.values().copied().collect();
            let port = allocate_port(availability, &in_use)?;
            (builder.port(port), port)
        }
    };
    let file = builder.write(&ctx.config.local_path)?;
    tracing::info!(file = %file.name, port, choice = choice.as_str(), "agent config file created");
    ctx.port = Some(port);
    ctx.agent_config = Some(file);
    Ok(())
}

fn run_agent(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let file = ctx.agent_config.as_ref().ok_or_else(|| {
        anyhow!(HarnessError::InvalidArgument(
            "no agent configuration file was created in this scenario".to_string()
        ))
    })?;
    let port = ctx.require_port()?;
    let spec = RunSpec::new(&ctx.config.agent_image, &file.name)
        .volume(VolumeMount::agent_config_dir(&ctx.config.local_path))
        .command(file.agent_command())
        .settle(ctx.config.settle);
    let id = ctx.runtime.run(&spec)?;
    ctx.containers.insert(id.clone(), port);
    ctx.container_id = Some(id);

    if ctx.config.readiness_probe {
        let client = ctx.client;
        let outcome = poll_until(&ctx.config.poll, || {
            Ok(match client.status(port) {
                Ok(_) => Probe::Done(()),
                Err(_) => Probe::Pending(()),
            })
        })?;
        if !outcome.done {
            tracing::warn!(port, attempts = outcome.attempts, "agent status route never answered");
        }
    }
    Ok(())
}

fn expect_container_status(ctx: &mut ScenarioContext<'_>, expected: ContainerStatus) -> Result<()> {
    let id = ctx.require_container()?.to_string();
    let runtime = ctx.runtime;
    let outcome = poll_until(&ctx.config.poll, || {
        let status = runtime.inspect_status(&id)?;
        Ok(if status == expected {
            Probe::Done(status)
        } else {
            Probe::Pending(status)
        })
    })?;
    if !outcome.done {
        return Err(anyhow!(HarnessError::AssertionFailure(format!(
            "Container status fail with: {}. Expected was: {}",
            outcome.value, expected
        ))));
    }
    Ok(())
}

fn apply_policies(ctx: &mut ScenarioContext<'_>, amount: usize) -> Result<()> {
    let port = ctx.require_port()?;
    for _ in 0..amount {
        let mut policy = Policy::random();
        policy.full_test_policy();
        let expected = policy.document()?;

        let created = ctx.client.create(&policy.to_yaml()?, port)?;
        assert_no_diff(&created.structured()?, &expected, "Policy created")?;

        let fetched = ctx.client.get(policy.name(), port)?;
        assert_no_diff(
            &fetched.structured()?,
            &expected,
            &format!("Policy returned in /policies/{}", policy.name()),
        )?;

        tracing::info!(policy = policy.name(), port, "policy applied");
        ctx.policies.insert(policy.name().to_string(), expected);
    }
    Ok(())
}

fn delete_policies(ctx: &mut ScenarioContext<'_>, amount: usize) -> Result<()> {
    let port = ctx.require_port()?;
    if amount > ctx.policies.len() {
        return Err(anyhow!(HarnessError::InvalidArgument(format!(
            "Unable to remove {} policies, because only {} policies are applied",
            amount,
            ctx.policies.len()
        ))));
    }
    let chosen: Vec<String> = ctx
        .policies
        .keys()
        .cloned()
        .choose_multiple(&mut rand::thread_rng(), amount);
    for name in chosen {
        ctx.client.delete(&name, port)?;
        ctx.policies.remove(&name);
        expect_policy_gone(ctx.client, &name, port)?;
        tracing::info!(policy = %name, port, "policy deleted");
    }
    Ok(())
}

/// A deleted policy must answer 404 on `get`.
fn expect_policy_gone(client: &PolicyClient, name: &str, port: u16) -> Result<()> {
    match client.get(name, port) {
        Ok(body) => Err(anyhow!(HarnessError::AssertionFailure(format!(
            "Policy {} is still returned after delete: {}",
            name, body
        )))),
        Err(err) if HarnessError::unexpected_status(&err) == Some(404) => Ok(()),
        Err(err) => Err(err.context(format!("get deleted policy {}", name))),
    }
}

fn expect_policies_listed(ctx: &mut ScenarioContext<'_>, amount: usize) -> Result<()> {
    let port = ctx.require_port()?;
    let client = ctx.client;
    let outcome = poll_until(&ctx.config.poll, || {
        let names = client.list(port)?.policy_names()?;
        Ok(if names.len() == amount {
            Probe::Done(names)
        } else {
            Probe::Pending(names)
        })
    })?;
    if outcome.value.len() != amount {
        return Err(anyhow!(HarnessError::AssertionFailure(format!(
            "Unexpected amount of policies applied to the agent. Policies applied: {:?}",
            outcome.value
        ))));
    }
    Ok(())
}
