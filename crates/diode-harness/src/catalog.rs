use anyhow::Result;

use crate::scenario::Scenario;

const BUILTIN: &[(&str, &str)] = &[
    (
        "Agent: run with default port",
        "Given that a diode configuration file exist with default configuration and port default
         When the diode agent is run using existing configuration file
         Then the diode agent container is running",
    ),
    (
        "Agent: run with available port",
        "Given that a diode configuration file exist with default configuration and port available
         When the diode agent is run using existing configuration file
         Then the diode agent container is running",
    ),
    (
        "Agent: run with unavailable port",
        "Given that a diode configuration file exist with default configuration and port available
         And the diode agent is run using existing configuration file
         And the diode agent container is running
         And that a diode configuration file exist with default configuration and port unavailable
         When the diode agent is run using existing configuration file
         Then the diode agent container is exited",
    ),
    (
        "Policies: apply one policy",
        "Given that a diode configuration file exist with default configuration and port available
         And the diode agent is run using existing configuration file
         And the diode agent container is running
         When 1 policy is applied to the agent
         Then policies route shows 1 policy applied",
    ),
    (
        "Policies: apply three policies",
        "Given that a diode configuration file exist with default configuration and port available
         And the diode agent is run using existing configuration file
         And the diode agent container is running
         When 3 policies are applied to the agent
         Then policies route shows 3 policies applied",
    ),
    (
        "Policies: delete two of three policies",
        "Given that a diode configuration file exist with default configuration and port available
         And the diode agent is run using existing configuration file
         And the diode agent container is running
         And 3 policies are applied to the agent
         When 2 policies are deleted from agent
         Then policies route shows 1 policy applied",
    ),
    (
        "Cleanup: remove generated files and test containers",
        "Given remove all the agents .yaml generated on test process
         Then force remove of all agent containers whose names start with the test prefix",
    ),
];

/// Built-in scenarios, in run order.
pub fn builtin() -> Result<Vec<Scenario>> {
    BUILTIN
        .iter()
        .map(|(label, text)| Scenario::parse(*label, text))
        .collect()
}

/// Built-in scenarios whose label contains `filter`, case-insensitively.
pub fn select(filter: Option<&str>) -> Result<Vec<Scenario>> {
    let scenarios = builtin()?;
    let Some(filter) = filter else {
        return Ok(scenarios);
    };
    let needle = filter.to_lowercase();
    Ok(scenarios
        .into_iter()
        .filter(|s| s.label.to_lowercase().contains(&needle))
        .collect())
}
