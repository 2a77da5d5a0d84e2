use anyhow::{anyhow, Result};
use diode_container::{AgentConfigFile, ContainerRuntime};
use diode_core::HarnessError;
use diode_policy::PolicyClient;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::TestConfig;

/// Mutable state shared by the steps of one scenario.
pub struct ScenarioContext<'a> {
    pub config: &'a TestConfig,
    pub runtime: &'a dyn ContainerRuntime,
    pub client: &'a PolicyClient,
    /// Containers started in this scenario, id -> agent port.
    pub containers: BTreeMap<String, u16>,
    /// Most recently started container.
    pub container_id: Option<String>,
    pub agent_config: Option<AgentConfigFile>,
    pub port: Option<u16>,
    /// Applied policies by name, with the document sent on create.
    pub policies: BTreeMap<String, Value>,
}

impl<'a> ScenarioContext<'a> {
    pub fn new(
        config: &'a TestConfig,
        runtime: &'a dyn ContainerRuntime,
        client: &'a PolicyClient,
    ) -> Self {
        Self {
            config,
            runtime,
            client,
            containers: BTreeMap::new(),
            container_id: None,
            agent_config: None,
            port: None,
            policies: BTreeMap::new(),
        }
    }

    pub fn require_port(&self) -> Result<u16> {
        self.port.ok_or_else(|| {
            anyhow!(HarnessError::InvalidArgument(
                "no agent port was chosen in this scenario".to_string()
            ))
        })
    }

    pub fn require_container(&self) -> Result<&str> {
        self.container_id.as_deref().ok_or_else(|| {
            anyhow!(HarnessError::InvalidArgument(
                "no agent container was started in this scenario".to_string()
            ))
        })
    }
}
