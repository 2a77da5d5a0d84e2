use anyhow::{anyhow, Result};
use diode_core::{
    prefixed_name, HarnessError, DIODE_POLICY_BACKEND, DIODE_POLICY_KIND, POLICY_NAME_PREFIX,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventorySource {
    pub name: String,
    pub hosts: Vec<SourceHost>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHost {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryDevice {
    pub name: String,
    pub transport: String,
    #[serde(rename = "ignore-known-hosts")]
    pub ignore_known_hosts: bool,
    #[serde(rename = "slow-host")]
    pub slow_host: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryAuth {
    pub name: String,
    pub username: String,
    pub password: String,
}

/// Links one source and one device by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryNamespace {
    pub name: String,
    pub source: String,
    pub device: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub sources: Vec<InventorySource>,
    pub devices: Vec<InventoryDevice>,
    pub auths: Vec<InventoryAuth>,
    pub namespaces: Vec<InventoryNamespace>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyData {
    pub inventory: Inventory,
}

/// The body stored under the policy name in the agent's policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    pub kind: String,
    pub backend: String,
    pub config: Map<String, Value>,
    pub data: PolicyData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    name: String,
    spec: PolicySpec,
}

impl Policy {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_backend(name, DIODE_POLICY_KIND, DIODE_POLICY_BACKEND)
    }

    pub fn with_backend(name: impl Into<String>, kind: &str, backend: &str) -> Self {
        let mut config = Map::new();
        config.insert("netbox".to_string(), json!({}));
        Self {
            name: name.into(),
            spec: PolicySpec {
                kind: kind.to_string(),
                backend: backend.to_string(),
                config,
                data: PolicyData::default(),
            },
        }
    }

    /// A policy named `test_diode_policy_<10 letters>`.
    pub fn random() -> Self {
        Self::new(prefixed_name(POLICY_NAME_PREFIX, 10))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &PolicySpec {
        &self.spec
    }

    pub fn inventory(&self) -> &Inventory {
        &self.spec.data.inventory
    }

    pub fn inventory_mut(&mut self) -> &mut Inventory {
        &mut self.spec.data.inventory
    }

    pub fn config_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.spec.config
    }

    /// Adds one entry of every inventory kind, with the namespace pointing at the
    /// source and device added here.
    pub fn full_test_policy(&mut self) -> &mut Self {
        let source_name = format!("{}_source", prefixed_name(POLICY_NAME_PREFIX, 4));
        let device_name = format!("{}_devices", prefixed_name(POLICY_NAME_PREFIX, 4));
        let namespace_name = format!("{}_namespace", prefixed_name(POLICY_NAME_PREFIX, 4));

        let inventory = self.inventory_mut();
        inventory.sources.push(InventorySource {
            name: source_name.clone(),
            hosts: vec![
                SourceHost {
                    url: "ssh://test.diode.agent username=test1".to_string(),
                },
                SourceHost {
                    url: "ssh://other.test.agent username=test2".to_string(),
                },
            ],
        });
        inventory.devices.push(InventoryDevice {
            name: device_name.clone(),
            transport: "ssh".to_string(),
            ignore_known_hosts: true,
            slow_host: true,
        });
        inventory.auths.extend([
            InventoryAuth {
                name: "suzieq-u".to_string(),
                username: "test1".to_string(),
                password: "test@123".to_string(),
            },
            InventoryAuth {
                name: "suzieq-x".to_string(),
                username: "test2".to_string(),
                password: "12345678".to_string(),
            },
        ]);
        inventory.namespaces.push(InventoryNamespace {
            name: namespace_name,
            source: source_name,
            device: device_name,
        });
        self
    }

    pub fn validate_references(&self) -> Result<()> {
        let inventory = self.inventory();
        let sources: BTreeSet<&str> = inventory.sources.iter().map(|s| s.name.as_str()).collect();
        let devices: BTreeSet<&str> = inventory.devices.iter().map(|d| d.name.as_str()).collect();
        for namespace in &inventory.namespaces {
            if !sources.contains(namespace.source.as_str()) {
                return Err(anyhow!(HarnessError::DanglingReference {
                    namespace: namespace.name.clone(),
                    kind: "source",
                    target: namespace.source.clone(),
                }));
            }
            if !devices.contains(namespace.device.as_str()) {
                return Err(anyhow!(HarnessError::DanglingReference {
                    namespace: namespace.name.clone(),
                    kind: "device",
                    target: namespace.device.clone(),
                }));
            }
        }
        Ok(())
    }

    /// The policy body as structured data, the shape the agent echoes back.
    pub fn document(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.spec)?)
    }

    /// Serializes `{name: spec}` as the YAML request body for policy creation.
    pub fn to_yaml(&self) -> Result<String> {
        self.validate_references()?;
        let mut document = BTreeMap::new();
        document.insert(self.name.as_str(), &self.spec);
        Ok(serde_yaml::to_string(&document)?)
    }
}
