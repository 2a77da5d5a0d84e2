use anyhow::{Context, Result};
use diode_core::{
    prefixed_name, AGENT_FILE_NAME_PREFIX, AGENT_FILE_SUFFIX, DIODE_CONTAINER_CONFIG_DIR,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_OUTPUT_TYPE: &str = "otlp";
pub const DEFAULT_OUTPUT_HOST: &str = "0.0.0.0";
pub const DEFAULT_OUTPUT_PORT: u16 = 4317;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfigDocument {
    pub diode: DiodeSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiodeSection {
    pub config: DiodeConfig,
}

/// The `diode.config` block the agent reads at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiodeConfig {
    pub output_type: String,
    pub output_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_auth: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl AgentConfigDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read agent config {}", path.display()))?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfigBuilder {
    config: DiodeConfig,
}

impl Default for AgentConfigBuilder {
    fn default() -> Self {
        Self {
            config: DiodeConfig {
                output_type: DEFAULT_OUTPUT_TYPE.to_string(),
                output_path: format!("{}:{}", DEFAULT_OUTPUT_HOST, DEFAULT_OUTPUT_PORT),
                port: None,
                host: None,
                debug: None,
                output_auth: None,
                extra: BTreeMap::new(),
            },
        }
    }
}

impl AgentConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(mut self, output_type: &str, host: &str, port: u16) -> Self {
        self.config.output_type = output_type.to_string();
        self.config.output_path = format!("{}:{}", host, port);
        self
    }

    /// Port the agent's policy API binds, overriding its built-in default.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = Some(port);
        self
    }

    pub fn host(mut self, host: &str) -> Self {
        self.config.host = Some(host.to_string());
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = Some(debug);
        self
    }

    pub fn output_auth(mut self, auth: &str) -> Self {
        self.config.output_auth = Some(auth.to_string());
        self
    }

    pub fn set(mut self, key: &str, value: impl Into<serde_yaml::Value>) -> Self {
        self.config.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn document(&self) -> AgentConfigDocument {
        AgentConfigDocument {
            diode: DiodeSection {
                config: self.config.clone(),
            },
        }
    }

    pub fn render(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.document())?)
    }

    /// Writes `test_diode_agent_<random>.yaml` into `dir`.
    pub fn write(&self, dir: &Path) -> Result<AgentConfigFile> {
        let contents = self.render()?;
        let name = prefixed_name(AGENT_FILE_NAME_PREFIX, 10);
        let path = dir.join(format!("{}{}", name, AGENT_FILE_SUFFIX));
        fs::write(&path, &contents)
            .with_context(|| format!("failed to write agent config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "wrote agent config file");
        Ok(AgentConfigFile {
            name,
            path,
            contents,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfigFile {
    /// File stem; also used as the container name.
    pub name: String,
    pub path: PathBuf,
    pub contents: String,
}

impl AgentConfigFile {
    pub fn container_path(&self) -> String {
        format!("{}{}{}", DIODE_CONTAINER_CONFIG_DIR, self.name, AGENT_FILE_SUFFIX)
    }

    pub fn agent_command(&self) -> Vec<String> {
        vec!["run".to_string(), "-c".to_string(), self.container_path()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_only_output_keys() {
        let rendered = AgentConfigBuilder::new().render().expect("render");
        let value: serde_yaml::Value = serde_yaml::from_str(&rendered).expect("yaml");
        let config = &value["diode"]["config"];
        assert_eq!(config["output_type"].as_str(), Some("otlp"));
        assert_eq!(config["output_path"].as_str(), Some("0.0.0.0:4317"));
        assert_eq!(config.as_mapping().expect("mapping").len(), 2);
    }

    #[test]
    fn port_override_lands_under_diode_config() {
        let rendered = AgentConfigBuilder::new()
            .port(41234)
            .set("tags", "int-test")
            .render()
            .expect("render");
        let value: serde_yaml::Value = serde_yaml::from_str(&rendered).expect("yaml");
        assert_eq!(value["diode"]["config"]["port"].as_u64(), Some(41234));
        assert_eq!(value["diode"]["config"]["tags"].as_str(), Some("int-test"));
    }

    #[test]
    fn write_names_file_with_prefix_and_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = AgentConfigBuilder::new()
            .output("file", "/tmp", 0)
            .port(40001)
            .debug(true)
            .write(dir.path())
            .expect("write");
        assert!(file.name.starts_with(AGENT_FILE_NAME_PREFIX));
        assert_eq!(file.path.parent(), Some(dir.path()));
        assert_eq!(
            file.container_path(),
            format!("/opt/diode/{}.yaml", file.name)
        );
        assert_eq!(
            file.agent_command(),
            vec!["run".to_string(), "-c".to_string(), file.container_path()]
        );

        let loaded = AgentConfigDocument::load(&file.path).expect("load");
        assert_eq!(loaded.diode.config.port, Some(40001));
        assert_eq!(loaded.diode.config.debug, Some(true));
        assert_eq!(loaded.diode.config.output_path, "/tmp:0");
    }
}
