use anyhow::{anyhow, Result};
use diode_core::{HarnessError, DIODE_CONTAINER_CONFIG_DIR};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_SETTLE_TIME: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NetworkMode {
    #[default]
    Host,
    Bridge,
    None,
    Container(String),
}

impl NetworkMode {
    pub fn as_arg(&self) -> String {
        match self {
            Self::Host => "host".to_string(),
            Self::Bridge => "bridge".to_string(),
            Self::None => "none".to_string(),
            Self::Container(target) => format!("container:{}", target),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub host: PathBuf,
    pub container: String,
}

impl VolumeMount {
    /// Mounts `host_dir` at the agent's config directory.
    pub fn agent_config_dir(host_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: host_dir.into(),
            container: DIODE_CONTAINER_CONFIG_DIR.to_string(),
        }
    }

    pub fn as_arg(&self) -> String {
        format!("{}:{}", self.host.display(), self.container)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub image: String,
    pub name: String,
    pub env: BTreeMap<String, String>,
    pub command: Vec<String>,
    pub volumes: Vec<VolumeMount>,
    pub network_mode: NetworkMode,
    /// Fixed wait after start before the agent is assumed ready.
    pub settle: Duration,
}

impl RunSpec {
    pub fn new(image: &str, name: &str) -> Self {
        Self {
            image: image.to_string(),
            name: name.to_string(),
            env: BTreeMap::new(),
            command: Vec::new(),
            volumes: Vec::new(),
            network_mode: NetworkMode::default(),
            settle: DEFAULT_SETTLE_TIME,
        }
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn volume(mut self, mount: VolumeMount) -> Self {
        self.volumes.push(mount);
        self
    }

    pub fn network_mode(mut self, mode: NetworkMode) -> Self {
        self.network_mode = mode;
        self
    }

    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Restarting,
    Running,
    Removing,
    Paused,
    Exited,
    Dead,
}

impl ContainerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Restarting => "restarting",
            Self::Running => "running",
            Self::Removing => "removing",
            Self::Paused => "paused",
            Self::Exited => "exited",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerStatus {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim() {
            "created" => Ok(Self::Created),
            "restarting" => Ok(Self::Restarting),
            "running" => Ok(Self::Running),
            "removing" => Ok(Self::Removing),
            "paused" => Ok(Self::Paused),
            "exited" => Ok(Self::Exited),
            "dead" => Ok(Self::Dead),
            other => Err(anyhow!(HarnessError::InvalidArgument(format!(
                "unknown container status '{}'",
                other
            )))),
        }
    }
}

/// The container operations the harness needs. Unknown ids must fail with
/// [`HarnessError::ContainerNotFound`] so cleanup code can decide to ignore them.
pub trait ContainerRuntime {
    /// Starts a detached container, waits `spec.settle`, and returns its id.
    fn run(&self, spec: &RunSpec) -> Result<String>;
    fn stop(&self, id: &str) -> Result<()>;
    fn remove(&self, id: &str, force: bool) -> Result<()>;
    fn inspect_status(&self, id: &str) -> Result<ContainerStatus>;
    /// Names of all containers, running or not.
    fn list_names(&self) -> Result<Vec<String>>;
}

/// Force-removes every container whose name starts with `prefix`.
pub fn remove_by_name_prefix(runtime: &dyn ContainerRuntime, prefix: &str) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for name in runtime.list_names()? {
        if name.starts_with(prefix) {
            runtime.remove(&name, true)?;
            removed.push(name);
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_spec_defaults_to_host_network_and_fixed_settle() {
        let spec = RunSpec::new("orbcommunity/diode-agent:develop", "test_diode_agent_x");
        assert_eq!(spec.network_mode, NetworkMode::Host);
        assert_eq!(spec.settle, Duration::from_secs(5));
        assert_eq!(spec.network_mode.as_arg(), "host");
        assert_eq!(
            NetworkMode::Container("abc".to_string()).as_arg(),
            "container:abc"
        );
    }

    #[test]
    fn agent_config_mount_targets_opt_diode() {
        let mount = VolumeMount::agent_config_dir("/srv/tests/");
        assert_eq!(mount.as_arg(), "/srv/tests/:/opt/diode/");
    }

    #[test]
    fn status_parses_runtime_strings() {
        for status in [
            ContainerStatus::Created,
            ContainerStatus::Running,
            ContainerStatus::Exited,
            ContainerStatus::Dead,
        ] {
            assert_eq!(status.as_str().parse::<ContainerStatus>().unwrap(), status);
        }
        assert_eq!(
            "running\n".parse::<ContainerStatus>().unwrap(),
            ContainerStatus::Running
        );
        let err = "sleeping".parse::<ContainerStatus>().unwrap_err();
        assert!(matches!(
            HarnessError::find(&err),
            Some(HarnessError::InvalidArgument(_))
        ));
    }
}
