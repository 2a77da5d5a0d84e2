use anyhow::{anyhow, Context, Result};
use diode_container::{AgentConfigDocument, ContainerRuntime, ContainerStatus, RunSpec};
use diode_core::{random_string, HarnessError, LetterCase, DIODE_AGENT_DEFAULT_PORT};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::thread;

use crate::agent::StubAgent;

struct StubContainer {
    name: String,
    status: ContainerStatus,
    agent: Option<StubAgent>,
}

/// [`ContainerRuntime`] that "runs" the agent image as an in-process
/// [`StubAgent`] on the port named in the mounted config file.
///
/// A port that is already bound makes the container exit right away, the way
/// the real agent dies on a bind conflict.
#[derive(Default)]
pub struct StubRuntime {
    containers: Mutex<BTreeMap<String, StubContainer>>,
}

impl StubRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn containers(&self) -> MutexGuard<'_, BTreeMap<String, StubContainer>> {
        self.containers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Looks a container up by id or name, as the docker CLI does.
    fn resolve(containers: &BTreeMap<String, StubContainer>, key: &str) -> Result<String> {
        if containers.contains_key(key) {
            return Ok(key.to_string());
        }
        containers
            .iter()
            .find(|(_, c)| c.name == key)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| anyhow!(HarnessError::ContainerNotFound(key.to_string())))
    }
}

/// Host path of the config file passed with `-c`, translated through the mounts.
fn host_config_path(spec: &RunSpec) -> Result<PathBuf> {
    let container_path = spec
        .command
        .windows(2)
        .find(|pair| pair[0] == "-c" || pair[0] == "--config")
        .map(|pair| pair[1].as_str())
        .ok_or_else(|| anyhow!("agent command has no -c <config> argument"))?;
    for mount in &spec.volumes {
        if let Some(relative) = container_path.strip_prefix(&mount.container) {
            return Ok(mount.host.join(relative.trim_start_matches('/')));
        }
    }
    Err(anyhow!(
        "config path {} is not under any mounted volume",
        container_path
    ))
}

impl ContainerRuntime for StubRuntime {
    fn run(&self, spec: &RunSpec) -> Result<String> {
        if self.containers().values().any(|c| c.name == spec.name) {
            return Err(anyhow!(HarnessError::ContainerStartFailure(format!(
                "container name \"{}\" is already in use",
                spec.name
            ))));
        }
        let config_path = host_config_path(spec)
            .map_err(|err| anyhow!(HarnessError::ContainerStartFailure(err.to_string())))?;
        let config = AgentConfigDocument::load(&config_path)
            .with_context(|| format!("stub container {}", spec.name))?;
        let port = config.diode.config.port.unwrap_or(DIODE_AGENT_DEFAULT_PORT);

        let (status, agent) = match StubAgent::start(port) {
            Ok(agent) => (ContainerStatus::Running, Some(agent)),
            Err(err) => {
                tracing::info!(port, error = %err, "stub agent failed to bind, container exits");
                (ContainerStatus::Exited, None)
            }
        };
        let id = random_string(12, LetterCase::Lower);
        self.containers().insert(
            id.clone(),
            StubContainer {
                name: spec.name.clone(),
                status,
                agent,
            },
        );
        thread::sleep(spec.settle);
        Ok(id)
    }

    fn stop(&self, id: &str) -> Result<()> {
        let mut containers = self.containers();
        let key = Self::resolve(&containers, id)?;
        if let Some(container) = containers.get_mut(&key) {
            container.agent = None;
            container.status = ContainerStatus::Exited;
        }
        Ok(())
    }

    fn remove(&self, id: &str, force: bool) -> Result<()> {
        let mut containers = self.containers();
        let key = Self::resolve(&containers, id)?;
        let running = containers
            .get(&key)
            .is_some_and(|c| c.status == ContainerStatus::Running);
        if running && !force {
            return Err(anyhow!(
                "cannot remove running container {}: stop the container before removal or force remove",
                id
            ));
        }
        containers.remove(&key);
        Ok(())
    }

    fn inspect_status(&self, id: &str) -> Result<ContainerStatus> {
        let containers = self.containers();
        let key = Self::resolve(&containers, id)?;
        containers
            .get(&key)
            .map(|c| c.status)
            .ok_or_else(|| anyhow!(HarnessError::ContainerNotFound(id.to_string())))
    }

    fn list_names(&self) -> Result<Vec<String>> {
        Ok(self.containers().values().map(|c| c.name.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diode_container::{AgentConfigBuilder, VolumeMount};
    use diode_core::{allocate_port, PortAvailability};
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn spec_for(dir: &std::path::Path, port: u16) -> RunSpec {
        let file = AgentConfigBuilder::new()
            .port(port)
            .write(dir)
            .expect("config file");
        RunSpec::new("orbcommunity/diode-agent:develop", &file.name)
            .volume(VolumeMount::agent_config_dir(dir))
            .command(file.agent_command())
            .settle(Duration::ZERO)
    }

    #[test]
    fn run_maps_container_config_path_to_host() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = spec_for(dir.path(), 1);
        let path = host_config_path(&spec).expect("path");
        assert!(path.starts_with(dir.path()));
        assert!(path.exists());
    }

    #[test]
    fn lifecycle_follows_docker_semantics() {
        let dir = tempfile::tempdir().expect("tempdir");
        let port = allocate_port(PortAvailability::Available, &BTreeSet::new()).expect("port");
        let runtime = StubRuntime::new();
        let spec = spec_for(dir.path(), port);

        let id = runtime.run(&spec).expect("run");
        assert_eq!(runtime.inspect_status(&id).unwrap(), ContainerStatus::Running);
        assert!(runtime.run(&spec).is_err(), "duplicate names are rejected");
        assert!(runtime.remove(&id, false).is_err(), "running container needs force");

        runtime.stop(&id).expect("stop");
        assert_eq!(runtime.inspect_status(&id).unwrap(), ContainerStatus::Exited);
        runtime.remove(&id, false).expect("remove");

        let err = runtime.inspect_status(&id).unwrap_err();
        assert!(HarnessError::is_container_not_found(&err));
        assert!(HarnessError::is_container_not_found(
            &runtime.stop(&id).unwrap_err()
        ));
    }

    #[test]
    fn port_conflict_exits_second_container() {
        let dir = tempfile::tempdir().expect("tempdir");
        let port = allocate_port(PortAvailability::Available, &BTreeSet::new()).expect("port");
        let runtime = StubRuntime::new();

        let first = runtime.run(&spec_for(dir.path(), port)).expect("first");
        let second = runtime.run(&spec_for(dir.path(), port)).expect("second");
        assert_eq!(runtime.inspect_status(&first).unwrap(), ContainerStatus::Running);
        assert_eq!(runtime.inspect_status(&second).unwrap(), ContainerStatus::Exited);
        assert_eq!(runtime.list_names().unwrap().len(), 2);
    }
}
