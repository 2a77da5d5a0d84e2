use anyhow::{anyhow, Context, Result};
use diode_core::HarnessError;
use std::ffi::OsString;
use std::process::{Command, Output};
use std::thread;

use crate::runtime::{ContainerRuntime, ContainerStatus, RunSpec};

/// [`ContainerRuntime`] backed by the `docker` command line.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: OsString,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            binary: OsString::from("docker"),
        }
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(binary: impl Into<OsString>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    fn output(&self, mut cmd: Command, step: &str) -> Result<Output> {
        cmd.output()
            .with_context(|| format!("{}: failed to invoke {:?}", step, self.binary))
    }

    /// Runs a command that targets one container; a missing container becomes
    /// [`HarnessError::ContainerNotFound`].
    fn run_for_container(&self, cmd: Command, id: &str, step: &str) -> Result<Output> {
        let out = self.output(cmd, step)?;
        if out.status.success() {
            return Ok(out);
        }
        let detail = failure_detail(&out);
        if is_missing_container(&detail) {
            return Err(anyhow!(HarnessError::ContainerNotFound(id.to_string())));
        }
        Err(anyhow!("{}: {}", step, detail))
    }
}

pub fn run_args(spec: &RunSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--network".to_string(),
        spec.network_mode.as_arg(),
    ];
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }
    for mount in &spec.volumes {
        args.push("-v".to_string());
        args.push(mount.as_arg());
    }
    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

fn failure_detail(out: &Output) -> String {
    let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if !stderr.is_empty() {
        stderr
    } else if !stdout.is_empty() {
        stdout
    } else {
        "command exited non-zero".to_string()
    }
}

fn is_missing_container(detail: &str) -> bool {
    detail.to_ascii_lowercase().contains("no such container")
}

impl ContainerRuntime for DockerCli {
    fn run(&self, spec: &RunSpec) -> Result<String> {
        let mut cmd = self.command();
        cmd.args(run_args(spec));
        let out = self.output(cmd, "docker run")?;
        if !out.status.success() {
            return Err(anyhow!(HarnessError::ContainerStartFailure(
                failure_detail(&out)
            )));
        }
        let id = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if id.is_empty() {
            return Err(anyhow!(HarnessError::ContainerStartFailure(
                "container id is missing".to_string()
            )));
        }
        tracing::info!(container_id = %id, image = %spec.image, name = %spec.name, "agent container started");
        thread::sleep(spec.settle);
        Ok(id)
    }

    fn stop(&self, id: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(["stop", id]);
        self.run_for_container(cmd, id, "docker stop")?;
        tracing::info!(container_id = %id, "agent container stopped");
        Ok(())
    }

    fn remove(&self, id: &str, force: bool) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("rm");
        if force {
            cmd.arg("-f");
        }
        cmd.arg(id);
        self.run_for_container(cmd, id, "docker rm")?;
        tracing::info!(container_id = %id, force, "agent container removed");
        Ok(())
    }

    fn inspect_status(&self, id: &str) -> Result<ContainerStatus> {
        let mut cmd = self.command();
        cmd.args(["inspect", "--format", "{{.State.Status}}", id]);
        let out = self.run_for_container(cmd, id, "docker inspect")?;
        String::from_utf8_lossy(&out.stdout).parse()
    }

    fn list_names(&self) -> Result<Vec<String>> {
        let mut cmd = self.command();
        cmd.args(["ps", "-a", "--format", "{{.Names}}"]);
        let out = self.output(cmd, "docker ps")?;
        if !out.status.success() {
            return Err(anyhow!("docker ps: {}", failure_detail(&out)));
        }
        Ok(String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}
