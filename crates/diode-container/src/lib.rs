pub mod agent_config;
pub mod docker;
pub mod runtime;

pub use agent_config::{AgentConfigBuilder, AgentConfigDocument, AgentConfigFile, DiodeConfig};
pub use docker::DockerCli;
pub use runtime::{
    remove_by_name_prefix, ContainerRuntime, ContainerStatus, NetworkMode, RunSpec, VolumeMount,
    DEFAULT_SETTLE_TIME,
};
