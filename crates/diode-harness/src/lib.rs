pub mod catalog;
pub mod config;
pub mod context;
pub mod scenario;
pub mod steps;

pub use config::{TestConfig, CONFIG_SECTION, DEFAULT_CONFIG_PATH};
pub use context::ScenarioContext;
pub use scenario::{total_duration, Harness, Scenario, ScenarioReport, ScenarioStatus, StepReport};
pub use steps::{PortChoice, Step};
