pub mod error;
pub mod files;
pub mod names;
pub mod poll;
pub mod ports;

pub use error::HarnessError;
pub use files::{find_files, remove_files};
pub use names::{prefixed_name, random_string, LetterCase};
pub use poll::{poll_until, PollOutcome, PollSettings, Probe};
pub use ports::{allocate_port, PortAvailability, MAX_ALLOCATION_ATTEMPTS};

pub const DIODE_CONTAINER_CONFIG_DIR: &str = "/opt/diode/";
pub const DIODE_AGENT_DEFAULT_PORT: u16 = 10911;
pub const DIODE_POLICY_KIND: &str = "discovery";
pub const DIODE_POLICY_BACKEND: &str = "suzieq";

pub const AGENT_FILE_NAME_PREFIX: &str = "test_diode_agent_";
pub const AGENT_FILE_SUFFIX: &str = ".yaml";
pub const POLICY_NAME_PREFIX: &str = "test_diode_policy_";
pub const LOCAL_AGENT_CONTAINER_NAME: &str = "diode-agent-int-test";
