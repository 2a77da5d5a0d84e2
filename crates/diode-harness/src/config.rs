use anyhow::{anyhow, Context, Result};
use diode_core::{HarnessError, PollSettings};
use diode_policy::DEFAULT_API_URL;
use ini::Ini;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "./features/config.ini";
pub const CONFIG_SECTION: &str = "test_config";
pub const DEFAULT_AGENT_IMAGE_NAME: &str = "orbcommunity/diode-agent";
pub const DEFAULT_AGENT_IMAGE_TAG: &str = "develop";

/// Settings for one test run. Built once at startup and handed to every
/// scenario by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct TestConfig {
    /// Host directory for generated agent config files, mounted into the
    /// agent container.
    pub local_path: PathBuf,
    /// `<agent_docker_image>:<agent_docker_tag>`.
    pub agent_image: String,
    pub agent_api_url: String,
    pub settle: Duration,
    pub poll: PollSettings,
    pub readiness_probe: bool,
}

impl TestConfig {
    /// Defaults for everything except the local path, which must exist. The
    /// path is made absolute since docker reads a relative `-v` source as a
    /// named volume.
    pub fn new(local_path: impl Into<PathBuf>) -> Result<Self> {
        let local_path = local_path.into();
        if !local_path.is_dir() {
            return Err(anyhow!(HarnessError::InvalidArgument(format!(
                "Invalid path: {}.",
                local_path.display()
            ))));
        }
        let local_path = local_path
            .canonicalize()
            .with_context(|| format!("failed to resolve {}", local_path.display()))?;
        Ok(Self {
            local_path,
            agent_image: format!("{}:{}", DEFAULT_AGENT_IMAGE_NAME, DEFAULT_AGENT_IMAGE_TAG),
            agent_api_url: DEFAULT_API_URL.to_string(),
            settle: diode_container::DEFAULT_SETTLE_TIME,
            poll: PollSettings::default(),
            readiness_probe: false,
        })
    }

    /// Reads the `[test_config]` section of an INI file. A missing file means
    /// all defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no test config file, using defaults");
            return Self::from_ini(&Ini::new());
        }
        let ini = Ini::load_from_file(path)
            .with_context(|| format!("failed to read test config {}", path.display()))?;
        Self::from_ini(&ini)
    }

    pub fn from_ini_str(raw: &str) -> Result<Self> {
        let ini = Ini::load_from_str(raw).context("failed to parse test config")?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self> {
        let section = ini.section(Some(CONFIG_SECTION));
        let get = |key: &str| section.and_then(|props| props.get(key)).map(str::trim);

        let local_path = match get("local_path") {
            Some(raw) if !raw.is_empty() => PathBuf::from(raw),
            _ => std::env::current_dir()?,
        };
        let mut config = Self::new(local_path)?;

        let image = get("agent_docker_image").unwrap_or(DEFAULT_AGENT_IMAGE_NAME);
        let tag = get("agent_docker_tag").unwrap_or(DEFAULT_AGENT_IMAGE_TAG);
        config.agent_image = format!("{}:{}", image, tag);

        if let Some(url) = get("agent_api_url") {
            config.agent_api_url = url.to_string();
        }
        if let Some(raw) = get("settle_seconds") {
            config.settle = parse_seconds("settle_seconds", raw)?;
        }
        if let Some(raw) = get("poll_timeout_seconds") {
            config.poll.timeout = parse_seconds("poll_timeout_seconds", raw)?;
        }
        if let Some(raw) = get("poll_interval_seconds") {
            config.poll.interval = parse_seconds("poll_interval_seconds", raw)?;
        }
        if let Some(raw) = get("readiness_probe") {
            config.readiness_probe = parse_bool("readiness_probe", raw)?;
        }
        Ok(config)
    }
}

fn parse_seconds(key: &str, raw: &str) -> Result<Duration> {
    let secs: f64 = raw
        .parse()
        .map_err(|_| invalid(key, raw, "expected a number of seconds"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(invalid(key, raw, "must be a non-negative number"));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| invalid(key, raw, "out of range"))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Ok(true),
        "0" | "no" | "false" | "off" => Ok(false),
        _ => Err(invalid(key, raw, "expected a boolean")),
    }
}

fn invalid(key: &str, raw: &str, why: &str) -> anyhow::Error {
    anyhow!(HarnessError::InvalidArgument(format!(
        "{} = '{}': {}",
        key, raw, why
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_apply_when_keys_are_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let raw = format!("[test_config]\nlocal_path = {}\n", dir.path().display());
        let config = TestConfig::from_ini_str(&raw).expect("config");
        assert_eq!(config.local_path, dir.path().canonicalize().unwrap());
        assert_eq!(config.agent_image, "orbcommunity/diode-agent:develop");
        assert_eq!(config.agent_api_url, "http://localhost");
        assert_eq!(config.settle, Duration::from_secs(5));
        assert_eq!(config.poll, PollSettings::default());
        assert!(!config.readiness_probe);
    }

    #[test]
    fn image_and_timing_keys_are_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let raw = format!(
            "[test_config]\nlocal_path = {}\nagent_docker_image = registry.local/diode\n\
             agent_docker_tag = 1.2.3\nsettle_seconds = 0.5\npoll_timeout_seconds = 10\n\
             poll_interval_seconds = 0.25\nreadiness_probe = yes\n",
            dir.path().display()
        );
        let config = TestConfig::from_ini_str(&raw).expect("config");
        assert_eq!(config.agent_image, "registry.local/diode:1.2.3");
        assert_eq!(config.settle, Duration::from_millis(500));
        assert_eq!(config.poll.timeout, Duration::from_secs(10));
        assert_eq!(config.poll.interval, Duration::from_millis(250));
        assert!(config.readiness_probe);
    }

    #[test]
    fn missing_local_path_is_rejected() {
        let err = TestConfig::from_ini_str("[test_config]\nlocal_path = /definitely/not/here\n")
            .unwrap_err();
        assert!(err.to_string().contains("Invalid path"));
    }

    #[test]
    fn negative_and_garbage_values_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        for bad in [
            "settle_seconds = -1",
            "settle_seconds = 1e30",
            "poll_interval_seconds = inf",
            "poll_timeout_seconds = soon",
            "readiness_probe = maybe",
        ] {
            let raw = format!("[test_config]\nlocal_path = {}\n{}\n", dir.path().display(), bad);
            let err = TestConfig::from_ini_str(&raw).unwrap_err();
            assert!(
                matches!(HarnessError::find(&err), Some(HarnessError::InvalidArgument(_))),
                "{}: {}",
                bad,
                err
            );
        }
    }

    #[test]
    fn relative_local_path_is_made_absolute() {
        let config = TestConfig::new(".").expect("config");
        assert!(config.local_path.is_absolute());
        assert_eq!(config.local_path, std::env::current_dir().unwrap().canonicalize().unwrap());
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.ini");
        fs::write(
            &path,
            format!("[test_config]\nlocal_path = {}\nagent_docker_tag = latest\n", dir.path().display()),
        )
        .expect("write");
        let config = TestConfig::load(&path).expect("load");
        assert_eq!(config.agent_image, "orbcommunity/diode-agent:latest");
    }
}
