//! Configuration loading for the CLI.
//!
//! Priority: explicit `--config` path, then `./config/webpilot.yaml`, then
//! `~/.config/webpilot/config.yaml`. A missing file means defaults.

use std::path::{Path, PathBuf};

use agent_core::AgentLoopConfig;
use anyhow::{Context, Result};
use tokio::fs;
use tracing::{info, warn};

pub const MAX_STEPS_ENV: &str = "WEBPILOT_MAX_STEPS";
pub const STUCK_THRESHOLD_ENV: &str = "WEBPILOT_STUCK_THRESHOLD";

pub struct LoadedConfig {
    pub agent: AgentLoopConfig,
    pub path: PathBuf,
    /// Whether `path` existed and was parsed.
    pub from_file: bool,
}

pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let local = PathBuf::from("config/webpilot.yaml");
    if local.exists() {
        return Ok(local);
    }
    let mut path = dirs::config_dir().context("Failed to get config directory")?;
    path.push("webpilot");
    path.push("config.yaml");
    Ok(path)
}

pub async fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let path = resolve_config_path(explicit)?;

    let (mut agent, from_file) = if path.exists() {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let agent = AgentLoopConfig::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        (agent, true)
    } else {
        warn!(path = %path.display(), "Config file not found, using defaults");
        (AgentLoopConfig::default(), false)
    };

    apply_overrides(&mut agent, |key| std::env::var(key).ok())?;

    Ok(LoadedConfig {
        agent,
        path,
        from_file,
    })
}

/// Apply `WEBPILOT_*` overrides read through `lookup`, then re-check the
/// result.
pub fn apply_overrides<F>(config: &mut AgentLoopConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(MAX_STEPS_ENV) {
        config.max_steps = raw
            .trim()
            .parse()
            .with_context(|| format!("{MAX_STEPS_ENV} must be a positive integer, got '{raw}'"))?;
    }
    if let Some(raw) = lookup(STUCK_THRESHOLD_ENV) {
        config.stuck_threshold = raw.trim().parse().with_context(|| {
            format!("{STUCK_THRESHOLD_ENV} must be a positive integer, got '{raw}'")
        })?;
    }
    config
        .validate()
        .context("Invalid configuration after overrides")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn overrides_replace_defaults() {
        let vars: HashMap<&str, &str> =
            HashMap::from([(MAX_STEPS_ENV, "12"), (STUCK_THRESHOLD_ENV, " 4 ")]);
        let mut config = AgentLoopConfig::default();
        apply_overrides(&mut config, |key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.max_steps, 12);
        assert_eq!(config.stuck_threshold, 4);
    }

    #[test]
    fn malformed_override_is_an_error() {
        let mut config = AgentLoopConfig::default();
        let err = apply_overrides(&mut config, |key| {
            (key == MAX_STEPS_ENV).then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains(MAX_STEPS_ENV));
        assert_eq!(config.max_steps, 30);
    }

    #[test]
    fn zero_overrides_are_rejected() {
        for key in [MAX_STEPS_ENV, STUCK_THRESHOLD_ENV] {
            let mut config = AgentLoopConfig::default();
            let err = apply_overrides(&mut config, |name| (name == key).then(|| "0".to_string()))
                .unwrap_err();
            assert!(format!("{err:#}").contains("at least 1"), "{key}: {err:#}");
        }
    }

    #[tokio::test]
    async fn loads_yaml_file_with_partial_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webpilot.yaml");
        std::fs::write(&path, "max_steps: 20\nloop_skip_after: 2\n").unwrap();

        let loaded = load_config(Some(&path)).await.unwrap();
        assert!(loaded.from_file);
        assert_eq!(loaded.agent.loop_skip_after, 2);
        assert_eq!(loaded.agent.observation_window, 5);
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_config(Some(&dir.path().join("absent.yaml")))
            .await
            .unwrap();
        assert!(!loaded.from_file);
        assert_eq!(loaded.agent.loop_skip_after, 3);
    }
}
