//! Configuration loading from TOML files and environment variables.
//!
//! The first config file found wins:
//! 1. TOML file specified via `--config`
//! 2. `./mender.toml` in the current directory
//! 3. `$XDG_CONFIG_HOME/mender/mender.toml` (or `~/.config/mender/mender.toml`)
//! 4. Built-in defaults
//!
//! Environment variables (`MENDER_API_KEY`, `MENDER_BASE_URL`, `MENDER_MODEL`)
//! then override the file.

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

mod defaults;
mod types;

use defaults::CONFIG_FILE_NAME;
pub use defaults::DEFAULT_SYSTEM_PROMPT;
pub use types::{
    AgentConfig, ApiConfig, Config, DisplayConfig, SnapshotsConfig, ToolsConfig, TruncationConfig,
};

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Explicit(PathBuf),
    Local(PathBuf),
    Global(PathBuf),
    BuiltInDefaults,
}

/// Configuration payload plus its source.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub source: ConfigSource,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load configuration from disk and environment.
///
/// `path_override` is an explicit config file path (from `--config`).
pub fn load_config(path_override: Option<&Path>) -> Result<Config, ConfigError> {
    Ok(load_config_with_source(path_override)?.config)
}

/// Load configuration and report which file (if any) supplied it.
pub fn load_config_with_source(path_override: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    load_config_from_sources(
        path_override,
        |path| std::fs::read_to_string(path),
        |name| std::env::var(name).ok(),
        config_root_dir,
    )
}

fn load_config_from_sources<FRead, FEnv, FRoot>(
    path_override: Option<&Path>,
    read_file: FRead,
    env_lookup: FEnv,
    config_root: FRoot,
) -> Result<LoadedConfig, ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FEnv: Fn(&str) -> Option<String>,
    FRoot: Fn() -> Option<PathBuf>,
{
    let (text, source) = read_config_text(path_override, &read_file, &config_root)?;
    let mut config: Config = toml::from_str(&text)?;
    apply_env_overrides(&mut config, &env_lookup);
    validate(&config)?;
    Ok(LoadedConfig { config, source })
}

fn read_config_text<FRead, FRoot>(
    path_override: Option<&Path>,
    read_file: &FRead,
    config_root: &FRoot,
) -> Result<(String, ConfigSource), ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FRoot: Fn() -> Option<PathBuf>,
{
    if let Some(path) = path_override {
        let text = read_file(path)?;
        return Ok((text, ConfigSource::Explicit(path.to_path_buf())));
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if let Ok(text) = read_file(&local) {
        return Ok((text, ConfigSource::Local(local)));
    }
    if let Some(dir) = config_root() {
        let global = dir.join("mender").join(CONFIG_FILE_NAME);
        if let Ok(text) = read_file(&global) {
            return Ok((text, ConfigSource::Global(global)));
        }
    }

    Ok((String::new(), ConfigSource::BuiltInDefaults))
}

/// Apply env overrides and resolve the API key.
///
/// Key precedence: `MENDER_API_KEY`, then `api.api_key`, then the variable
/// named by `api.api_key_env`.
fn apply_env_overrides<FEnv>(config: &mut Config, env_lookup: &FEnv)
where
    FEnv: Fn(&str) -> Option<String>,
{
    let non_empty = |name: &str| env_lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(url) = non_empty("MENDER_BASE_URL") {
        config.api.base_url = url;
    }
    if let Some(model) = non_empty("MENDER_MODEL") {
        config.api.model = model;
    }
    if let Some(key) = non_empty("MENDER_API_KEY") {
        config.api.api_key = key;
    } else if config.api.api_key.trim().is_empty() {
        if let Some(key) = config.api.api_key_env.as_deref().and_then(non_empty) {
            config.api.api_key = key;
        }
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.api.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("api.base_url must not be empty".into()));
    }
    if config.api.model.trim().is_empty() {
        return Err(ConfigError::Invalid("api.model must not be empty".into()));
    }
    if config.agent.max_iterations == 0 {
        return Err(ConfigError::Invalid("agent.max_iterations must be at least 1".into()));
    }
    if config.snapshots.max_tracked_files == 0 {
        return Err(ConfigError::Invalid(
            "snapshots.max_tracked_files must be at least 1".into(),
        ));
    }
    Ok(())
}

/// `$XDG_CONFIG_HOME` or the platform config directory.
fn config_root_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .or_else(dirs::config_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io;

    fn files(entries: &[(&str, &str)]) -> impl Fn(&Path) -> Result<String, io::Error> {
        let map: HashMap<PathBuf, String> = entries
            .iter()
            .map(|(p, c)| (PathBuf::from(p), c.to_string()))
            .collect();
        move |path| {
            map.get(path)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "missing"))
        }
    }

    fn env(entries: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn no_root() -> Option<PathBuf> {
        None
    }

    #[test]
    fn defaults_when_nothing_is_found() {
        let loaded = load_config_from_sources(None, files(&[]), env(&[]), no_root).unwrap();
        assert_eq!(loaded.source, ConfigSource::BuiltInDefaults);
        assert_eq!(loaded.config, Config::default());
        assert_eq!(loaded.config.agent.max_iterations, 25);
        assert_eq!(loaded.config.agent.iteration_extension, 10);
        assert_eq!(loaded.config.snapshots.max_tracked_files, 50);
    }

    // Verifies local config beats global, and explicit beats both.
    #[test]
    fn file_precedence() {
        let read = files(&[
            ("mender.toml", "[api]\nmodel = \"local\""),
            ("/xdg/mender/mender.toml", "[api]\nmodel = \"global\""),
            ("/custom.toml", "[api]\nmodel = \"explicit\""),
        ]);
        let root = || Some(PathBuf::from("/xdg"));

        let loaded = load_config_from_sources(None, &read, env(&[]), root).unwrap();
        assert_eq!(loaded.config.api.model, "local");
        assert_eq!(loaded.source, ConfigSource::Local(PathBuf::from("mender.toml")));

        let loaded =
            load_config_from_sources(Some(Path::new("/custom.toml")), &read, env(&[]), root).unwrap();
        assert_eq!(loaded.config.api.model, "explicit");

        let global_only = files(&[("/xdg/mender/mender.toml", "[api]\nmodel = \"global\"")]);
        let loaded = load_config_from_sources(None, global_only, env(&[]), root).unwrap();
        assert_eq!(loaded.config.api.model, "global");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = load_config_from_sources(Some(Path::new("/nope.toml")), files(&[]), env(&[]), no_root)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let read = files(&[(
            "mender.toml",
            "[tools]\ndiagnostics_command = \"cargo check\"\n[truncation]\nterminal_chars = 100\n",
        )]);
        let config = load_config_from_sources(None, read, env(&[]), no_root).unwrap().config;
        assert_eq!(config.tools.diagnostics_command.as_deref(), Some("cargo check"));
        assert!(config.tools.shell_confirm);
        assert_eq!(config.truncation.budget_for("run_terminal_command"), 100);
        assert_eq!(config.truncation.budget_for("read_file"), 40_000);
        assert_eq!(config.truncation.budget_for("something_else"), 20_000);
    }

    // Verifies env vars override file values and key resolution order.
    #[test]
    fn env_overrides_and_api_key_resolution() {
        let read = files(&[(
            "mender.toml",
            "[api]\nbase_url = \"http://file\"\napi_key_env = \"MY_KEY\"\n",
        )]);
        let config = load_config_from_sources(
            None,
            &read,
            env(&[("MENDER_BASE_URL", "http://env"), ("MY_KEY", "from-named-var")]),
            no_root,
        )
        .unwrap()
        .config;
        assert_eq!(config.api.base_url, "http://env");
        assert_eq!(config.api.api_key, "from-named-var");

        let config = load_config_from_sources(
            None,
            &read,
            env(&[("MENDER_API_KEY", "canonical"), ("MY_KEY", "from-named-var")]),
            no_root,
        )
        .unwrap()
        .config;
        assert_eq!(config.api.api_key, "canonical");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let read = files(&[("mender.toml", "[agent]\nmax_iterations = 0\n")]);
        let err = load_config_from_sources(None, read, env(&[]), no_root).unwrap_err();
        assert!(err.to_string().contains("max_iterations"));

        let bad_toml = files(&[("mender.toml", "[agent\n")]);
        let err = load_config_from_sources(None, bad_toml, env(&[]), no_root).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }
}
