use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config as HierarchicalConfig, Environment};
use optimade_client::ClientConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Name of the directory holding the configuration file
const CONFIG_DIR_NAME: &str = "optimade-client";
const CONFIG_DIR_VAR: &str = "OPTIMADE_CONFIG_DIR";
pub const CONFIG_FILE: &str = "optimade.toml";

/// Prefix of environment variables overriding the configuration file
const ENV_PREFIX: &str = "OPTIMADE";
/// Enables debug logging and the `cache` command
pub const DEBUG_VAR: &str = "OPTIMADE_CLIENT_DEBUG";

/// Keys holding lists, parsed from comma separated environment variables
const LIST_KEYS: [&str; 3] = ["providers_urls", "skip_providers", "disable_providers"];

#[derive(Clone, Debug, Deserialize, Default, Serialize)]
pub struct Config {
    /// Client configuration options
    #[serde(default, flatten)]
    pub client: ClientConfig,

    /// Debug mode, set from `$OPTIMADE_CLIENT_DEBUG`
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't read configuration")]
    Build(#[source] config::ConfigError),
    #[error("couldn't parse configuration")]
    Deserialize(#[source] config::ConfigError),
}

impl Config {
    /// Creates a [Config] from the environment and config file
    pub fn parse() -> Result<Config> {
        let config_dir = match env::var(CONFIG_DIR_VAR) {
            Ok(dir) => {
                debug!("`${CONFIG_DIR_VAR}` set: {dir}");
                Some(PathBuf::from(dir))
            },
            Err(_) => dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME)),
        };

        let config_file = config_dir.map(|dir| dir.join(CONFIG_FILE));
        let vars = env::vars().collect::<HashMap<_, _>>();

        Self::from_sources(config_file.as_deref(), vars).context("Could not load configuration")
    }

    /// Layer `config_file` (if any) and `vars` over the defaults
    pub(crate) fn from_sources(
        config_file: Option<&Path>,
        vars: HashMap<String, String>,
    ) -> Result<Config, ConfigError> {
        let debug = vars.get(DEBUG_VAR).is_some_and(|value| is_truthy(value));

        let mut builder = HierarchicalConfig::builder();

        if let Some(config_file) = config_file {
            debug!(path = %config_file.display(), "reading config file");
            builder = builder.add_source(
                config::File::from(config_file)
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }

        let mut environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .try_parsing(true)
            .source(Some(vars));
        for key in LIST_KEYS {
            environment = environment.with_list_parse_key(key);
        }

        let raw = builder
            .add_source(environment)
            .set_override("debug", debug)
            .and_then(|builder| builder.build())
            .map_err(ConfigError::Build)?;

        raw.try_deserialize().map_err(ConfigError::Deserialize)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use tempfile::TempDir;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::from_sources(None, HashMap::new()).unwrap();
        assert_eq!(config.client, ClientConfig::default());
        assert!(!config.debug);
    }

    #[test]
    fn file_is_overridden_by_environment() {
        let tempdir = TempDir::new().unwrap();
        let config_file = tempdir.path().join(CONFIG_FILE);
        fs::write(&config_file, indoc::indoc! {r#"
            timeout_secs = 30
            page_limit = 10
            skip_providers = ["exmpl", "slow"]
        "#})
        .unwrap();

        let config = Config::from_sources(
            Some(&config_file),
            vars(&[
                ("OPTIMADE_PAGE_LIMIT", "50"),
                ("OPTIMADE_DISABLE_PROVIDERS", "a,b"),
                ("UNRELATED", "1"),
            ]),
        )
        .unwrap();

        assert_eq!(config.client.timeout_secs, 30);
        assert_eq!(config.client.page_limit, 50);
        assert_eq!(config.client.skip_providers, vec!["exmpl", "slow"]);
        assert_eq!(config.client.disable_providers, vec!["a", "b"]);
        assert_eq!(config.client.probe_timeout_secs, ClientConfig::default().probe_timeout_secs);
    }

    #[test]
    fn debug_variable_enables_debug_mode() {
        let config = Config::from_sources(None, vars(&[(DEBUG_VAR, "1")])).unwrap();
        assert!(config.debug);
        let config = Config::from_sources(None, vars(&[(DEBUG_VAR, "no")])).unwrap();
        assert!(!config.debug);
    }

    #[test]
    #[serial]
    fn parse_reads_config_dir_from_environment() {
        let tempdir = TempDir::new().unwrap();
        fs::write(tempdir.path().join(CONFIG_FILE), "email_address = \"me@example.org\"\n")
            .unwrap();

        let config = temp_env::with_vars(
            [
                (CONFIG_DIR_VAR, Some(tempdir.path().to_str().unwrap())),
                (DEBUG_VAR, Some("true")),
            ],
            Config::parse,
        )
        .unwrap();

        assert_eq!(config.client.email_address.as_deref(), Some("me@example.org"));
        assert!(config.debug);
    }
}
