use anyhow::{Result, bail};
use bpaf::Bpaf;
use optimade_client::ProviderCatalog;

use super::client_context;
use crate::config::{Config, DEBUG_VAR};
use crate::utils::message;

/// Manage cached client data
#[derive(Debug, Clone, Bpaf)]
pub enum Cache {
    /// Delete the provider registry snapshot
    #[bpaf(command)]
    Clear,

    /// Print the cache directory
    #[bpaf(command)]
    Path,
}

impl Cache {
    pub fn handle(self, config: Config) -> Result<()> {
        if !config.debug {
            bail!("cache commands are only available with `{DEBUG_VAR}=1`");
        }

        let ctx = client_context(&config)?;
        match self {
            Cache::Clear => {
                let catalog = ProviderCatalog::new(ctx);
                match catalog.snapshot_path() {
                    Some(path) if path.exists() => {
                        catalog.remove_snapshot()?;
                        message::deleted(format!(
                            "Removed provider registry snapshot '{}'",
                            path.display()
                        ));
                    },
                    _ => message::plain("No provider registry snapshot to remove."),
                }
            },
            Cache::Path => match ctx.cache_dir() {
                Some(dir) => println!("{}", dir.display()),
                None => bail!("no cache directory could be determined"),
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use optimade_client::ClientConfig;
    use optimade_client::providers::SNAPSHOT_FILE;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::utils::message::history::History;

    #[test]
    fn cache_requires_debug_mode() {
        let err = Cache::Path.handle(Config::default()).unwrap_err();
        assert!(err.to_string().contains(DEBUG_VAR));
    }

    #[test]
    fn clear_removes_the_registry_snapshot() {
        let tempdir = TempDir::new().unwrap();
        let snapshot = tempdir.path().join(SNAPSHOT_FILE);
        std::fs::write(&snapshot, "{}").unwrap();
        let config = Config {
            client: ClientConfig {
                cache_dir: Some(tempdir.path().to_path_buf()),
                ..Default::default()
            },
            debug: true,
        };
        let history = History::global();
        history.clear();

        Cache::Clear.handle(config.clone()).unwrap();
        assert!(!snapshot.exists());
        Cache::Clear.handle(config).unwrap();

        assert_eq!(history.messages(), vec![
            format!("🗑️  Removed provider registry snapshot '{}'", snapshot.display()),
            "No provider registry snapshot to remove.".to_string(),
        ]);
    }
}
