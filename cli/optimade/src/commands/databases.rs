use anyhow::Result;
use bpaf::Bpaf;
use itertools::Itertools;
use optimade_client::Database;
use tracing::instrument;

use super::{find_provider, terminal_session};
use crate::config::Config;
use crate::utils::message;

// List the databases of a provider
#[derive(Debug, Bpaf, Clone)]
pub struct Databases {
    /// Print databases as a JSON array
    #[bpaf(long)]
    pub json: bool,

    /// Id of the provider, as listed by `optimade providers`
    #[bpaf(positional("provider"))]
    pub provider: String,
}

impl Databases {
    #[instrument(name = "databases", skip_all, fields(provider = %self.provider))]
    pub async fn handle(self, config: Config) -> Result<()> {
        let mut session = terminal_session(&config, self.json)?;
        let provider = find_provider(&mut session, &self.provider).await?;
        let databases = session.select_provider(provider).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&databases)?);
        } else if !databases.is_empty() {
            println!("{}", render_databases(&databases));
        } else {
            message::plain(format!("Provider '{}' has no databases.", self.provider));
        }
        Ok(())
    }
}

fn render_databases(databases: &[Database]) -> String {
    databases
        .iter()
        .map(|database| format!("{}  {}\n    {}", database.id, database.name, database.base_url))
        .join("\n")
}
