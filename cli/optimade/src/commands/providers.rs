use anyhow::Result;
use bpaf::Bpaf;
use itertools::Itertools;
use optimade_client::Provider;
use tracing::instrument;

use super::terminal_session;
use crate::config::Config;
use crate::utils::message;

// List OPTIMADE providers
#[derive(Debug, Bpaf, Clone)]
pub struct Providers {
    /// Print providers as a JSON array
    #[bpaf(long)]
    pub json: bool,
}

impl Providers {
    #[instrument(name = "providers", skip_all, fields(json = self.json))]
    pub async fn handle(self, config: Config) -> Result<()> {
        let mut session = terminal_session(&config, self.json)?;
        let providers = session.providers().await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&providers)?);
            return Ok(());
        }

        if providers.is_empty() {
            message::plain("No providers found.");
            return Ok(());
        }
        println!("{}", render_providers(&providers));
        Ok(())
    }
}

pub(crate) fn render_providers(providers: &[Provider]) -> String {
    let width = providers
        .iter()
        .map(|provider| provider.id.len())
        .max()
        .unwrap_or_default();

    providers
        .iter()
        .map(|provider| {
            let disabled = if provider.disabled { " (disabled)" } else { "" };
            format!(
                "{:width$}  {}{disabled}\n{:width$}  {}",
                provider.id, provider.name, "", provider.base_url
            )
        })
        .join("\n")
}

#[cfg(test)]
mod tests {
    use optimade_client::types::LinkType;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn providers_are_aligned() {
        let provider = |id: &str, disabled| Provider {
            id: id.to_string(),
            name: format!("{id} provider"),
            description: String::new(),
            base_url: format!("https://{id}.example.org/v1"),
            link_type: LinkType::External,
            homepage: None,
            disabled,
        };

        assert_eq!(
            render_providers(&[provider("mp", false), provider("cod", true)]),
            [
                "mp   mp provider",
                "     https://mp.example.org/v1",
                "cod  cod provider (disabled)",
                "     https://cod.example.org/v1",
            ]
            .join("\n")
        );
    }
}
