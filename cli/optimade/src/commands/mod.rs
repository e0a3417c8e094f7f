mod cache;
mod databases;
mod providers;
mod search;

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bpaf::Bpaf;
use indoc::indoc;
use itertools::Itertools;
use optimade_client::{ClientContext, Provider, QuerySession};

use crate::config::Config;
use crate::utils::view::TerminalView;

static OPTIMADE_DESCRIPTION: &'_ str = indoc! {"
    Browse materials databases exposed through the OPTIMADE API.

    Providers are read from the OPTIMADE provider registry.
    Each provider lists one or more databases that can be searched."
};

fn vec_len<T>(x: Vec<T>) -> usize {
    Vec::len(&x)
}

#[derive(Bpaf, Clone, Copy, Debug)]
pub enum Verbosity {
    Verbose(
        /// Increase logging verbosity
        ///
        /// Invoke multiple times for increasing detail.
        #[bpaf(short('v'), long("verbose"), req_flag(()), many, map(vec_len))]
        usize,
    ),

    /// Silence logs except for errors
    #[bpaf(short, long)]
    Quiet,
}

impl Verbosity {
    pub fn to_i32(self) -> i32 {
        match self {
            Verbosity::Quiet => -1,
            Verbosity::Verbose(n) => i32::try_from(n).unwrap_or(i32::MAX),
        }
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::Verbose(0)
    }
}

#[derive(Bpaf)]
#[bpaf(options, descr(OPTIMADE_DESCRIPTION))]
pub struct OptimadeCli(#[bpaf(external(optimade_args))] pub OptimadeArgs);

/// Main argument parser
///
/// To parse the full CLI, use [`OptimadeCli`] through [`optimade_cli()`].
#[derive(Debug, Bpaf)]
#[bpaf(ignore_rustdoc)]
pub struct OptimadeArgs {
    /// Verbose mode
    ///
    /// Invoke multiple times for increasing detail.
    #[bpaf(external, fallback(Default::default()))]
    pub verbosity: Verbosity,

    #[bpaf(external(commands))]
    command: Commands,
}

impl OptimadeArgs {
    pub async fn handle(self, config: Config) -> Result<()> {
        match self.command {
            Commands::Providers(args) => args.handle(config).await,
            Commands::Databases(args) => args.handle(config).await,
            Commands::Search(args) => args.handle(config).await,
            Commands::Cache(args) => args.handle(config),
        }
    }
}

#[derive(Bpaf, Clone)]
enum Commands {
    /// List OPTIMADE providers
    #[bpaf(command)]
    Providers(#[bpaf(external(providers::providers))] providers::Providers),

    /// List the databases of a provider
    #[bpaf(command)]
    Databases(#[bpaf(external(databases::databases))] databases::Databases),

    /// Search structures in a database
    #[bpaf(command)]
    Search(#[bpaf(external(search::search))] search::Search),

    /// Manage cached client data (requires debug mode)
    #[bpaf(command, hide)]
    Cache(#[bpaf(external(cache::cache))] cache::Cache),
}

impl fmt::Debug for Commands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command")
    }
}

/// The shared client context for `config`.
fn client_context(config: &Config) -> Result<Arc<ClientContext>> {
    ClientContext::new(config.client.clone()).context("Could not initialize OPTIMADE client")
}

/// A session printing to the terminal.
fn terminal_session(config: &Config, json: bool) -> Result<QuerySession<TerminalView>> {
    Ok(QuerySession::new(
        client_context(config)?,
        TerminalView::new(json),
    ))
}

/// Find the provider with id `provider_id`.
async fn find_provider(
    session: &mut QuerySession<TerminalView>,
    provider_id: &str,
) -> Result<Provider> {
    let providers = session.providers().await?;
    let known = providers.iter().map(|provider| provider.id.as_str()).join(", ");
    match providers.into_iter().find(|provider| provider.id == provider_id) {
        Some(provider) => Ok(provider),
        None => bail!("unknown provider '{provider_id}', available providers: {known}"),
    }
}
