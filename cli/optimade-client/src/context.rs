//! The shared context every component is constructed with.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::QueryCache;
use crate::config::ClientConfig;
use crate::error::OptimadeClientError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP session, configuration, caches and cache directory.
///
/// Created once at startup and shared as an `Arc` by all components, so there
/// is exactly one set of caches per process.
pub struct ClientContext {
    http: reqwest::Client,
    config: ClientConfig,
    cache: QueryCache,
    cache_dir: Option<PathBuf>,
}

impl Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientContext")
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

impl ClientContext {
    pub fn new(config: ClientConfig) -> Result<Arc<Self>, OptimadeClientError> {
        let http = build_http_client(&config)?;
        let cache_dir = config.resolved_cache_dir();
        Ok(Arc::new(Self {
            http,
            config,
            cache: QueryCache::default(),
            cache_dir,
        }))
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    /// Forget all negotiated versions, ranges and sortable fields.
    pub fn clear_caches(&self) {
        debug!("clearing query caches");
        self.cache.clear();
    }
}

/// Build the HTTP client shared by all requests.
fn build_http_client(config: &ClientConfig) -> Result<reqwest::Client, OptimadeClientError> {
    let user_agent = config
        .user_agent
        .clone()
        .unwrap_or_else(|| format!("optimade-client/{}", env!("CARGO_PKG_VERSION")));

    debug!(
        timeout = config.timeout_secs,
        %user_agent,
        "building OPTIMADE HTTP client"
    );

    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT.min(config.timeout()))
        .timeout(config.timeout())
        .user_agent(user_agent)
        .build()
        .map_err(OptimadeClientError::HttpClient)
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use std::path::Path;
    use std::sync::Arc;

    use super::{ClientContext, build_http_client};
    use crate::cache::QueryCache;
    use crate::config::ClientConfig;

    /// A context with short timeouts and no registry.
    ///
    /// Without `cache_dir` nothing is persisted, not even to the platform
    /// cache directory.
    pub fn test_context(cache_dir: Option<&Path>) -> Arc<ClientContext> {
        let config = ClientConfig {
            providers_urls: Vec::new(),
            cache_dir: cache_dir.map(Into::into),
            timeout_secs: 5,
            probe_timeout_secs: 2,
            ..Default::default()
        };
        Arc::new(ClientContext {
            http: build_http_client(&config).unwrap(),
            cache: QueryCache::default(),
            cache_dir: config.cache_dir.clone(),
            config,
        })
    }
}
