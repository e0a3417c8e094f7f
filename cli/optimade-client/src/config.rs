//! Configuration types for client construction.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Provider registry, followed by its mirror.
pub const DEFAULT_PROVIDERS_URLS: [&str; 2] = [
    "https://providers.optimade.org/v1/links",
    "https://raw.githubusercontent.com/Materials-Consortia/providers/master/src/links/v1/providers.json",
];

/// The placeholder provider listed in the registry for documentation.
pub const DEFAULT_SKIP_PROVIDERS: [&str; 1] = ["exmpl"];

/// Name of the directory below the platform cache directory.
pub const CACHE_DIR_NAME: &str = "optimade-client";

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_PAGE_LIMIT: u64 = 25;

/// Configuration for client construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Provider registry URLs, tried in order.
    pub providers_urls: Vec<String>,
    /// Directory for the provider registry snapshot (default:
    /// `<platform cache dir>/optimade-client`).
    pub cache_dir: Option<PathBuf>,
    /// Timeout of a single query in seconds.
    pub timeout_secs: u64,
    /// Timeout of a single version probe in seconds.
    pub probe_timeout_secs: u64,
    /// Provider ids that are never listed.
    pub skip_providers: Vec<String>,
    /// Provider ids that are listed but cannot be queried.
    pub disable_providers: Vec<String>,
    /// Number of results per page.
    pub page_limit: u64,
    /// Sent as `email_address` with structure queries if set.
    pub email_address: Option<String>,
    pub user_agent: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            providers_urls: DEFAULT_PROVIDERS_URLS.map(String::from).to_vec(),
            cache_dir: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            skip_providers: DEFAULT_SKIP_PROVIDERS.map(String::from).to_vec(),
            disable_providers: Vec::new(),
            page_limit: DEFAULT_PAGE_LIMIT,
            email_address: None,
            user_agent: None,
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// The configured cache directory, or the platform default.
    ///
    /// `None` if neither is available, in which case nothing is persisted.
    pub fn resolved_cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir
            .clone()
            .or_else(|| dirs::cache_dir().map(|dir| dir.join(CACHE_DIR_NAME)))
    }

    /// A page limit of zero is treated as one.
    pub fn page_limit(&self) -> u64 {
        self.page_limit.max(1)
    }
}
