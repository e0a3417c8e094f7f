//! Negotiate the OPTIMADE version of a base URL.

use std::sync::{Arc, LazyLock};

use reqwest::StatusCode;
use semver::Version;
use tracing::{debug, instrument, warn};

use crate::context::ClientContext;

/// OPTIMADE versions this client understands, newest first.
pub const SUPPORTED_VERSIONS: [&str; 6] =
    ["1.1.0", "1.0.1", "1.0.0", "1.0.0-rc.2", "1.0.0-rc.1", "0.10.1"];

/// Versioned path segments for [SUPPORTED_VERSIONS], most specific first.
pub static VERSION_PARTS: LazyLock<Vec<String>> =
    LazyLock::new(|| resolve_version_candidates(&SUPPORTED_VERSIONS));

/// Order the versioned path segments for `versions` by specificity, then
/// recency.
///
/// All `/v{major}.{minor}.{patch}` segments come first, newest first, then
/// all `/v{major}.{minor}` segments, then all `/v{major}` segments.
/// Pre-release versions collapse onto their patch segment.
pub fn resolve_version_candidates(versions: &[&str]) -> Vec<String> {
    let mut parsed = versions
        .iter()
        .filter_map(|version| match Version::parse(version) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!(version, %err, "ignoring unparseable OPTIMADE version");
                None
            },
        })
        .collect::<Vec<_>>();
    parsed.sort_by(|a, b| b.cmp(a));

    let patches = parsed
        .iter()
        .map(|v| format!("/v{}.{}.{}", v.major, v.minor, v.patch));
    let minors = parsed.iter().map(|v| format!("/v{}.{}", v.major, v.minor));
    let majors = parsed.iter().map(|v| format!("/v{}", v.major));

    let mut candidates: Vec<String> = Vec::new();
    for candidate in patches.chain(minors).chain(majors) {
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}

/// The supported version segment `base_url` ends with, if any.
pub fn version_suffix(base_url: &str) -> Option<&'static str> {
    let base_url = base_url.trim_end_matches('/');
    VERSION_PARTS
        .iter()
        .find(|part| base_url.ends_with(part.as_str()))
        .map(String::as_str)
}

/// The first supported version segment listed in a `/versions` response.
///
/// The response is CSV whose header's first column is `version`.
pub fn parse_versions_csv(text: &str) -> Option<&'static str> {
    let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty());
    let header = lines.next()?;
    if header.split(',').next().map(str::trim) != Some("version") {
        debug!(header, "not a versions response");
        return None;
    }

    lines
        .filter_map(|line| line.split(',').next())
        .map(|version| format!("/v{}", version.trim().trim_start_matches('v')))
        .find_map(|candidate| {
            VERSION_PARTS
                .iter()
                .find(|part| **part == candidate)
                .map(String::as_str)
        })
}

/// Resolves base URLs to versioned base URLs.
#[derive(Debug, Clone)]
pub struct VersionNegotiator {
    ctx: Arc<ClientContext>,
}

impl VersionNegotiator {
    pub fn new(ctx: Arc<ClientContext>) -> Self {
        Self { ctx }
    }

    /// Resolve `base_url` to the best matching versioned base URL.
    ///
    /// Network errors while probing are treated as a failed candidate.
    /// Returns `None` only once every candidate failed.
    #[instrument(skip(self))]
    pub async fn resolve(&self, base_url: &str) -> Option<String> {
        let base_url = base_url.trim().trim_end_matches('/');

        if version_suffix(base_url).is_some() {
            return Some(base_url.to_string());
        }

        if let Some(versioned) = self.ctx.cache().version(base_url) {
            debug!(versioned, "using cached version");
            return Some(versioned);
        }

        let resolved = match self.from_versions_endpoint(base_url).await {
            Some(part) => Some(format!("{base_url}{part}")),
            None => self.probe_candidates(base_url).await,
        };

        match &resolved {
            Some(versioned) => {
                debug!(versioned, "negotiated version");
                self.ctx.cache().set_version(base_url, versioned);
            },
            None => debug!("no supported version found"),
        }
        resolved
    }

    async fn from_versions_endpoint(&self, base_url: &str) -> Option<&'static str> {
        let url = format!("{base_url}/versions");
        let response = self
            .ctx
            .http()
            .get(&url)
            .timeout(self.ctx.config().probe_timeout())
            .send()
            .await
            .inspect_err(|err| debug!(%err, url, "versions endpoint unreachable"))
            .ok()?;

        if response.status() != StatusCode::OK {
            debug!(status = %response.status(), url, "versions endpoint failed");
            return None;
        }
        let text = response.text().await.ok()?;
        parse_versions_csv(&text)
    }

    async fn probe_candidates(&self, base_url: &str) -> Option<String> {
        for part in VERSION_PARTS.iter() {
            let versioned = format!("{base_url}{part}");
            let result = self
                .ctx
                .http()
                .get(format!("{versioned}/info"))
                .timeout(self.ctx.config().probe_timeout())
                .send()
                .await;
            match result {
                Ok(response) if response.status() == StatusCode::OK => return Some(versioned),
                Ok(response) => {
                    debug!(status = %response.status(), versioned, "candidate rejected")
                },
                Err(err) => debug!(%err, versioned, "candidate unreachable"),
            }
        }
        None
    }
}
