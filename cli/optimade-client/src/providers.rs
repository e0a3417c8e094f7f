//! The catalog of OPTIMADE providers and their databases.
//!
//! Providers come from the public provider registry, with a mirror and an
//! on-disk snapshot as fallbacks. Databases are the `child` links each
//! provider lists at its `/links` endpoint. Providers and databases are only
//! exposed once a supported OPTIMADE version was negotiated for them.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::cache::FieldRange;
use crate::context::ClientContext;
use crate::error::{CatalogError, SnapshotError};
use crate::executor::{Endpoint, QueryExecutor, QueryParams};
use crate::types::{Database, LinkType, LinksResource, PageCursor, Provider, ResponseEnvelope};
use crate::validator::{Severity, classify, handle_errors};
use crate::version::VersionNegotiator;

/// File name of the registry snapshot in the cache directory.
pub const SNAPSHOT_FILE: &str = "cached_providers.json";

const CHILD_FILTER: &str = r#"( link_type="child" OR type="child" )"#;

/// The `/links` filter for child databases, excluding `exclusions` by id.
pub fn child_filter(exclusions: &BTreeSet<String>) -> String {
    if exclusions.is_empty() {
        return CHILD_FILTER.to_string();
    }
    let excluded = exclusions
        .iter()
        .map(|id| format!(r#"id!="{id}""#))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!("{CHILD_FILTER} AND ( {excluded} )")
}

/// Child databases of one round of `/links` queries.
#[derive(Debug, Default)]
struct Children {
    databases: Vec<Database>,
    excluded: BTreeSet<String>,
}

pub struct ProviderCatalog {
    ctx: Arc<ClientContext>,
    executor: QueryExecutor,
    negotiator: VersionNegotiator,
    /// Provider ids found incompatible during this session, with the reason.
    disqualified: BTreeMap<String, String>,
    /// Databases per provider id.
    databases: HashMap<String, Vec<Database>>,
}

impl std::fmt::Debug for ProviderCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCatalog")
            .field("disqualified", &self.disqualified.keys().collect::<Vec<_>>())
            .field("databases", &self.databases.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ProviderCatalog {
    pub fn new(ctx: Arc<ClientContext>) -> Self {
        Self {
            executor: QueryExecutor::new(Arc::clone(&ctx)),
            negotiator: VersionNegotiator::new(Arc::clone(&ctx)),
            ctx,
            disqualified: BTreeMap::new(),
            databases: HashMap::new(),
        }
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn negotiator(&self) -> &VersionNegotiator {
        &self.negotiator
    }

    /// Exclude a provider from the rest of the session.
    ///
    /// `reason` is reported by later attempts to list its databases.
    pub fn disqualify(&mut self, provider_id: &str, reason: &CatalogError) {
        info!(provider_id, %reason, "disqualified provider for this session");
        self.disqualified
            .insert(provider_id.to_string(), reason.to_string());
        self.databases.remove(provider_id);
    }

    pub fn is_disqualified(&self, provider_id: &str) -> bool {
        self.disqualified.contains_key(provider_id)
    }

    /// Forget cached databases, negotiated versions and field metadata.
    ///
    /// Disqualifications and the registry snapshot are kept.
    pub fn clear_caches(&mut self) {
        self.databases.clear();
        self.ctx.clear_caches();
    }

    // region: providers

    /// Registered providers with a negotiated OPTIMADE version.
    ///
    /// Version negotiation runs concurrently for all providers.
    #[instrument(skip_all)]
    pub async fn list_providers(&mut self) -> Result<Vec<Provider>, CatalogError> {
        let registry = self.fetch_registry().await?;
        let config = self.ctx.config();
        let mut incompatible = Vec::new();

        let candidates = registry
            .into_iter()
            .filter(|resource| {
                if config.skip_providers.contains(&resource.id) {
                    debug!(provider = resource.id, "skipping provider");
                    return false;
                }
                if self.disqualified.contains_key(&resource.id) {
                    debug!(provider = resource.id, "provider was disqualified");
                    return false;
                }
                if resource.link_type() != LinkType::External {
                    debug!(provider = resource.id, link_type = ?resource.link_type(), "not a provider");
                    return false;
                }
                if resource.base_url().is_none() {
                    let reason = CatalogError::MissingBaseUrl {
                        id: resource.id.clone(),
                    };
                    debug!(%reason, "dropping provider");
                    incompatible.push((resource.id.clone(), reason));
                    return false;
                }
                true
            })
            .collect::<Vec<_>>();

        let negotiations = candidates.iter().map(|resource| {
            self.negotiator
                .resolve(resource.base_url().unwrap_or_default())
        });
        let versioned = join_all(negotiations).await;

        let mut providers = Vec::new();
        for (resource, base_url) in candidates.into_iter().zip(versioned) {
            let Some(base_url) = base_url else {
                let reason = CatalogError::UnsupportedVersion {
                    base_url: resource.base_url().unwrap_or_default().to_string(),
                };
                warn!(provider = resource.id, %reason, "dropping provider");
                incompatible.push((resource.id, reason));
                continue;
            };
            providers.push(Provider {
                disabled: config.disable_providers.contains(&resource.id),
                homepage: resource
                    .attributes
                    .homepage
                    .as_ref()
                    .map(|link| link.href().to_string()),
                link_type: resource.link_type(),
                id: resource.id,
                name: resource.attributes.name,
                description: resource.attributes.description,
                base_url,
            });
        }
        for (provider_id, reason) in incompatible {
            self.disqualify(&provider_id, &reason);
        }

        debug!(count = providers.len(), "listed providers");
        Ok(providers)
    }

    /// The resources of the provider registry.
    ///
    /// Tries every configured registry URL in order, then the snapshot of the
    /// last successful fetch.
    async fn fetch_registry(&self) -> Result<Vec<LinksResource>, CatalogError> {
        for url in &self.ctx.config().providers_urls {
            let envelope = self.executor.query_link(url).await;
            match handle_errors(&envelope) {
                Ok((_, statuses)) if statuses.is_empty() => {
                    debug!(url, "fetched provider registry");
                    if let Err(err) = self.update_snapshot(&envelope) {
                        warn!(%err, "couldn't update provider registry snapshot");
                    }
                    return Ok(links_resources(&envelope));
                },
                Ok((message, _)) => warn!(url, reason = message, "provider registry unavailable"),
                Err(err) => warn!(url, %err, "invalid provider registry response"),
            }
        }

        match self.load_snapshot() {
            Ok(Some(envelope)) => {
                info!("using cached provider registry");
                Ok(links_resources(&envelope))
            },
            Ok(None) => Err(CatalogError::NoRegistry),
            Err(err) => {
                warn!(%err, "couldn't load provider registry snapshot");
                Err(CatalogError::NoRegistry)
            },
        }
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.ctx.cache_dir().map(|dir| dir.join(SNAPSHOT_FILE))
    }

    fn load_snapshot(&self) -> Result<Option<ResponseEnvelope>, SnapshotError> {
        let Some(path) = self.snapshot_path() else {
            return Ok(None);
        };
        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(SnapshotError::Read(err)),
        };
        serde_json::from_slice(&contents)
            .map(Some)
            .map_err(SnapshotError::Parse)
    }

    /// Write `envelope` as the registry snapshot if it differs from the
    /// current one other than by its time stamp.
    fn update_snapshot(&self, envelope: &ResponseEnvelope) -> Result<(), SnapshotError> {
        let Some(path) = self.snapshot_path() else {
            return Ok(());
        };

        let fresh = without_time_stamp(envelope);
        let unchanged = self
            .load_snapshot()
            .ok()
            .flatten()
            .is_some_and(|cached| without_time_stamp(&cached) == fresh);
        if unchanged {
            debug!("provider registry snapshot is up to date");
            return Ok(());
        }

        write_atomically(envelope, &path)?;
        debug!(path = %path.display(), "wrote provider registry snapshot");
        Ok(())
    }

    /// Delete the registry snapshot, if any.
    pub fn remove_snapshot(&self) -> Result<(), SnapshotError> {
        let Some(path) = self.snapshot_path() else {
            return Ok(());
        };
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed provider registry snapshot");
                Ok(())
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SnapshotError::Remove(err)),
        }
    }

    // endregion: providers

    // region: databases

    /// The child databases of `provider`.
    ///
    /// A provider without a `/links` endpoint has no databases. Any other
    /// error disqualifies the provider for the rest of the session.
    #[instrument(skip_all, fields(provider = %provider.id))]
    pub async fn list_databases(
        &mut self,
        provider: &Provider,
    ) -> Result<Vec<Database>, CatalogError> {
        if provider.disabled {
            return Err(CatalogError::Disabled {
                provider: provider.id.clone(),
            });
        }
        if let Some(reason) = self.disqualified.get(&provider.id) {
            return Err(CatalogError::Disqualified {
                provider: provider.id.clone(),
                reason: reason.clone(),
            });
        }
        if let Some(databases) = self.databases.get(&provider.id) {
            return Ok(databases.clone());
        }

        match self.collect_databases(provider).await {
            Ok(databases) => {
                self.databases
                    .insert(provider.id.clone(), databases.clone());
                Ok(databases)
            },
            Err(err) => {
                if err.disqualifies() {
                    self.disqualify(&provider.id, &err);
                }
                Err(err)
            },
        }
    }

    /// Query `/links` until the set of excluded entries stops growing.
    ///
    /// Servers may ignore the exclusion filter, so every round is validated
    /// again.
    async fn collect_databases(&self, provider: &Provider) -> Result<Vec<Database>, CatalogError> {
        let mut exclusions = BTreeSet::new();
        loop {
            let children = self.query_children(provider, &exclusions).await?;
            let new_exclusions = children
                .excluded
                .difference(&exclusions)
                .cloned()
                .collect::<Vec<_>>();
            if new_exclusions.is_empty() {
                debug!(count = children.databases.len(), "listed databases");
                return Ok(children.databases);
            }
            debug!(?new_exclusions, "re-querying with new exclusions");
            exclusions.extend(new_exclusions);
        }
    }

    async fn query_children(
        &self,
        provider: &Provider,
        exclusions: &BTreeSet<String>,
    ) -> Result<Children, CatalogError> {
        let params = QueryParams {
            endpoint: Endpoint::Links,
            filter: Some(child_filter(exclusions)),
            ..Default::default()
        };
        let mut envelope = self.executor.query(&provider.base_url, &params).await;
        let mut children = Children::default();
        let mut seen_links = HashSet::new();

        loop {
            let (message, statuses) = handle_errors(&envelope)?;
            match classify(&statuses, true) {
                Severity::None => {},
                Severity::Recoverable => {
                    debug!(
                        collected = children.databases.len(),
                        "provider has no further /links pages"
                    );
                    return Ok(children);
                },
                Severity::Disqualifying => {
                    return Err(CatalogError::Query {
                        message,
                        statuses,
                        remove_target: true,
                    });
                },
            }

            self.collect_page(provider, &envelope, &mut children).await;

            let next = envelope
                .links
                .as_ref()
                .and_then(|links| links.next.as_ref())
                .map(|link| link.href().to_string());
            match next {
                Some(next) if seen_links.insert(next.clone()) => {
                    envelope = self
                        .executor
                        .query(&provider.base_url, &QueryParams {
                            page: Some(PageCursor::Link(next)),
                            ..params.clone()
                        })
                        .await;
                },
                _ => return Ok(children),
            }
        }
    }

    /// Sort the resources of one `/links` page into databases and exclusions.
    async fn collect_page(
        &self,
        provider: &Provider,
        envelope: &ResponseEnvelope,
        children: &mut Children,
    ) {
        let mut candidates = Vec::new();
        for resource in links_resources(envelope) {
            if resource.link_type() != LinkType::Child {
                debug!(id = resource.id, "excluding non-child link");
                children.excluded.insert(resource.id);
            } else if resource.base_url().is_none() {
                let reason = CatalogError::MissingBaseUrl {
                    id: resource.id.clone(),
                };
                debug!(%reason, "excluding database");
                children.excluded.insert(resource.id);
            } else {
                candidates.push(resource);
            }
        }

        let versioned = join_all(
            candidates
                .iter()
                .map(|resource| self.negotiator.resolve(resource.base_url().unwrap_or_default())),
        )
        .await;

        for (resource, versioned_url) in candidates.into_iter().zip(versioned) {
            match versioned_url {
                Some(base_url) => children.databases.push(Database {
                    id: resource.id,
                    name: resource.attributes.name,
                    description: resource.attributes.description,
                    base_url,
                    provider_id: provider.id.clone(),
                }),
                None => {
                    let reason = CatalogError::UnsupportedVersion {
                        base_url: resource.base_url().unwrap_or_default().to_string(),
                    };
                    debug!(id = resource.id, %reason, "excluding database");
                    children.excluded.insert(resource.id);
                },
            }
        }
    }

    // endregion: databases

    // region: field metadata

    /// Structure properties `base_url` can sort by.
    ///
    /// Properties are sortable unless `/info/structures` says otherwise.
    /// An empty list is returned, and not cached, if the endpoint fails.
    #[instrument(skip(self))]
    pub async fn sortable_fields(&self, base_url: &str) -> Vec<String> {
        if let Some(fields) = self.ctx.cache().sort_fields(base_url) {
            return fields;
        }

        let envelope = self
            .executor
            .query(base_url, &QueryParams {
                endpoint: Endpoint::InfoStructures,
                ..Default::default()
            })
            .await;
        match handle_errors(&envelope) {
            Ok((_, statuses)) if statuses.is_empty() => {},
            Ok((message, _)) => {
                warn!(reason = message, "couldn't retrieve sortable fields");
                return Vec::new();
            },
            Err(err) => {
                warn!(%err, "couldn't retrieve sortable fields");
                return Vec::new();
            },
        }

        let mut fields = envelope
            .resources()
            .first()
            .and_then(|info| info.pointer("/attributes/properties"))
            .and_then(Value::as_object)
            .map(|properties| {
                properties
                    .iter()
                    .filter(|(_, property)| {
                        property.get("sortable").and_then(Value::as_bool) != Some(false)
                    })
                    .map(|(name, _)| name.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        fields.sort();

        self.ctx.cache().set_sort_fields(base_url, fields.clone());
        fields
    }

    /// Minimum and maximum value of an integer `field` in `base_url`.
    ///
    /// Determined by sorting on `field` in both directions. Falls back to
    /// [FieldRange::default_for] if either query fails; the fallback is not
    /// cached.
    #[instrument(skip(self))]
    pub async fn field_range(&self, base_url: &str, field: &str) -> Option<FieldRange> {
        if let Some(range) = self.ctx.cache().range(base_url, field) {
            return Some(range);
        }

        let (min, max) = futures::join!(
            self.extreme_value(base_url, field, false),
            self.extreme_value(base_url, field, true),
        );
        match (min, max) {
            (Some(min), Some(max)) if min <= max => {
                let range = FieldRange { min, max };
                self.ctx.cache().set_range(base_url, field, range);
                Some(range)
            },
            _ => {
                debug!("using default range");
                FieldRange::default_for(field)
            },
        }
    }

    async fn extreme_value(&self, base_url: &str, field: &str, descending: bool) -> Option<i64> {
        let sort = if descending {
            format!("-{field}")
        } else {
            field.to_string()
        };
        let envelope = self
            .executor
            .query(base_url, &QueryParams {
                sort: Some(sort),
                page_limit: Some(1),
                response_fields: vec![field.to_string()],
                ..Default::default()
            })
            .await;
        match handle_errors(&envelope) {
            Ok((_, statuses)) if statuses.is_empty() => {},
            _ => return None,
        }
        envelope
            .resources()
            .first()
            .and_then(|resource| resource.get("attributes"))
            .and_then(|attributes| attributes.get(field))
            .and_then(Value::as_i64)
    }

    // endregion: field metadata
}

/// Deserialize the `links` resources of `envelope`, skipping invalid ones.
fn links_resources(envelope: &ResponseEnvelope) -> Vec<LinksResource> {
    envelope
        .resources()
        .iter()
        .filter_map(|value| {
            serde_json::from_value::<LinksResource>(value.clone())
                .inspect_err(|err| warn!(%err, "skipping invalid links resource"))
                .ok()
        })
        .collect()
}

/// `envelope` as JSON, without `meta.time_stamp`.
fn without_time_stamp(envelope: &ResponseEnvelope) -> Value {
    let mut value = serde_json::to_value(envelope).unwrap_or_default();
    if let Some(meta) = value.get_mut("meta").and_then(Value::as_object_mut) {
        meta.remove("time_stamp");
    }
    value
}

/// Write `value` to `path` through a temporary file in the same directory.
fn write_atomically(value: &impl serde::Serialize, path: &Path) -> Result<(), SnapshotError> {
    let parent = path
        .parent()
        .ok_or_else(|| SnapshotError::InvalidLocation(path.to_path_buf()))?;
    std::fs::create_dir_all(parent).map_err(SnapshotError::CreateDir)?;

    let temp_file = tempfile::NamedTempFile::new_in(parent).map_err(SnapshotError::OpenTmpFile)?;
    let writer = BufWriter::new(&temp_file);
    serde_json::to_writer_pretty(writer, value).map_err(SnapshotError::WriteTmpFile)?;
    temp_file
        .persist(path)
        .map_err(SnapshotError::RenameTmpFile)?;
    Ok(())
}
