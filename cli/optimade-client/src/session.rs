//! An interactive query session.
//!
//! A [QuerySession] ties the catalog, filter, executor and pagination
//! together behind the events a front-end produces: select a provider and
//! database, search by filter, navigate pages, export a result. Results and
//! messages are pushed to a [ResultsView]; the view is frozen for the
//! duration of every network call and unfrozen on every path.

use std::fmt::Debug;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::context::ClientContext;
use crate::error::{ConversionError, OptimadeClientError};
use crate::executor::{Endpoint, QueryParams};
use crate::filter::{FilterBuilder, with_safety_clause};
use crate::pagination::{Navigation, PageMove, PaginationController, PaginationObserver};
use crate::providers::ProviderCatalog;
use crate::types::{Database, Provider, Structure};
use crate::validator::{check_entry_properties, handle_errors};

/// A displayable result: label and structure.
pub type LabeledStructure = (String, Structure);

/// Receives what a session has to show.
pub trait ResultsView {
    fn show_results(&mut self, results: &[LabeledStructure]);
    /// A plain text status or error message.
    fn show_message(&mut self, message: &str);
    /// Inputs are disabled while frozen.
    fn set_frozen(&mut self, frozen: bool);
}

/// Converts structures into file formats.
pub trait StructureConverter {
    /// Formats accepted by [StructureConverter::convert].
    fn formats(&self) -> Vec<String>;
    fn convert(&self, structure: &Structure, format: &str) -> Result<String, ConversionError>;
}

/// Exports structures as the JSON resource they were received as.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverter;

impl StructureConverter for JsonConverter {
    fn formats(&self) -> Vec<String> {
        vec!["json".to_string()]
    }

    fn convert(&self, structure: &Structure, format: &str) -> Result<String, ConversionError> {
        let error = |reason: String| ConversionError {
            id: structure.id.clone(),
            format: format.to_string(),
            reason,
        };
        if format != "json" {
            return Err(error("unsupported format".to_string()));
        }
        serde_json::to_string_pretty(structure).map_err(|err| error(err.to_string()))
    }
}

/// Keeps a view frozen while alive.
struct Frozen<'a, V: ResultsView> {
    view: &'a mut V,
}

impl<'a, V: ResultsView> Frozen<'a, V> {
    fn new(view: &'a mut V) -> Self {
        view.set_frozen(true);
        Self { view }
    }
}

impl<V: ResultsView> Deref for Frozen<'_, V> {
    type Target = V;

    fn deref(&self) -> &Self::Target {
        self.view
    }
}

impl<V: ResultsView> DerefMut for Frozen<'_, V> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.view
    }
}

impl<V: ResultsView> Drop for Frozen<'_, V> {
    fn drop(&mut self) {
        self.view.set_frozen(false);
    }
}

/// Session state apart from the view, so the view can stay frozen while
/// the state is mutated.
struct SessionState {
    ctx: Arc<ClientContext>,
    catalog: ProviderCatalog,
    pagination: PaginationController,
    provider: Option<Provider>,
    database: Option<Database>,
    api_version: Option<String>,
    sort_fields: Vec<String>,
    filter: String,
    sort: Option<String>,
    results: Vec<LabeledStructure>,
}

impl SessionState {
    fn database(&self) -> Result<&Database, OptimadeClientError> {
        self.database.as_ref().ok_or(OptimadeClientError::NoDatabase)
    }

    async fn select_database(&mut self, database: Database) -> Result<(), OptimadeClientError> {
        {
            let mut pagination = self.pagination.hold_notifications();
            pagination.silent_reset();
        }
        self.results.clear();
        self.filter.clear();
        self.api_version = None;
        self.sort_fields.clear();

        let envelope = self
            .catalog
            .executor()
            .query(&database.base_url, &QueryParams {
                endpoint: Endpoint::Info,
                ..Default::default()
            })
            .await;
        match handle_errors(&envelope) {
            Ok((_, statuses)) if statuses.is_empty() => {
                self.api_version = envelope.api_version().map(String::from);
            },
            Ok((message, _)) => warn!(reason = message, "couldn't read database info"),
            Err(err) => warn!(%err, "couldn't read database info"),
        }
        debug!(api_version = ?self.api_version, "selected database");

        self.sort_fields = self.catalog.sortable_fields(&database.base_url).await;
        self.database = Some(database);
        Ok(())
    }

    /// Fetch one page of the current query.
    ///
    /// `page` is committed to the pagination only if the page arrives.
    /// Returns the server's message for partial failures, empty otherwise.
    async fn fetch(
        &mut self,
        page: Option<PageMove>,
        reset: bool,
    ) -> Result<String, OptimadeClientError> {
        let database = self.database()?;
        let params = QueryParams {
            filter: Some(self.filter.clone()),
            sort: self.sort.clone(),
            page_limit: Some(self.pagination.page_limit()),
            page: page.as_ref().map(|page| page.cursor.clone()),
            email_address: self.ctx.config().email_address.clone(),
            ..Default::default()
        };

        let envelope = self
            .catalog
            .executor()
            .query(&database.base_url, &params)
            .await;
        let (message, statuses) = handle_errors(&envelope)?;
        if envelope.data.is_none() {
            return Err(OptimadeClientError::Query { message, statuses });
        }

        self.results = envelope
            .resources()
            .iter()
            .filter_map(|resource| {
                let structure = serde_json::from_value::<Structure>(resource.clone())
                    .inspect_err(|err| warn!(%err, "skipping invalid structure"))
                    .ok()?;
                let label = check_entry_properties(&structure).ok()?;
                let label = format!("{label} (id: {})", structure.id);
                Some((label, structure))
            })
            .collect();

        let returned = envelope
            .data_returned()
            .unwrap_or(envelope.resources().len() as u64);
        let mut pagination = self.pagination.hold_notifications();
        if let Some(page) = &page {
            pagination.commit(page);
        }
        pagination.set_pagination_data(
            returned,
            envelope.data_available(),
            envelope.links.clone(),
            reset,
        );
        Ok(message)
    }
}

/// A query session driving a [ResultsView].
pub struct QuerySession<V: ResultsView> {
    view: V,
    state: SessionState,
}

impl<V: ResultsView> Debug for QuerySession<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySession")
            .field("database", &self.state.database)
            .field("filter", &self.state.filter)
            .field("pagination", &self.state.pagination)
            .finish_non_exhaustive()
    }
}

impl<V: ResultsView> QuerySession<V> {
    pub fn new(ctx: Arc<ClientContext>, view: V) -> Self {
        let page_limit = ctx.config().page_limit();
        Self {
            view,
            state: SessionState {
                catalog: ProviderCatalog::new(Arc::clone(&ctx)),
                pagination: PaginationController::new(page_limit),
                ctx,
                provider: None,
                database: None,
                api_version: None,
                sort_fields: Vec::new(),
                filter: String::new(),
                sort: None,
                results: Vec::new(),
            },
        }
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.state.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut ProviderCatalog {
        &mut self.state.catalog
    }

    pub fn pagination(&self) -> &PaginationController {
        &self.state.pagination
    }

    pub fn pagination_mut(&mut self) -> &mut PaginationController {
        &mut self.state.pagination
    }

    pub fn subscribe(&mut self, observer: PaginationObserver) {
        self.state.pagination.subscribe(observer);
    }

    pub fn provider(&self) -> Option<&Provider> {
        self.state.provider.as_ref()
    }

    pub fn database(&self) -> Option<&Database> {
        self.state.database.as_ref()
    }

    /// `meta.api_version` reported by the selected database.
    pub fn api_version(&self) -> Option<&str> {
        self.state.api_version.as_deref()
    }

    /// Properties the selected database can sort by.
    pub fn sort_fields(&self) -> &[String] {
        &self.state.sort_fields
    }

    /// The filter sent with the last search.
    pub fn filter(&self) -> &str {
        &self.state.filter
    }

    pub fn results(&self) -> &[LabeledStructure] {
        &self.state.results
    }

    /// Sort subsequent searches by `sort`, e.g. `nsites` or `-nsites`.
    pub fn set_sort(&mut self, sort: Option<String>) {
        self.state.sort = sort.filter(|sort| !sort.trim().is_empty());
    }

    /// The providers that can be browsed.
    pub async fn providers(&mut self) -> Result<Vec<Provider>, OptimadeClientError> {
        let mut view = Frozen::new(&mut self.view);
        let result = self.state.catalog.list_providers().await;
        result.map_err(|err| {
            view.show_message(&err.to_string());
            err.into()
        })
    }

    /// Select `provider` and list its databases.
    #[instrument(skip_all, fields(provider = %provider.id))]
    pub async fn select_provider(
        &mut self,
        provider: Provider,
    ) -> Result<Vec<Database>, OptimadeClientError> {
        let mut view = Frozen::new(&mut self.view);
        self.state.database = None;
        self.state.results.clear();
        self.state.pagination.silent_reset();

        match self.state.catalog.list_databases(&provider).await {
            Ok(databases) => {
                if databases.is_empty() {
                    view.show_message("This provider has no databases to browse.");
                }
                self.state.provider = Some(provider);
                Ok(databases)
            },
            Err(err) => {
                view.show_message(&err.to_string());
                self.state.provider = None;
                Err(err.into())
            },
        }
    }

    /// Select `database` for subsequent searches.
    ///
    /// Resets pagination without fetching anything.
    #[instrument(skip_all, fields(database = %database.id))]
    pub async fn select_database(&mut self, database: Database) -> Result<(), OptimadeClientError> {
        let _view = Frozen::new(&mut self.view);
        self.state.select_database(database).await
    }

    /// Search the selected database and show the first page.
    ///
    /// Malformed input is reported without sending a request.
    #[instrument(skip_all)]
    pub async fn fetch_by_filter(
        &mut self,
        filters: &FilterBuilder,
    ) -> Result<(), OptimadeClientError> {
        let mut view = Frozen::new(&mut self.view);

        let filter = match filters.collect() {
            Ok(filter) => filter,
            Err(err) => {
                view.show_message(&err.to_string());
                return Err(err.into());
            },
        };
        self.state.filter = with_safety_clause(&filter, self.state.api_version.as_deref());
        debug!(filter = self.state.filter, "searching");

        let result = self.state.fetch(None, true).await;
        if result.is_err() {
            self.state.results.clear();
            self.state.pagination.silent_reset();
            view.show_results(&[]);
        }
        Self::present(&mut view, &self.state.results, result)
    }

    /// Navigate to another page of the current search.
    ///
    /// Nothing is fetched if there is nowhere to navigate. The displayed
    /// page stays put if the fetch fails.
    #[instrument(skip(self))]
    pub async fn fetch_page(&mut self, navigation: Navigation) -> Result<(), OptimadeClientError> {
        let Some(page) = self.state.pagination.plan(navigation) else {
            return Ok(());
        };
        let mut view = Frozen::new(&mut self.view);
        let result = self.state.fetch(Some(page), false).await;
        Self::present(&mut view, &self.state.results, result)
    }

    /// Navigate to the 1-based page `number` of the current search.
    #[instrument(skip(self))]
    pub async fn goto_page(&mut self, number: u64) -> Result<(), OptimadeClientError> {
        let Some(page) = self.state.pagination.plan_page(number) else {
            return Ok(());
        };
        let mut view = Frozen::new(&mut self.view);
        let result = self.state.fetch(Some(page), false).await;
        Self::present(&mut view, &self.state.results, result)
    }

    /// Convert result `index` of the current page to `format`.
    pub fn export(
        &mut self,
        index: usize,
        format: &str,
        converter: &impl StructureConverter,
    ) -> Result<String, OptimadeClientError> {
        let (_, structure) = self
            .state
            .results
            .get(index)
            .ok_or(OptimadeClientError::NoSuchResult(index))?;
        let formats = converter.formats();
        let converted = if formats.iter().any(|known| known == format) {
            converter.convert(structure, format)
        } else {
            Err(ConversionError {
                id: structure.id.clone(),
                format: format.to_string(),
                reason: format!("supported formats are {}", formats.join(", ")),
            })
        };
        converted.map_err(|err| {
            self.view.show_message(&err.to_string());
            err.into()
        })
    }

    fn present(
        view: &mut Frozen<'_, V>,
        results: &[LabeledStructure],
        result: Result<String, OptimadeClientError>,
    ) -> Result<(), OptimadeClientError> {
        match result {
            Ok(message) => {
                view.show_results(results);
                if !message.is_empty() {
                    view.show_message(&message);
                }
                Ok(())
            },
            Err(err) => {
                view.show_message(&err.to_string());
                Err(err)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::context::test_helpers::test_context;
    use crate::filter::{FilterField, FilterValue};
    use crate::pagination::NO_DATA_SUMMARY;

    #[derive(Debug, Default)]
    struct RecordingView {
        events: Vec<String>,
    }

    impl ResultsView for RecordingView {
        fn show_results(&mut self, results: &[LabeledStructure]) {
            let labels = results
                .iter()
                .map(|(label, _)| label.as_str())
                .collect::<Vec<_>>();
            self.events.push(format!("results: {}", labels.join(", ")));
        }

        fn show_message(&mut self, message: &str) {
            self.events.push(format!("message: {message}"));
        }

        fn set_frozen(&mut self, frozen: bool) {
            self.events.push(format!("frozen: {frozen}"));
        }
    }

    fn database(server: &MockServer) -> Database {
        Database {
            id: "db".to_string(),
            name: "Database".to_string(),
            description: String::new(),
            base_url: server.url("/db/v1"),
            provider_id: "prov".to_string(),
        }
    }

    async fn mock_info(server: &MockServer, api_version: &str) {
        server
            .mock_async(|when, then| {
                when.path("/db/v1/info");
                then.status(200).json_body(json!({
                    "data": {"type": "info", "id": "/", "attributes": {}},
                    "meta": {"api_version": api_version}
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.path("/db/v1/info/structures");
                then.status(200).json_body(json!({
                    "data": {
                        "type": "info",
                        "id": "structures",
                        "attributes": {"properties": {"nsites": {"sortable": true}}}
                    }
                }));
            })
            .await;
    }

    fn structures(ids: &[&str], data_returned: u64) -> serde_json::Value {
        let data = ids
            .iter()
            .map(|id| {
                json!({
                    "id": id,
                    "type": "structures",
                    "attributes": {"chemical_formula_descriptive": "SiO2"}
                })
            })
            .collect::<Vec<_>>();
        json!({
            "data": data,
            "meta": {"data_returned": data_returned, "data_available": 100}
        })
    }

    #[tokio::test]
    async fn search_shows_labeled_results() {
        let server = MockServer::start_async().await;
        mock_info(&server, "0.10.1").await;
        let search = server
            .mock_async(|when, then| {
                when.path("/db/v1/structures")
                    .query_param(
                        "filter",
                        r#"( nelements=2 ) AND ( NOT structure_features HAS ANY "assemblies","unknown_positions" )"#,
                    )
                    .query_param("page_limit", "25");
                then.status(200)
                    .json_body(structures(&["a", "b"], 2));
            })
            .await;

        let mut session = QuerySession::new(test_context(None), RecordingView::default());
        session.select_database(database(&server)).await.unwrap();
        assert_eq!(session.api_version(), Some("0.10.1"));
        assert_eq!(session.sort_fields(), ["nsites"]);

        let filters = FilterBuilder::new().with(FilterField::NElements, "2");
        session.fetch_by_filter(&filters).await.unwrap();

        search.assert_async().await;
        assert_eq!(session.results().len(), 2);
        assert_eq!(session.view().events, vec![
            "frozen: true",
            "frozen: false",
            "frozen: true",
            "results: SiO2 (id: a), SiO2 (id: b)",
            "frozen: false",
        ]);
    }

    #[tokio::test]
    async fn malformed_filter_sends_nothing() {
        let server = MockServer::start_async().await;
        mock_info(&server, "1.0.0").await;
        let search = server
            .mock_async(|when, then| {
                when.path("/db/v1/structures");
                then.status(200).json_body(structures(&[], 0));
            })
            .await;

        let mut session = QuerySession::new(test_context(None), RecordingView::default());
        session.select_database(database(&server)).await.unwrap();
        session.view_mut().events.clear();

        let filters = FilterBuilder::new().with(FilterField::NSites, FilterValue::Range(9, 1));
        let result = session.fetch_by_filter(&filters).await;

        assert!(matches!(result, Err(OptimadeClientError::Filter(_))));
        search.assert_hits_async(0).await;
        let events = &session.view().events;
        assert_eq!(events.first().map(String::as_str), Some("frozen: true"));
        assert!(events[1].starts_with("message: invalid input for 'nsites'"));
        assert_eq!(events.last().map(String::as_str), Some("frozen: false"));
    }

    #[tokio::test]
    async fn next_page_is_fetched_by_offset() {
        let server = MockServer::start_async().await;
        mock_info(&server, "1.0.0").await;
        let second_page = server
            .mock_async(|when, then| {
                when.path("/db/v1/structures").query_param("page_offset", "25");
                then.status(200).json_body(structures(&["z"], 30));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.path("/db/v1/structures");
                then.status(200).json_body(structures(&["a"], 30));
            })
            .await;

        let mut session = QuerySession::new(test_context(None), RecordingView::default());
        session.select_database(database(&server)).await.unwrap();
        session.fetch_by_filter(&FilterBuilder::new()).await.unwrap();

        session.fetch_page(Navigation::Next).await.unwrap();
        second_page.assert_async().await;
        assert_eq!(session.results()[0].1.id, "z");
        assert_eq!(
            session.pagination().snapshot().summary,
            "Showing 26-30 of 30 results (100 available)"
        );

        // already on the last page
        session.fetch_page(Navigation::Next).await.unwrap();
        second_page.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn server_errors_are_shown_and_unfreeze() {
        let server = MockServer::start_async().await;
        mock_info(&server, "1.0.0").await;
        server
            .mock_async(|when, then| {
                when.path("/db/v1/structures");
                then.status(400).json_body(json!({
                    "errors": [{"status": "400", "detail": "unknown property"}]
                }));
            })
            .await;

        let mut session = QuerySession::new(test_context(None), RecordingView::default());
        session.select_database(database(&server)).await.unwrap();
        session.view_mut().events.clear();

        let result = session.fetch_by_filter(&FilterBuilder::new()).await;

        assert!(matches!(result, Err(OptimadeClientError::Query { .. })));
        assert_eq!(session.view().events, vec![
            "frozen: true",
            "results: ",
            "message: Error(s) during querying. Message(s) from server:\n - unknown property",
            "frozen: false",
        ]);
    }

    #[tokio::test]
    async fn failed_page_keeps_the_displayed_page() {
        let server = MockServer::start_async().await;
        mock_info(&server, "1.0.0").await;
        let second_page = server
            .mock_async(|when, then| {
                when.path("/db/v1/structures").query_param("page_offset", "25");
                then.status(500).json_body(json!({
                    "errors": [{"status": "500", "detail": "database unavailable"}]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.path("/db/v1/structures");
                then.status(200).json_body(structures(&["a"], 60));
            })
            .await;

        let mut session = QuerySession::new(test_context(None), RecordingView::default());
        session.select_database(database(&server)).await.unwrap();
        session.fetch_by_filter(&FilterBuilder::new()).await.unwrap();
        let summary = session.pagination().snapshot().summary;
        assert_eq!(summary, "Showing 1-25 of 60 results (100 available)");

        let result = session.fetch_page(Navigation::Next).await;
        assert!(matches!(result, Err(OptimadeClientError::Query { .. })));
        assert_eq!(session.results()[0].1.id, "a");
        assert_eq!(session.pagination().offset(), 0);
        assert_eq!(session.pagination().snapshot().summary, summary);

        // retrying asks for the same page instead of skipping one
        let result = session.fetch_page(Navigation::Next).await;
        assert!(result.is_err());
        second_page.assert_hits_async(2).await;
        assert_eq!(session.pagination().snapshot().summary, summary);
    }

    #[tokio::test]
    async fn failed_search_clears_previous_counts() {
        let server = MockServer::start_async().await;
        mock_info(&server, "1.0.0").await;
        server
            .mock_async(|when, then| {
                when.path("/db/v1/structures").query_param("sort", "nsites");
                then.status(500).json_body(json!({
                    "errors": [{"status": "500", "detail": "database unavailable"}]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.path("/db/v1/structures");
                then.status(200).json_body(structures(&["a"], 60));
            })
            .await;

        let mut session = QuerySession::new(test_context(None), RecordingView::default());
        session.select_database(database(&server)).await.unwrap();
        session.fetch_by_filter(&FilterBuilder::new()).await.unwrap();
        assert!(session.pagination().has_data());

        session.set_sort(Some("nsites".to_string()));
        let result = session.fetch_by_filter(&FilterBuilder::new()).await;

        assert!(result.is_err());
        assert!(session.results().is_empty());
        assert_eq!(session.pagination().snapshot().summary, NO_DATA_SUMMARY);
    }

    #[tokio::test]
    async fn entries_without_formula_are_dropped() {
        let server = MockServer::start_async().await;
        mock_info(&server, "1.0.0").await;
        server
            .mock_async(|when, then| {
                when.path("/db/v1/structures");
                then.status(200).json_body(json!({
                    "data": [
                        {
                            "id": "a",
                            "type": "structures",
                            "attributes": {"chemical_formula_descriptive": "SiO2"}
                        },
                        {"id": "b", "type": "structures", "attributes": {"nsites": 3}},
                        {
                            "id": "c",
                            "type": "structures",
                            "attributes": {"chemical_formula_reduced": "NaCl"}
                        },
                    ],
                    "meta": {"data_returned": 3}
                }));
            })
            .await;

        let mut session = QuerySession::new(test_context(None), RecordingView::default());
        session.select_database(database(&server)).await.unwrap();
        session.view_mut().events.clear();
        session.fetch_by_filter(&FilterBuilder::new()).await.unwrap();

        let ids = session
            .results()
            .iter()
            .map(|(_, structure)| structure.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(session.view().events, vec![
            "frozen: true",
            "results: SiO2 (id: a), NaCl (id: c)",
            "frozen: false",
        ]);
        assert_eq!(session.pagination().snapshot().summary, "Showing 1-3 of 3 results");
    }

    #[tokio::test]
    async fn search_without_database_fails() {
        let mut session = QuerySession::new(test_context(None), RecordingView::default());
        let result = session.fetch_by_filter(&FilterBuilder::new()).await;
        assert!(matches!(result, Err(OptimadeClientError::NoDatabase)));
    }

    #[tokio::test]
    async fn export_converts_results() {
        let server = MockServer::start_async().await;
        mock_info(&server, "1.0.0").await;
        server
            .mock_async(|when, then| {
                when.path("/db/v1/structures");
                then.status(200).json_body(structures(&["a"], 1));
            })
            .await;

        let mut session = QuerySession::new(test_context(None), RecordingView::default());
        session.select_database(database(&server)).await.unwrap();
        session.fetch_by_filter(&FilterBuilder::new()).await.unwrap();

        let exported = session.export(0, "json", &JsonConverter).unwrap();
        let exported: Structure = serde_json::from_str(&exported).unwrap();
        assert_eq!(exported.id, "a");

        assert!(matches!(
            session.export(3, "json", &JsonConverter),
            Err(OptimadeClientError::NoSuchResult(3))
        ));
        let err = session.export(0, "cif", &JsonConverter).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot convert structure 'a' to 'cif': supported formats are json"
        );
    }
}
