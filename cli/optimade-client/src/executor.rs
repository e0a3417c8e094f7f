//! Issue single OPTIMADE queries.
//!
//! Every failure is normalized into a [ResponseEnvelope] carrying `errors`, so
//! callers only ever deal with one shape of response.

use std::sync::Arc;

use derive_more::Display;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use crate::context::ClientContext;
use crate::types::{ErrorObject, PageCursor, ResponseEnvelope};

pub const CLIENT_CONNECTION_ERROR: &str = "CLIENT: Connection error or timeout.";
pub const CLIENT_JSON_DECODE_ERROR: &str = "CLIENT: Cannot decode response to JSON format.";
pub const CLIENT_INVALID_URL: &str = "CLIENT: Invalid URL.";

/// OPTIMADE endpoints queried by this client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
pub enum Endpoint {
    #[default]
    #[display("structures")]
    Structures,
    #[display("links")]
    Links,
    #[display("info")]
    Info,
    #[display("info/structures")]
    InfoStructures,
    #[display("versions")]
    Versions,
}

/// Query parameters of a single request.
///
/// Only parameters that are set end up in the query string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    pub endpoint: Endpoint,
    pub filter: Option<String>,
    pub sort: Option<String>,
    pub page_limit: Option<u64>,
    /// A [PageCursor::Link] replaces the whole URL.
    pub page: Option<PageCursor>,
    /// Defaults to `json`.
    pub response_format: Option<String>,
    pub response_fields: Vec<String>,
    pub email_address: Option<String>,
}

/// Build the URL for a query against `base_url`.
pub fn query_url(base_url: &str, params: &QueryParams) -> Result<Url, url::ParseError> {
    if let Some(PageCursor::Link(link)) = &params.page {
        return Url::parse(link);
    }

    let mut url = Url::parse(&format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        params.endpoint
    ))?;

    {
        let mut query = url.query_pairs_mut();
        if let Some(filter) = params.filter.as_deref().filter(|f| !f.is_empty()) {
            query.append_pair("filter", filter);
        }
        if let Some(sort) = params.sort.as_deref().filter(|s| !s.is_empty()) {
            query.append_pair("sort", sort);
        }
        query.append_pair(
            "response_format",
            params.response_format.as_deref().unwrap_or("json"),
        );
        if let Some(email_address) = &params.email_address {
            query.append_pair("email_address", email_address);
        }
        if !params.response_fields.is_empty() {
            query.append_pair("response_fields", &params.response_fields.join(","));
        }
        if let Some(page_limit) = params.page_limit {
            query.append_pair("page_limit", &page_limit.to_string());
        }
        match params.page {
            Some(PageCursor::Offset(offset)) => {
                query.append_pair("page_offset", &offset.to_string());
            },
            Some(PageCursor::Number(number)) => {
                query.append_pair("page_number", &number.to_string());
            },
            Some(PageCursor::Link(_)) | None => {},
        }
    }

    Ok(url)
}

/// Issues queries through the shared HTTP session.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    ctx: Arc<ClientContext>,
}

impl QueryExecutor {
    pub fn new(ctx: Arc<ClientContext>) -> Self {
        Self { ctx }
    }

    /// Query `base_url` and return the response envelope.
    ///
    /// Transport failures and undecodable bodies come back as envelopes with
    /// a client side error, never as `Err`.
    #[instrument(skip_all, fields(base_url = %base_url, endpoint = %params.endpoint))]
    pub async fn query(&self, base_url: &str, params: &QueryParams) -> ResponseEnvelope {
        let url = match query_url(base_url, params) {
            Ok(url) => url,
            Err(err) => {
                debug!(%err, base_url, "could not build query URL");
                return ResponseEnvelope::client_error(CLIENT_INVALID_URL, base_url);
            },
        };
        self.get(url).await
    }

    /// Follow a link supplied by a server, e.g. `links.next`.
    pub async fn query_link(&self, link: &str) -> ResponseEnvelope {
        match Url::parse(link) {
            Ok(url) => self.get(url).await,
            Err(err) => {
                debug!(%err, link, "server supplied an invalid link");
                ResponseEnvelope::client_error(CLIENT_INVALID_URL, link)
            },
        }
    }

    async fn get(&self, url: Url) -> ResponseEnvelope {
        debug!(%url, "sending OPTIMADE query");

        let response = match self.ctx.http().get(url.clone()).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(%err, %url, "query failed");
                return ResponseEnvelope::client_error(CLIENT_CONNECTION_ERROR, &url);
            },
        };
        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) => {
                debug!(%err, %url, "reading response body failed");
                return ResponseEnvelope::client_error(CLIENT_CONNECTION_ERROR, &url);
            },
        };

        match serde_json::from_slice::<ResponseEnvelope>(&body) {
            Ok(mut envelope) => {
                if !status.is_success() && envelope.errors.is_none() {
                    envelope.errors = Some(vec![status_error(status)]);
                }
                envelope
            },
            Err(err) => {
                debug!(%err, %status, %url, "response is not an OPTIMADE JSON document");
                let mut envelope = ResponseEnvelope::client_error(CLIENT_JSON_DECODE_ERROR, &url);
                if !status.is_success() {
                    if let Some(errors) = envelope.errors.as_mut() {
                        errors.push(status_error(status));
                    }
                }
                envelope
            },
        }
    }
}

/// An error object standing in for a failed response without `errors`.
fn status_error(status: StatusCode) -> ErrorObject {
    ErrorObject {
        status: Some(Value::String(status.as_u16().to_string())),
        title: status.canonical_reason().map(String::from),
        detail: Some(format!("HTTP status {status}")),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::context::test_helpers::test_context;
    use crate::validator::handle_errors;

    #[test]
    fn query_url_contains_only_set_parameters() {
        let params = QueryParams {
            filter: Some("nelements=3".to_string()),
            page_limit: Some(10),
            page: Some(PageCursor::Offset(20)),
            ..Default::default()
        };
        let url = query_url("https://example.org/v1/", &params).unwrap();
        assert_eq!(url.path(), "/v1/structures");

        let pairs = url.query_pairs().into_owned().collect::<Vec<_>>();
        assert_eq!(pairs, vec![
            ("filter".to_string(), "nelements=3".to_string()),
            ("response_format".to_string(), "json".to_string()),
            ("page_limit".to_string(), "10".to_string()),
            ("page_offset".to_string(), "20".to_string()),
        ]);
    }

    #[test]
    fn query_url_uses_links_verbatim() {
        let link = "https://example.org/v1/structures?page_cursor=abc";
        let params = QueryParams {
            filter: Some("nelements=3".to_string()),
            page: Some(PageCursor::Link(link.to_string())),
            ..Default::default()
        };
        assert_eq!(query_url("https://other.org", &params).unwrap().as_str(), link);
    }

    #[test]
    fn query_url_for_nested_endpoint() {
        let params = QueryParams {
            endpoint: Endpoint::InfoStructures,
            page: Some(PageCursor::Number(2)),
            response_fields: vec!["id".to_string(), "nsites".to_string()],
            ..Default::default()
        };
        let url = query_url("https://example.org/v1", &params).unwrap();
        assert_eq!(url.path(), "/v1/info/structures");
        assert!(url.query().unwrap().contains("page_number=2"));
        assert!(url.query().unwrap().contains("response_fields=id%2Cnsites"));
    }

    #[tokio::test]
    async fn query_returns_parsed_body() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/structures")
                    .query_param("filter", "nsites=2");
                then.status(200).json_body(json!({
                    "data": [{"id": "a", "type": "structures", "attributes": {}}],
                    "meta": {"data_returned": 1, "data_available": 10}
                }));
            })
            .await;

        let executor = QueryExecutor::new(test_context(None));
        let envelope = executor
            .query(&server.url("/v1"), &QueryParams {
                filter: Some("nsites=2".to_string()),
                ..Default::default()
            })
            .await;

        mock.assert_async().await;
        assert_eq!(envelope.resources().len(), 1);
        assert_eq!(envelope.data_returned(), Some(1));
        assert_eq!(envelope.data_available(), Some(10));
    }

    #[tokio::test]
    async fn invalid_json_becomes_error_envelope() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/v1/structures");
                then.status(200).body("<html>not json</html>");
            })
            .await;

        let executor = QueryExecutor::new(test_context(None));
        let envelope = executor
            .query(&server.url("/v1"), &QueryParams::default())
            .await;

        let errors = envelope.errors.unwrap();
        assert_eq!(errors[0].detail.as_deref(), Some(CLIENT_JSON_DECODE_ERROR));
    }

    #[tokio::test]
    async fn failed_status_without_errors_keeps_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/v1/links");
                then.status(404).json_body(json!({"detail": "Not Found"}));
            })
            .await;

        let executor = QueryExecutor::new(test_context(None));
        let envelope = executor
            .query(&server.url("/v1"), &QueryParams {
                endpoint: Endpoint::Links,
                ..Default::default()
            })
            .await;

        let (message, statuses) = handle_errors(&envelope).unwrap();
        assert!(!message.is_empty());
        assert_eq!(statuses, BTreeSet::from([404]));
    }

    #[tokio::test]
    async fn connection_failure_becomes_error_envelope() {
        let executor = QueryExecutor::new(test_context(None));
        // Nothing listens on port 9 (discard) on test machines.
        let envelope = executor
            .query("http://127.0.0.1:9/v1", &QueryParams::default())
            .await;

        let errors = envelope.errors.unwrap();
        assert_eq!(errors[0].detail.as_deref(), Some(CLIENT_CONNECTION_ERROR));
        assert!(envelope.data.is_none());
    }
}
