//! OPTIMADE interaction types.
//!
//! These types model the parts of the OPTIMADE response envelope and the
//! `links`/`structures` resources this client consumes. Unknown members are
//! kept in `extra` maps so partially conformant servers still deserialize.

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// A link as found in OPTIMADE responses.
///
/// Servers send either a bare URL or a link object with `href` and `meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Link {
    Url(String),
    Object {
        href: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<Value>,
    },
}

impl Link {
    pub fn href(&self) -> &str {
        match self {
            Link::Url(url) => url,
            Link::Object { href, .. } => href,
        }
    }
}

impl From<&str> for Link {
    fn from(url: &str) -> Self {
        Link::Url(url.to_string())
    }
}

/// The `link_type` of a `links` resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Child,
    Root,
    External,
    Providers,
    #[serde(other)]
    Unknown,
}

/// Navigation links of a paginated response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<Link>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

/// The `data` member: a list of resources, or a single resource (`/info`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Data {
    Many(Vec<Value>),
    One(Value),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_returned: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_available: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub more_data_available: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A single entry of the `errors` member.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// HTTP status as sent by the server, usually a string (`"404"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ErrorObject {
    pub fn with_detail(detail: impl Display) -> Self {
        Self {
            detail: Some(detail.to_string()),
            ..Default::default()
        }
    }

    /// The HTTP status of this error, defaulting to 400 if missing or
    /// unparseable.
    pub fn status_code(&self) -> u16 {
        match &self.status {
            Some(Value::String(status)) => status.trim().parse().unwrap_or(400),
            Some(Value::Number(status)) => status
                .as_u64()
                .and_then(|status| u16::try_from(status).ok())
                .unwrap_or(400),
            _ => 400,
        }
    }
}

/// The top level object of every OPTIMADE response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<PageLinks>,
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Option::is_none"
    )]
    pub errors: Option<Vec<ErrorObject>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ResponseEnvelope {
    /// A client side error envelope, as returned for transport and decoding
    /// failures.
    pub fn client_error(detail: impl Display, url: impl Display) -> Self {
        let mut error = ErrorObject::with_detail(detail);
        error
            .extra
            .insert("url".to_string(), Value::String(url.to_string()));
        Self {
            errors: Some(vec![error]),
            ..Default::default()
        }
    }

    /// The resources in `data`, treating a single resource as a list of one.
    pub fn resources(&self) -> &[Value] {
        match &self.data {
            Some(Data::Many(resources)) => resources,
            Some(Data::One(resource)) => std::slice::from_ref(resource),
            None => &[],
        }
    }

    pub fn data_returned(&self) -> Option<u64> {
        self.meta.as_ref().and_then(|meta| meta.data_returned)
    }

    pub fn data_available(&self) -> Option<u64> {
        self.meta.as_ref().and_then(|meta| meta.data_available)
    }

    pub fn api_version(&self) -> Option<&str> {
        self.meta
            .as_ref()
            .and_then(|meta| meta.api_version.as_deref())
    }
}

/// `errors` is a list in OPTIMADE, but some servers (and older
/// clients) send a single object.
fn one_or_many<'de, D>(deserializer: D) -> Result<Option<Vec<ErrorObject>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<ErrorObject>),
        One(ErrorObject),
    }

    Ok(
        Option::<OneOrMany>::deserialize(deserializer)?.map(|errors| match errors {
            OneOrMany::Many(errors) => errors,
            OneOrMany::One(error) => vec![error],
        }),
    )
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// A `links` resource, as returned by provider registries and `/links`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinksResource {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub attributes: LinksAttributes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinksAttributes {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub base_url: Option<Link>,
    #[serde(default)]
    pub homepage: Option<Link>,
    #[serde(default)]
    pub link_type: Option<LinkType>,
}

impl LinksResource {
    /// The link type, falling back to the pre-1.0 convention of encoding it
    /// in the resource `type`.
    pub fn link_type(&self) -> LinkType {
        if let Some(link_type) = self.attributes.link_type {
            return link_type;
        }
        match self.resource_type.as_str() {
            "child" => LinkType::Child,
            "provider" => LinkType::External,
            _ => LinkType::Unknown,
        }
    }

    pub fn base_url(&self) -> Option<&str> {
        self.attributes
            .base_url
            .as_ref()
            .map(Link::href)
            .filter(|url| !url.trim().is_empty())
    }
}

/// A registered OPTIMADE provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Versioned base URL of the provider's index meta-database.
    pub base_url: String,
    pub link_type: LinkType,
    pub homepage: Option<String>,
    /// Listed for completeness, but excluded from querying by configuration.
    pub disabled: bool,
}

/// A child database of a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Database {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Versioned base URL.
    pub base_url: String,
    /// Id of the [Provider] this database was listed by.
    pub provider_id: String,
}

/// A `structures` resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    pub id: String,
    #[serde(rename = "type", default = "structures_type")]
    pub resource_type: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

fn structures_type() -> String {
    "structures".to_string()
}

impl Structure {
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).filter(|value| !value.is_null())
    }
}

/// Where to continue paging from.
///
/// Exactly one kind of cursor is authoritative for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    Offset(u64),
    /// 1-based page number.
    Number(u64),
    /// A fully materialized link supplied by the server.
    Link(String),
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn envelope_accepts_single_error_object() {
        let envelope: ResponseEnvelope = serde_json::from_value(json!({
            "errors": {"detail": "boom", "status": "500"}
        }))
        .unwrap();
        let errors = envelope.errors.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].status_code(), 500);
    }

    #[test]
    fn error_status_defaults_to_400() {
        let unparseable = ErrorObject {
            status: Some(json!("teapot")),
            ..Default::default()
        };
        assert_eq!(unparseable.status_code(), 400);
        assert_eq!(ErrorObject::default().status_code(), 400);
        let numeric = ErrorObject {
            status: Some(json!(404)),
            ..Default::default()
        };
        assert_eq!(numeric.status_code(), 404);
    }

    #[test]
    fn links_accept_strings_and_objects() {
        let links: PageLinks = serde_json::from_value(json!({
            "next": "https://example.org/v1/structures?page_offset=10",
            "prev": {"href": "https://example.org/v1/structures?page_offset=0", "meta": null},
            "last": null,
        }))
        .unwrap();
        assert_eq!(
            links.next.unwrap().href(),
            "https://example.org/v1/structures?page_offset=10"
        );
        assert_eq!(
            links.prev.unwrap().href(),
            "https://example.org/v1/structures?page_offset=0"
        );
        assert!(links.last.is_none());
    }

    #[test]
    fn legacy_link_type_from_resource_type() {
        let resource: LinksResource = serde_json::from_value(json!({
            "id": "db",
            "type": "child",
            "attributes": {"name": "db", "base_url": "https://example.org"}
        }))
        .unwrap();
        assert_eq!(resource.link_type(), LinkType::Child);

        let resource: LinksResource = serde_json::from_value(json!({
            "id": "db",
            "type": "links",
            "attributes": {"link_type": "something-new"}
        }))
        .unwrap();
        assert_eq!(resource.link_type(), LinkType::Unknown);
        assert_eq!(resource.base_url(), None);
    }

    #[test]
    fn single_resource_data_is_a_list_of_one() {
        let envelope: ResponseEnvelope = serde_json::from_value(json!({
            "data": {"id": "/", "type": "info"},
            "meta": {"api_version": "1.0.0"}
        }))
        .unwrap();
        assert_eq!(envelope.resources().len(), 1);
        assert_eq!(envelope.api_version(), Some("1.0.0"));
    }
}
