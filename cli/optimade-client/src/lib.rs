//! Query and pagination core of an OPTIMADE browsing client.
//!
//! This crate provides:
//! - Discovery of OPTIMADE providers and their databases, with version
//!   negotiation and an on-disk registry snapshot
//! - Translation of structured user input into OPTIMADE filters
//! - Execution of queries with errors normalized into response envelopes
//! - Offset, page-number and link based pagination
//! - A [QuerySession] driving a front-end through the [ResultsView] trait
//!
//! ## Usage
//!
//! ```ignore
//! use optimade_client::{ClientConfig, ClientContext, FilterBuilder, FilterField, QuerySession};
//!
//! let ctx = ClientContext::new(ClientConfig::default())?;
//! let mut session = QuerySession::new(ctx, view);
//!
//! let providers = session.providers().await?;
//! let databases = session.select_provider(providers[0].clone()).await?;
//! session.select_database(databases[0].clone()).await?;
//!
//! let filters = FilterBuilder::new().with(FilterField::Elements, "Si, O");
//! session.fetch_by_filter(&filters).await?;
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod filter;
pub mod pagination;
pub mod providers;
pub mod session;
pub mod types;
pub mod validator;
pub mod version;

pub use cache::{FieldRange, QueryCache};
pub use config::ClientConfig;
pub use context::ClientContext;
pub use error::{CatalogError, OptimadeClientError, ParseError};
pub use executor::{Endpoint, QueryExecutor, QueryParams};
pub use filter::{FilterBuilder, FilterField, FilterValue};
pub use pagination::{Navigation, PageMove, PaginationController, PaginationSnapshot};
pub use providers::ProviderCatalog;
pub use session::{JsonConverter, QuerySession, ResultsView, StructureConverter};
pub use types::{Database, PageCursor, Provider, ResponseEnvelope, Structure};
pub use version::VersionNegotiator;
