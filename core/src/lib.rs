//! Client SDK for the Stofware REST API.
//!
//! # Overview
//! `StofwareClient` holds a base URL and a bearer token. `client.model(name)`
//! returns a `ModelQuery` whose operations (`get_all`, `get_single`, `post`,
//! `put`, `delete`, `aggregate`, ...) each issue one blocking HTTP request
//! and return the decoded JSON body. `client.view(name)` does the same for
//! read-only views.
//!
//! # Design
//! - Every operation is split into a pure `build_*` step producing an
//!   `HttpRequest` and an executing step that hands it to a `Transport`, so
//!   request construction can be tested without a network.
//! - The default transport is a pooled `ureq` agent with a global timeout.
//! - Responses stay as `serde_json::Value` unless the caller asks for a typed
//!   decode through the `*_as` helpers.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod query;
pub mod resource;
pub mod transport;
pub mod types;

pub use client::StofwareClient;
pub use config::ClientConfig;
pub use error::ApiError;
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use query::QueryParams;
pub use resource::{ModelQuery, ViewQuery};
pub use transport::{Transport, UreqTransport};
pub use types::{
    AggregateColumn, AggregateFunction, BooleanOperator, Filter, FilterGroup, FilterItem, FilterValue, OrderBy, OrderDirection, QueryOperator,
};
